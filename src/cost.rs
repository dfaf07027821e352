//! Static hardware-resource estimation.
//!
//! Walks the CFG with reachability and reaching-definitions in hand to
//! compute the live header bit-width ("area") at each instruction, weighted
//! by a fixed per-opcode factor, plus a per-opcode latency:
//!
//! - 1 cycle for ALU/branch/ID/DRP/CTR and direct loads/stores;
//! - 2 for Mul/Div and indirect-location loads;
//! - 3 for RAM table operations, 4 for CAM, 2 for hashed storage;
//! - ADD/RMV/LBL/HLT are free.
//!
//! Each declared table contributes a one-time area term: entry count × row
//! bit-width, doubled for CAM (a match column stores value and mask; a
//! ternary column also needs its per-row mask bits, counted at 3×).
//!
//! Nested CNC/ATM/SEQ bodies are costed additively — concurrent branch
//! costs are summed, a conservative static estimate rather than a timing
//! simulation.

use std::collections::HashSet;

use crate::analysis::{reachability, reaching_defs};
use crate::cfg::Cfg;
use crate::error::PolicyError;
use crate::ir::{
    is_reserved_or_argument, AluOp, Code, Decls, Field, Instruction, LdSource, MatchKind, Policy,
    TableFields, TableId, TableKind,
};

/// Estimated area (header bits summed over program points, plus declared
/// table storage) and latency (cycles summed over all instructions).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CostEstimate {
    pub area: u64,
    pub latency: u64,
}

/// Estimate the cost of a whole policy. Reserved and root-level argument
/// fields are excluded from the area: they are constant across policies.
pub fn cost_policy(policy: &Policy) -> Result<CostEstimate, PolicyError> {
    let mut estimate = CostEstimate::default();
    cost_decls(&policy.decls, &mut estimate);
    cost_code(&policy.code, &policy.decls, &mut estimate)?;
    Ok(estimate)
}

fn cost_decls(decls: &Decls, estimate: &mut CostEstimate) {
    for (_, table) in &decls.tables {
        let row_bits: u64 = match &table.fields {
            TableFields::Simple(fields) => fields.iter().map(|(_, s)| s.0 as u64).sum(),
            TableFields::Match(fields) => fields
                .iter()
                .map(|(_, s, kind)| match kind {
                    MatchKind::Binary => s.0 as u64 * 2,
                    MatchKind::Ternary => s.0 as u64 * 3,
                })
                .sum(),
        };
        let storage = row_bits * table.entries as u64;
        estimate.area += match table.kind {
            TableKind::Cam => storage * 2,
            TableKind::Ram | TableKind::Hash => storage,
        };
    }
}

fn table_weight(decls: &Decls, table: &TableId) -> Result<u64, PolicyError> {
    let decl = decls
        .get(table)
        .ok_or_else(|| PolicyError::UnknownTable(table.clone()))?;
    Ok(match decl.kind {
        TableKind::Ram => 3,
        TableKind::Cam => 4,
        TableKind::Hash => 2,
    })
}

fn cost_code(code: &Code, decls: &Decls, estimate: &mut CostEstimate) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;

    let exclude = reaching_defs::exclude_all_but_add();
    let rd = reaching_defs::analyse(&cfg, code, &[], &exclude);
    let reach = reachability::analyse(&cfg, code, &exclude);

    // Live header width at instruction `i`: the declared sizes of every
    // plain field visible there.
    let header_bits = |i: usize, reach_in: &HashSet<Field>| -> Result<u64, PolicyError> {
        let mut bits = 0u64;
        for field in reach_in {
            if is_reserved_or_argument(field, &code.argument_fields) {
                continue;
            }
            let size = reaching_defs::field_size(&rd.before[i], code, field)
                .ok_or_else(|| PolicyError::MissingField(field.clone()))?;
            bits += size.0 as u64;
        }
        Ok(bits)
    };

    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let instr = &code.instructions[i];
            let (area_weight, latency) = match instr {
                Instruction::Id | Instruction::Drp(_) | Instruction::Ctr(_) => (1, 1),
                Instruction::Add(_, _) | Instruction::Rmv(_) | Instruction::Lbl(_) => (0, 0),
                Instruction::Ld { src, .. } => match src {
                    LdSource::Location(_) => (2, 2),
                    _ => (1, 1),
                },
                Instruction::St { .. } => (1, 1),
                Instruction::Op { op, .. } => match op {
                    AluOp::Mul | AluOp::Div => (2, 2),
                    _ => (1, 1),
                },
                Instruction::Push { .. } | Instruction::Pop { .. } => (1, 1),
                Instruction::Br { .. } | Instruction::Jmp(_) => (1, 1),
                Instruction::Ldt { table, .. }
                | Instruction::Stt { table, .. }
                | Instruction::Lkt { table, .. } => {
                    let w = table_weight(decls, table)?;
                    (w, w)
                }
                Instruction::Inct { table, .. } => {
                    // The row readback costs one extra pass over the header.
                    let w = table_weight(decls, table)?;
                    estimate.area += header_bits(i, &reach.before[i])?;
                    (w, w)
                }
                Instruction::Crc { .. } | Instruction::Hsh { .. } => (1, 1),
                Instruction::Hlt => (0, 0),
                Instruction::Cnc(codes) => {
                    for inner in codes {
                        cost_code(inner, decls, estimate)?;
                    }
                    (0, 0)
                }
                Instruction::Atm(inner) | Instruction::Seq(inner) => {
                    cost_code(inner, decls, estimate)?;
                    (0, 0)
                }
            };
            if area_weight > 0 {
                estimate.area += header_bits(i, &reach.before[i])? * area_weight;
            }
            estimate.latency += latency;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        CmpOp, Label, Location, Operand, Reason, Size, Table, Value, WriteSources,
    };

    fn value(v: i64, s: u16) -> Operand {
        Operand::Value(Value::new(v, Size(s)))
    }

    #[test]
    fn test_hub_costs_one_cycle() {
        // outport = inport ^ 0xFFFF over reserved fields only: no header
        // area, one cycle for the OP.
        let policy = Policy::new(
            Decls::new(),
            Code::new(
                vec![],
                vec![
                    Instruction::Op {
                        dst: Field::new("outport_bitmap"),
                        lhs: Operand::Field(Field::new("inport_bitmap")),
                        op: AluOp::Xor,
                        rhs: value(0xFFFF, 16),
                    },
                    Instruction::Hlt,
                ],
            ),
        );
        assert_eq!(
            cost_policy(&policy).unwrap(),
            CostEstimate { area: 0, latency: 1 }
        );
    }

    #[test]
    fn test_multiply_and_indirect_load_cost_double() {
        let policy = Policy::new(
            Decls::new(),
            Code::new(
                vec![],
                vec![
                    Instruction::Add(Field::new("x"), Size(8)),
                    Instruction::Ld {
                        dst: Field::new("x"),
                        src: LdSource::Location(Location::new(value(0, 16))),
                    },
                    Instruction::Op {
                        dst: Field::new("x"),
                        lhs: Operand::Field(Field::new("x")),
                        op: AluOp::Mul,
                        rhs: value(3, 8),
                    },
                    Instruction::Hlt,
                ],
            ),
        );
        // ADD is free. LD-indirect: 8 bits * 2, 2 cycles. OP Mul: 8 * 2, 2
        // cycles.
        assert_eq!(
            cost_policy(&policy).unwrap(),
            CostEstimate {
                area: 32,
                latency: 4
            }
        );
    }

    #[test]
    fn test_table_declaration_area_and_access_weights() {
        let mut decls = Decls::new();
        decls.insert(
            TableId::new("match_table"),
            Table {
                fields: TableFields::Match(vec![(
                    Field::new("eth_src"),
                    Size(48),
                    MatchKind::Binary,
                )]),
                entries: 2,
                kind: TableKind::Cam,
            },
        );
        decls.insert(
            TableId::new("params_table"),
            Table {
                fields: TableFields::Simple(vec![(Field::new("outport_bitmap"), Size(2))]),
                entries: 2,
                kind: TableKind::Ram,
            },
        );
        let policy = Policy::new(
            decls,
            Code::new(
                vec![],
                vec![
                    Instruction::Add(Field::new("eth_src"), Size(48)),
                    Instruction::Add(Field::new("index"), Size(16)),
                    Instruction::Lkt {
                        dst: Field::new("index"),
                        table: TableId::new("match_table"),
                        srcs: vec![Operand::Field(Field::new("eth_src"))],
                    },
                    Instruction::Ldt {
                        dsts: vec![Field::new("outport_bitmap")],
                        table: TableId::new("params_table"),
                        index: Operand::Field(Field::new("index")),
                    },
                    Instruction::Hlt,
                ],
            ),
        );
        // Declarations: CAM 48*2 bits * 2 rows * 2 = 384; RAM 2 * 2 = 4.
        // LKt on CAM: header (48+16) * 4 = 256, 4 cycles.
        // LDt on RAM: header 64 * 3 = 192, 3 cycles.
        assert_eq!(
            cost_policy(&policy).unwrap(),
            CostEstimate {
                area: 384 + 4 + 256 + 192,
                latency: 7
            }
        );
    }

    #[test]
    fn test_concurrent_branch_costs_are_summed() {
        let branch = |field: &str| {
            Code::new(
                vec![Field::new(field)],
                vec![
                    Instruction::Op {
                        dst: Field::new(field),
                        lhs: Operand::Field(Field::new(field)),
                        op: AluOp::Add,
                        rhs: value(1, 8),
                    },
                    Instruction::Hlt,
                ],
            )
        };
        let policy = Policy::new(
            Decls::new(),
            Code::new(
                vec![],
                vec![
                    Instruction::Cnc(vec![branch("a"), branch("b")]),
                    Instruction::Hlt,
                ],
            ),
        );
        // Each branch: one 1-cycle OP over its own argument field (argument
        // fields carry no area). Summed, not maxed.
        assert_eq!(
            cost_policy(&policy).unwrap(),
            CostEstimate { area: 0, latency: 2 }
        );
    }

    #[test]
    fn test_unknown_table_fails_fast() {
        let policy = Policy::new(
            Decls::new(),
            Code::new(
                vec![],
                vec![
                    Instruction::Stt {
                        table: TableId::new("ghost"),
                        index: value(0, 8),
                        srcs: WriteSources::Plain(vec![value(1, 8)]),
                    },
                    Instruction::Hlt,
                ],
            ),
        );
        assert_eq!(
            cost_policy(&policy).unwrap_err(),
            PolicyError::UnknownTable(TableId::new("ghost"))
        );
    }

    #[test]
    fn test_branchy_policy_counts_both_arms() {
        let policy = Policy::new(
            Decls::new(),
            Code::new(
                vec![],
                vec![
                    Instruction::Br {
                        lhs: Operand::Field(Field::new("inport_bitmap")),
                        op: CmpOp::Eq,
                        rhs: value(2, 2),
                        target: Label::new("LBL_1"),
                    },
                    Instruction::Drp(Reason::new("POLICY_DROP", "")),
                    Instruction::Jmp(Label::new("LBL_HLT")),
                    Instruction::Lbl(Label::new("LBL_1")),
                    Instruction::Ctr(Reason::new("PUNT", "")),
                    Instruction::Lbl(Label::new("LBL_HLT")),
                    Instruction::Hlt,
                ],
            ),
        );
        // BR + DRP + JMP + CTR, one cycle each; latency is a static total
        // over all instructions, not a path length.
        assert_eq!(
            cost_policy(&policy).unwrap(),
            CostEstimate { area: 0, latency: 4 }
        );
    }
}
