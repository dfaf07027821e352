//! Dead-code elimination. Three phases iterated to a fixed point, because
//! each phase exposes work for the next:
//!
//! - drop definitions whose single destination field is not live right after
//!   (liveness, with ADD/RMV transparent);
//! - drop ADDs for fields never referenced afterwards (usability, with RMV
//!   transparent, so an ADD kept alive only by its own RMV still dies);
//! - drop RMVs for fields that were never visible anyway (reachability, with
//!   ADD transparent).

use crate::analysis::{liveness, reachability, usability};
use crate::cfg::Cfg;
use crate::error::PolicyError;
use crate::ir::{is_reserved_or_argument, Code, Field, Instruction, InstrKind};

pub(crate) fn transform(code: &mut Code) -> Result<(), PolicyError> {
    loop {
        let before = code.instructions.clone();
        drop_dead_definitions(code)?;
        drop_unused_adds(code)?;
        drop_unreachable_rmvs(code)?;
        if code.instructions == before {
            return Ok(());
        }
    }
}

fn remove_indices(code: &mut Code, mut indices: Vec<usize>) {
    indices.sort_unstable();
    indices.dedup();
    for i in indices.into_iter().rev() {
        code.instructions.remove(i);
    }
}

/// The single destination field of a removable definition, if it has one.
fn sole_destination(instr: &Instruction) -> Option<&Field> {
    match instr {
        Instruction::Ld { dst, .. }
        | Instruction::Op { dst, .. }
        | Instruction::Lkt { dst, .. }
        | Instruction::Crc { dst, .. }
        | Instruction::Hsh { dst, .. } => Some(dst),
        _ => None,
    }
}

fn drop_dead_definitions(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;
    let live = liveness::analyse(&cfg, code, &[InstrKind::Add, InstrKind::Rmv]);

    let mut dead = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let instr = &code.instructions[i];
            if let Some(dst) = sole_destination(instr) {
                if !is_reserved_or_argument(dst, &code.argument_fields)
                    && !live.after[i].contains(dst)
                {
                    dead.push(i);
                }
            } else if let Instruction::Ldt { dsts, .. } = instr {
                // A table load dies only when every plain destination is dead.
                let plain: Vec<&Field> = dsts
                    .iter()
                    .filter(|d| !is_reserved_or_argument(d, &code.argument_fields))
                    .collect();
                if !plain.is_empty() && plain.iter().all(|d| !live.after[i].contains(*d)) {
                    dead.push(i);
                }
            }
        }
    }
    remove_indices(code, dead);
    Ok(())
}

fn drop_unused_adds(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;
    let usab = usability::analyse(&cfg, code, &[InstrKind::Rmv]);

    let mut dead = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            if let Instruction::Add(field, _) = &code.instructions[i] {
                if !is_reserved_or_argument(field, &code.argument_fields)
                    && !usab.after[i].contains(field)
                {
                    dead.push(i);
                }
            }
        }
    }
    remove_indices(code, dead);
    Ok(())
}

fn drop_unreachable_rmvs(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;
    let reach = reachability::analyse(&cfg, code, &[InstrKind::Add]);

    let mut dead = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            if let Instruction::Rmv(field) = &code.instructions[i] {
                if !is_reserved_or_argument(field, &code.argument_fields)
                    && !reach.before[i].contains(field)
                {
                    dead.push(i);
                }
            }
        }
    }
    remove_indices(code, dead);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn test_dead_store_chain_collapses() {
        // x is defined, copied into y, and neither is observable.
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Add(Field::new("y"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(1, Size(8))),
                },
                Instruction::Ld {
                    dst: Field::new("y"),
                    src: LdSource::Field(Field::new("x")),
                },
                Instruction::Rmv(Field::new("x")),
                Instruction::Rmv(Field::new("y")),
                Instruction::Hlt,
            ],
        );
        transform(&mut code).unwrap();
        assert_eq!(code.instructions, vec![Instruction::Hlt]);
    }

    #[test]
    fn test_observable_definition_survives() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(1, Size(8))),
                },
                Instruction::Op {
                    dst: Field::new("outport_bitmap"),
                    lhs: Operand::Field(Field::new("x")),
                    op: AluOp::Add,
                    rhs: Operand::Value(Value::new(0, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        let before = code.instructions.clone();
        transform(&mut code).unwrap();
        assert_eq!(code.instructions, before);
    }

    #[test]
    fn test_store_to_packet_is_never_dead() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(7, Size(8))),
                },
                Instruction::St {
                    loc: Location::new(Operand::Value(Value::new(0, Size(8)))),
                    src: Operand::Field(Field::new("x")),
                },
                Instruction::Hlt,
            ],
        );
        let before = code.instructions.clone();
        transform(&mut code).unwrap();
        assert_eq!(code.instructions, before);
    }
}
