//! Remove-code-motion: plant an RMV immediately after the last
//! statically-determined use of a field, reclaiming header capacity as soon
//! as the field can no longer matter.

use crate::analysis::usability;
use crate::cfg::Cfg;
use crate::error::PolicyError;
use crate::ir::{is_reserved_or_argument, Code, Instruction, InstrKind};

pub(crate) fn transform(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;
    let usab = usability::analyse(&cfg, code, &[]);

    // Plan the insertions: (instruction index, RMVs to place after it).
    let mut plan: Vec<(usize, Vec<Instruction>)> = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let instr = &code.instructions[i];
            if matches!(instr.kind(), InstrKind::Add | InstrKind::Rmv) {
                continue;
            }
            let mut rmvs = Vec::new();
            for field in instr.referenced_fields() {
                if is_reserved_or_argument(&field, &code.argument_fields) {
                    continue;
                }
                if usab.after[i].contains(&field) {
                    continue;
                }
                if rmvs
                    .iter()
                    .any(|r| matches!(r, Instruction::Rmv(f) if f == &field))
                {
                    continue;
                }
                rmvs.push(Instruction::Rmv(field));
            }
            if !rmvs.is_empty() {
                plan.push((i, rmvs));
            }
        }
    }

    plan.sort_by(|a, b| b.0.cmp(&a.0));
    for (index, rmvs) in plan {
        for (k, rmv) in rmvs.into_iter().enumerate() {
            code.instructions.insert(index + 1 + k, rmv);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn test_rmv_planted_after_last_use() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
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
        transform(&mut code).unwrap();
        assert_eq!(
            code.instructions,
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Op {
                    dst: Field::new("outport_bitmap"),
                    lhs: Operand::Field(Field::new("x")),
                    op: AluOp::Add,
                    rhs: Operand::Value(Value::new(0, Size(8))),
                },
                Instruction::Rmv(Field::new("x")),
                Instruction::Hlt,
            ]
        );
    }

    #[test]
    fn test_existing_rmv_prevents_a_second_plant() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Rmv(Field::new("x")),
                Instruction::Hlt,
            ],
        );
        let before = code.instructions.clone();
        transform(&mut code).unwrap();
        assert_eq!(code.instructions, before);
    }

    #[test]
    fn test_field_used_on_taken_branch_is_kept() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Br {
                    lhs: Operand::Value(Value::new(0, Size(1))),
                    op: CmpOp::Eq,
                    rhs: Operand::Value(Value::new(0, Size(1))),
                    target: Label::new("use_x"),
                },
                Instruction::Jmp(Label::new("done")),
                Instruction::Lbl(Label::new("use_x")),
                Instruction::Op {
                    dst: Field::new("outport_bitmap"),
                    lhs: Operand::Field(Field::new("x")),
                    op: AluOp::Add,
                    rhs: Operand::Value(Value::new(0, Size(8))),
                },
                Instruction::Lbl(Label::new("done")),
                Instruction::Hlt,
            ],
        );
        transform(&mut code).unwrap();
        // No RMV lands between the LD and the BR: the taken arm still
        // reads x. The arm's own last use gets one.
        assert!(matches!(code.instructions[2], Instruction::Br { .. }));
        let op_pos = code
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::Op { .. }))
            .unwrap();
        assert_eq!(
            code.instructions[op_pos + 1],
            Instruction::Rmv(Field::new("x"))
        );
    }
}
