//! Add-code-motion: for every operand referencing a field that is not yet
//! visible at that point, plant a synthetic ADD immediately before the use,
//! sized from the ADD definition that reaches it. Reachability is computed
//! with explicit ADDs excluded, so the pass is deliberately eager; the
//! redundant-code pass deletes the duplicates it plants over existing ADDs.

use crate::analysis::{reachability, reaching_defs};
use crate::cfg::Cfg;
use crate::error::PolicyError;
use crate::ir::{is_reserved_or_argument, Code, Instruction, InstrKind, Size};

pub(crate) fn transform(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;

    let rd = reaching_defs::analyse(
        &cfg,
        code,
        &code.argument_fields,
        &reaching_defs::exclude_all_but_add(),
    );
    let reach = reachability::analyse(&cfg, code, &[InstrKind::Add]);

    // Plan the insertions: (instruction index, ADDs to place before it).
    let mut plan: Vec<(usize, Vec<Instruction>)> = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let instr = &code.instructions[i];
            if matches!(instr.kind(), InstrKind::Add | InstrKind::Rmv) {
                continue;
            }
            let mut adds = Vec::new();
            for field in instr.referenced_fields() {
                if is_reserved_or_argument(&field, &code.argument_fields) {
                    continue;
                }
                if reach.before[i].contains(&field) {
                    continue;
                }
                if adds
                    .iter()
                    .any(|a| matches!(a, Instruction::Add(f, _) if f == &field))
                {
                    continue;
                }
                let size: Size = reaching_defs::field_size(&rd.before[i], code, &field)
                    .ok_or(PolicyError::MissingField(field.clone()))?;
                adds.push(Instruction::Add(field, size));
            }
            if !adds.is_empty() {
                plan.push((i, adds));
            }
        }
    }

    // Apply from the back so earlier indices stay valid.
    plan.sort_by(|a, b| b.0.cmp(&a.0));
    for (index, adds) in plan {
        for (k, add) in adds.into_iter().enumerate() {
            code.instructions.insert(index + k, add);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn test_plants_add_before_first_use() {
        // `x` has an ADD on one path only; the join's use needs a plant.
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(16)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        transform(&mut code).unwrap();
        // Eager by design: a duplicate ADD lands right before the LD.
        assert_eq!(
            code.instructions,
            vec![
                Instruction::Add(Field::new("x"), Size(16)),
                Instruction::Add(Field::new("x"), Size(16)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Hlt,
            ]
        );
    }

    #[test]
    fn test_second_use_needs_no_plant() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(16)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Op {
                    dst: Field::new("x"),
                    lhs: Operand::Field(Field::new("x")),
                    op: AluOp::Add,
                    rhs: Operand::Value(Value::new(1, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        transform(&mut code).unwrap();
        // One plant before the LD; the OP sees x as reachable already.
        let adds = code
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Add(_, _)))
            .count();
        assert_eq!(adds, 2);
    }

    #[test]
    fn test_field_without_any_add_is_a_structural_error() {
        let mut code = Code::new(
            vec![],
            vec![
                Instruction::Ld {
                    dst: Field::new("ghost"),
                    src: LdSource::Value(Value::new(1, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        assert_eq!(
            transform(&mut code).unwrap_err(),
            PolicyError::MissingField(Field::new("ghost"))
        );
    }

    #[test]
    fn test_reserved_and_argument_fields_never_planted() {
        let mut code = Code::new(
            vec![Field::new("arg")],
            vec![
                Instruction::Op {
                    dst: Field::new("outport_bitmap"),
                    lhs: Operand::Field(Field::new("inport_bitmap")),
                    op: AluOp::Xor,
                    rhs: Operand::Field(Field::new("arg")),
                },
                Instruction::Hlt,
            ],
        );
        let before = code.instructions.clone();
        transform(&mut code).unwrap();
        assert_eq!(code.instructions, before);
    }
}
