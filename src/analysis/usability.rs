//! Field usability: which header fields are still referenced — in any
//! operand position — at some later point. Backward analysis. An ADD whose
//! field is never usable afterwards is dead; the point where usability ends
//! is where remove-code-motion plants an RMV.
//!
//! Unlike liveness, a later write counts as a use (the field must exist to
//! be written), and an RMV counts as a use of the field it removes. An ADD
//! does not keep its own field usable, and both ADD and RMV stop usability
//! from propagating further up.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::ir::{Code, Field, InstrKind, Instruction};

use super::{solve, DataflowResult, Direction, Transfer};

struct Usability;

impl Transfer for Usability {
    type Fact = Field;

    fn gen(&self, _idx: usize, instr: &Instruction) -> HashSet<Field> {
        match instr {
            Instruction::Add(_, _) => HashSet::new(),
            _ => instr.referenced_fields().into_iter().collect(),
        }
    }

    fn kill(&self, _idx: usize, instr: &Instruction) -> HashSet<Field> {
        match instr {
            Instruction::Add(field, _) | Instruction::Rmv(field) => {
                std::iter::once(field.clone()).collect()
            }
            _ => HashSet::new(),
        }
    }
}

pub fn analyse(cfg: &Cfg, code: &Code, exclude: &[InstrKind]) -> DataflowResult<Field> {
    solve(cfg, code, Direction::Backward, &Usability, exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn test_usability_ends_after_last_reference() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(5, Size(8))),
                },
                Instruction::Id,
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        let usab = analyse(&cfg, &code, &[]);
        // The LD keeps `x` usable after the ADD; nothing after the LD does.
        assert!(usab.after[0].contains(&Field::new("x")));
        assert!(!usab.after[1].contains(&Field::new("x")));
    }

    #[test]
    fn test_add_with_no_later_reference_is_unusable() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        let usab = analyse(&cfg, &code, &[]);
        assert!(!usab.after[0].contains(&Field::new("x")));
    }

    #[test]
    fn test_rmv_counts_as_a_use_but_blocks_propagation() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Id,
                Instruction::Rmv(Field::new("x")),
                Instruction::Ld {
                    dst: Field::new("x"),
                    src: LdSource::Value(Value::new(1, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        let usab = analyse(&cfg, &code, &[]);
        // The RMV itself makes `x` usable above it; the LD's reference below
        // is visible after the RMV but does not leak past it.
        assert!(usab.before[1].contains(&Field::new("x")));
        assert!(usab.after[1].contains(&Field::new("x")));
        assert_eq!(
            usab.after[0].contains(&Field::new("x")),
            true,
            "the RMV's own reference keeps x usable upstream"
        );
        assert!(!usab.before[0].iter().any(|f| f != &Field::new("x")));
    }
}
