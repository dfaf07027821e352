//! Liveness: which header fields will be read again before being redefined.
//! Backward analysis; reads generate, writes (including ADD/RMV) kill. Dead
//! code elimination drops definitions whose field is not live afterwards.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::ir::{Code, Field, InstrKind, Instruction};

use super::{solve, DataflowResult, Direction, Transfer};

struct Liveness;

impl Transfer for Liveness {
    type Fact = Field;

    fn gen(&self, _idx: usize, instr: &Instruction) -> HashSet<Field> {
        instr.read_fields().into_iter().collect()
    }

    fn kill(&self, _idx: usize, instr: &Instruction) -> HashSet<Field> {
        instr.written_fields().into_iter().collect()
    }
}

pub fn analyse(cfg: &Cfg, code: &Code, exclude: &[InstrKind]) -> DataflowResult<Field> {
    solve(cfg, code, Direction::Backward, &Liveness, exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn test_read_makes_a_field_live_upstream() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Ld {
                    dst: Field::new("a"),
                    src: LdSource::Value(Value::new(1, Size(8))),
                },
                Instruction::Op {
                    dst: Field::new("b"),
                    lhs: Operand::Field(Field::new("a")),
                    op: AluOp::Add,
                    rhs: Operand::Value(Value::new(1, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        let live = analyse(&cfg, &code, &[]);
        // `a` is live after its definition (the OP reads it), `b` is not.
        assert!(live.after[0].contains(&Field::new("a")));
        assert!(!live.after[1].contains(&Field::new("b")));
    }

    #[test]
    fn test_redefinition_kills_liveness() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Ld {
                    dst: Field::new("a"),
                    src: LdSource::Value(Value::new(1, Size(8))),
                },
                Instruction::Ld {
                    dst: Field::new("a"),
                    src: LdSource::Value(Value::new(2, Size(8))),
                },
                Instruction::Op {
                    dst: Field::new("b"),
                    lhs: Operand::Field(Field::new("a")),
                    op: AluOp::Add,
                    rhs: Operand::Value(Value::new(1, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        let live = analyse(&cfg, &code, &[]);
        // The first store is dead: the second redefines `a` before the read.
        assert!(!live.after[0].contains(&Field::new("a")));
        assert!(live.after[1].contains(&Field::new("a")));
    }
}
