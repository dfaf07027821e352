//! Field reachability (availability): which header fields have been made
//! visible — by an ADD or by any earlier reference — on some path to a
//! program point. RMV is the only kill. Add-code-motion consults this to
//! find uses of not-yet-visible fields, and the cleanup passes to find
//! ADD/RMV instructions with nothing to do.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::ir::{Code, Field, InstrKind, Instruction};

use super::{solve, DataflowResult, Direction, Transfer};

struct Reachability;

impl Transfer for Reachability {
    type Fact = Field;

    fn gen(&self, _idx: usize, instr: &Instruction) -> HashSet<Field> {
        match instr {
            // RMV takes a field away; referencing it there is not a use.
            Instruction::Rmv(_) => HashSet::new(),
            _ => instr.referenced_fields().into_iter().collect(),
        }
    }

    fn kill(&self, _idx: usize, instr: &Instruction) -> HashSet<Field> {
        match instr {
            Instruction::Rmv(field) => std::iter::once(field.clone()).collect(),
            _ => HashSet::new(),
        }
    }
}

pub fn analyse(cfg: &Cfg, code: &Code, exclude: &[InstrKind]) -> DataflowResult<Field> {
    solve(cfg, code, Direction::Forward, &Reachability, exclude)
}
