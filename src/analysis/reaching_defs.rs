//! Reaching definitions: which definition sites (instruction indices) reach
//! a program point unkilled. A definition of a field is killed by any other
//! definition of the same field; reserved and argument fields are exempt
//! (they are defined outside the block and every write to them is visible).
//!
//! The optimizer and the cost estimator run this with everything but ADD
//! excluded, which reduces the facts to "which ADDs reach here" — exactly
//! what is needed to recover a field's declared size at a use site.

use std::collections::{HashMap, HashSet};

use crate::cfg::Cfg;
use crate::ir::{is_reserved_or_argument, Code, Field, InstrKind, Instruction, Size};

use super::{solve, DataflowResult, Direction, Transfer};

/// The exclude list that reduces the facts to ADD sites only.
pub(crate) fn exclude_all_but_add() -> Vec<InstrKind> {
    vec![
        InstrKind::Ld,
        InstrKind::Op,
        InstrKind::Ldt,
        InstrKind::Lkt,
        InstrKind::Crc,
        InstrKind::Hsh,
        InstrKind::Cnc,
        InstrKind::Atm,
        InstrKind::Seq,
    ]
}

struct ReachingDefs {
    defs_of: HashMap<Field, HashSet<usize>>,
}

/// Fields an instruction defines, for kill purposes. RMV defines nothing but
/// still kills earlier definitions of its field.
fn killed_fields(instr: &Instruction) -> Vec<Field> {
    match instr {
        Instruction::Rmv(field) => vec![field.clone()],
        _ => instr.written_fields(),
    }
}

impl Transfer for ReachingDefs {
    type Fact = usize;

    fn gen(&self, idx: usize, instr: &Instruction) -> HashSet<usize> {
        let defines = match instr {
            Instruction::Add(_, _)
            | Instruction::Ld { .. }
            | Instruction::Op { .. }
            | Instruction::Ldt { .. }
            | Instruction::Lkt { .. }
            | Instruction::Crc { .. }
            | Instruction::Hsh { .. } => true,
            Instruction::Cnc(_) | Instruction::Atm(_) | Instruction::Seq(_) => {
                !instr.written_fields().is_empty()
            }
            _ => false,
        };
        if defines {
            std::iter::once(idx).collect()
        } else {
            HashSet::new()
        }
    }

    fn kill(&self, idx: usize, instr: &Instruction) -> HashSet<usize> {
        let mut out = HashSet::new();
        for field in killed_fields(instr) {
            if let Some(defs) = self.defs_of.get(&field) {
                out.extend(defs.iter().copied());
            }
        }
        out.remove(&idx);
        out
    }
}

pub fn analyse(
    cfg: &Cfg,
    code: &Code,
    argument_fields: &[Field],
    exclude: &[InstrKind],
) -> DataflowResult<usize> {
    // All definition sites per field, across the whole code. ADDs always
    // count; other definitions only for plain fields.
    let mut defs_of: HashMap<Field, HashSet<usize>> = HashMap::new();
    for (i, instr) in code.instructions.iter().enumerate() {
        match instr {
            Instruction::Add(field, _) => {
                defs_of.entry(field.clone()).or_default().insert(i);
            }
            _ => {
                for field in instr.written_fields() {
                    if is_reserved_or_argument(&field, argument_fields) {
                        continue;
                    }
                    defs_of.entry(field).or_default().insert(i);
                }
            }
        }
    }

    let transfer = ReachingDefs { defs_of };
    solve(cfg, code, Direction::Forward, &transfer, exclude)
}

/// The declared size of `field` per the ADD definitions in `defs`, if any
/// reaches.
pub fn field_size(defs: &HashSet<usize>, code: &Code, field: &Field) -> Option<Size> {
    defs.iter().find_map(|&i| match &code.instructions[i] {
        Instruction::Add(f, size) if f == field => Some(*size),
        _ => None,
    })
}
