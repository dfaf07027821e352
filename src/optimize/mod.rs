//! The optimization pipeline.
//!
//! Four passes over a `Code`, applied in a fixed order — scaffolding first,
//! cleanup after:
//!
//! 1. [`add_motion`] plants a synthetic ADD before the first use of any
//!    field that is not yet visible there, establishing the header
//!    visibility invariant.
//! 2. [`rmv_motion`] plants an RMV after the last use of a field, reclaiming
//!    header capacity.
//! 3. [`dead_code`] deletes definitions of dead fields, ADDs never used, and
//!    RMVs of fields that were never visible, iterating the three phases to
//!    a fixed point.
//! 4. [`redundant`] deletes ADD/RMV duplicates already dominated by an
//!    earlier one.
//!
//! The pipeline recurses bottom-up into nested ATM/SEQ/CNC bodies first;
//! concurrent branches are independent and are optimized in parallel. Every
//! pass edits the instruction list in place at computed indices. Observable
//! behavior must be unchanged; `execute(P, s) == execute(optimize(P), s)` on
//! every reachable field, the drop/controller outcome, and the payload.

pub(crate) mod add_motion;
pub(crate) mod dead_code;
pub(crate) mod redundant;
pub(crate) mod rmv_motion;

use rayon::prelude::*;

use crate::error::PolicyError;
use crate::ir::{Code, Instruction, Policy};

/// Optimize a whole policy in place. Fails fast on structural defects; the
/// policy is left untouched on error.
pub fn optimize_policy(policy: &mut Policy) -> Result<(), PolicyError> {
    if let Err(mut errors) = policy.validate() {
        return Err(errors.remove(0));
    }
    optimize_code(&mut policy.code)
}

/// Optimize one code block in place, nested bodies first.
pub fn optimize_code(code: &mut Code) -> Result<(), PolicyError> {
    for instr in &mut code.instructions {
        match instr {
            Instruction::Cnc(codes) => {
                codes
                    .par_iter_mut()
                    .map(optimize_code)
                    .collect::<Result<Vec<_>, _>>()?;
            }
            Instruction::Atm(inner) | Instruction::Seq(inner) => {
                optimize_code(inner)?;
            }
            _ => {}
        }
    }

    add_motion::transform(code)?;
    rmv_motion::transform(code)?;
    dead_code::transform(code)?;
    redundant::transform(code)?;
    Ok(())
}
