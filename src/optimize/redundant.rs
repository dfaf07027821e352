//! Redundant-code elimination: drop an ADD (or RMV) when an earlier ADD (or
//! RMV) for the same field already covers it on every incoming path, and
//! only while at least two such instructions exist for the field. Iterates
//! to a fixed point; the transform is idempotent.

use crate::analysis::{reachability, usability};
use crate::cfg::Cfg;
use crate::error::PolicyError;
use crate::ir::{
    add_instruction_count, is_reserved_or_argument, rmv_instruction_count, Code, Instruction,
};

pub(crate) fn transform(code: &mut Code) -> Result<(), PolicyError> {
    loop {
        let before = code.instructions.clone();
        drop_dominated_adds(code)?;
        drop_dominated_rmvs(code)?;
        if code.instructions == before {
            return Ok(());
        }
    }
}

fn remove_indices(code: &mut Code, mut indices: Vec<usize>) {
    indices.sort_unstable();
    for i in indices.into_iter().rev() {
        code.instructions.remove(i);
    }
}

/// An ADD is redundant when its field is already reachable at that point:
/// some earlier ADD made it visible on every path that matters.
fn drop_dominated_adds(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;
    let reach = reachability::analyse(&cfg, code, &[]);

    let mut dead = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            if let Instruction::Add(field, _) = &code.instructions[i] {
                if is_reserved_or_argument(field, &code.argument_fields) {
                    continue;
                }
                if add_instruction_count(&code.instructions, field) < 2 {
                    continue;
                }
                if reach.before[i].contains(field) {
                    dead.push(i);
                }
            }
        }
    }
    remove_indices(code, dead);
    Ok(())
}

/// An RMV is redundant when nothing below still references the field: an
/// earlier RMV (which counts as a reference) already did the work.
fn drop_dominated_rmvs(code: &mut Code) -> Result<(), PolicyError> {
    let cfg = Cfg::build(code)?;
    let usab = usability::analyse(&cfg, code, &[]);

    let mut dead = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            if let Instruction::Rmv(field) = &code.instructions[i] {
                if is_reserved_or_argument(field, &code.argument_fields) {
                    continue;
                }
                if rmv_instruction_count(&code.instructions, field) < 2 {
                    continue;
                }
                if !usab.after[i].contains(field) {
                    dead.push(i);
                }
            }
        }
    }
    remove_indices(code, dead);
    Ok(())
}
