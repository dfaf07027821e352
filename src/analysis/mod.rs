//! The iterative dataflow framework.
//!
//! One generic fixed-point solver, instantiated four ways — reaching
//! definitions, field reachability, liveness, field usability — that differ
//! only in their per-instruction GEN/KILL functions, direction, and an
//! *exclude list* of instruction kinds whose transfer is skipped (used to
//! scope an analysis away from, say, compound-instruction proxies).
//!
//! Contract: per-instruction `before`/`after` fact sets in program order.
//! For a forward analysis, `before` is the union of the predecessors'
//! `after`, and `after = GEN ∪ (before − KILL)`; a backward analysis is the
//! same over the transposed graph. The whole graph is re-swept until no
//! derived set changes. All four instances are monotone may-analyses, so the
//! sweep terminates and is idempotent once stable.

pub mod liveness;
pub mod reachability;
pub mod reaching_defs;
pub mod usability;

use std::collections::HashSet;
use std::hash::Hash;

use crate::cfg::Cfg;
use crate::ir::{Code, InstrKind, Instruction};

/// Sweep direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Fixed-point fact sets, indexed by instruction position in the `Code`.
/// `before[i]` holds the facts in force just before instruction `i` in
/// program order, `after[i]` just after it. Instructions not materialized in
/// any block (stripped labels) keep empty sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataflowResult<F: Eq + Hash> {
    pub before: Vec<HashSet<F>>,
    pub after: Vec<HashSet<F>>,
}

/// Per-instruction transfer of one analysis instance.
pub(crate) trait Transfer {
    type Fact: Clone + Eq + Hash;

    fn gen(&self, idx: usize, instr: &Instruction) -> HashSet<Self::Fact>;
    fn kill(&self, idx: usize, instr: &Instruction) -> HashSet<Self::Fact>;
}

/// Run `transfer` to a fixed point over `cfg`.
pub(crate) fn solve<T: Transfer>(
    cfg: &Cfg,
    code: &Code,
    direction: Direction,
    transfer: &T,
    exclude: &[InstrKind],
) -> DataflowResult<T::Fact> {
    let n = code.instructions.len();
    let mut before: Vec<HashSet<T::Fact>> = vec![HashSet::new(); n];
    let mut after: Vec<HashSet<T::Fact>> = vec![HashSet::new(); n];

    // GEN/KILL are state-independent; compute them once.
    let mut gens: Vec<HashSet<T::Fact>> = vec![HashSet::new(); n];
    let mut kills: Vec<HashSet<T::Fact>> = vec![HashSet::new(); n];
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let instr = &code.instructions[i];
            if exclude.contains(&instr.kind()) {
                continue;
            }
            gens[i] = transfer.gen(i, instr);
            kills[i] = transfer.kill(i, instr);
        }
    }

    loop {
        let mut changed = false;
        for &node in &cfg.blocks {
            let instrs = &cfg.graph[node].instrs;
            match direction {
                Direction::Forward => {
                    for (pos, &i) in instrs.iter().enumerate() {
                        let mut inset: HashSet<T::Fact> = HashSet::new();
                        if pos == 0 {
                            for pred in cfg.preds(node) {
                                if let Some(&last) = cfg.graph[pred].instrs.last() {
                                    inset.extend(after[last].iter().cloned());
                                }
                            }
                        } else {
                            inset = after[instrs[pos - 1]].clone();
                        }
                        let mut outset = gens[i].clone();
                        outset.extend(inset.difference(&kills[i]).cloned());
                        if outset != after[i] {
                            changed = true;
                        }
                        before[i] = inset;
                        after[i] = outset;
                    }
                }
                Direction::Backward => {
                    for (pos, &i) in instrs.iter().enumerate().rev() {
                        let mut outset: HashSet<T::Fact> = HashSet::new();
                        if pos == instrs.len() - 1 {
                            for succ in cfg.succs(node) {
                                if let Some(&first) = cfg.graph[succ].instrs.first() {
                                    outset.extend(before[first].iter().cloned());
                                }
                            }
                        } else {
                            outset = before[instrs[pos + 1]].clone();
                        }
                        let mut inset = gens[i].clone();
                        inset.extend(outset.difference(&kills[i]).cloned());
                        if inset != before[i] {
                            changed = true;
                        }
                        before[i] = inset;
                        after[i] = outset;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    DataflowResult { before, after }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn loopy_code() -> Code {
        // x counts down to zero: the reachability of `x` must propagate
        // around the back edge.
        Code::new(
            vec![],
            vec![
                Instruction::Add(Field::new("x"), Size(8)),
                Instruction::Lbl(Label::new("top")),
                Instruction::Op {
                    dst: Field::new("x"),
                    lhs: Operand::Field(Field::new("x")),
                    op: AluOp::Sub,
                    rhs: Operand::Value(Value::new(1, Size(8))),
                },
                Instruction::Br {
                    lhs: Operand::Field(Field::new("x")),
                    op: CmpOp::Neq,
                    rhs: Operand::Value(Value::new(0, Size(8))),
                    target: Label::new("top"),
                },
                Instruction::Hlt,
            ],
        )
    }

    #[test]
    fn test_fixed_point_is_idempotent() {
        let code = loopy_code();
        let cfg = Cfg::build(&code).unwrap();
        let first = reachability::analyse(&cfg, &code, &[]);
        let second = reachability::analyse(&cfg, &code, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_facts_flow_around_back_edges() {
        let code = loopy_code();
        let cfg = Cfg::build(&code).unwrap();
        let reach = reachability::analyse(&cfg, &code, &[]);
        // At the OP (index 2) `x` is reachable both from the ADD above and
        // from the BR's back edge.
        assert!(reach.before[2].contains(&Field::new("x")));
        assert!(reach.after[3].contains(&Field::new("x")));
    }

    #[test]
    fn test_exclude_list_skips_transfer() {
        let code = loopy_code();
        let cfg = Cfg::build(&code).unwrap();
        let reach = reachability::analyse(&cfg, &code, &[InstrKind::Add, InstrKind::Op, InstrKind::Br]);
        // With every fact producer excluded, nothing ever becomes reachable.
        for set in &reach.after {
            assert!(set.is_empty());
        }
    }
}
