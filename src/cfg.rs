//! Control-flow-graph construction.
//!
//! A flat instruction list is sliced into basic blocks at *leaders*: the
//! first instruction, the instruction after any BR/JMP, and the instruction
//! after any LBL that some BR/JMP targets. Blocks become nodes of a
//! `petgraph` digraph between synthetic `$entry` and `$exit` nodes; each edge
//! carries the [`Label`] that selects it (the empty label is the fall-through
//! edge), which is also how the pipelined engine keys its output channels.
//!
//! LBL instructions are pure markers: they are stripped from block bodies and
//! survive only as block entry labels. Blocks that contain nothing but labels
//! are contracted away, their labels aliased onto the following block. The
//! graph is rebuilt fresh on every call — no incremental maintenance.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::PolicyError;
use crate::ir::{Code, Instruction, Label};

/// One basic block: entry labels (first one primary, the rest aliases folded
/// in from contracted label-only blocks) and the label-stripped instruction
/// indices into the source `Code`.
#[derive(Clone, Debug)]
pub struct Block {
    pub labels: Vec<Label>,
    pub instrs: Vec<usize>,
}

/// The control-flow graph of one `Code`.
#[derive(Debug)]
pub struct Cfg {
    pub graph: DiGraph<Block, Label>,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
    /// Body blocks in program order.
    pub blocks: Vec<NodeIndex>,
}

impl Cfg {
    pub fn build(code: &Code) -> Result<Cfg, PolicyError> {
        let instrs = &code.instructions;
        let n = instrs.len();
        if n == 0 {
            return Err(PolicyError::EmptyCode);
        }

        // Leader set.
        let mut leader = vec![false; n];
        leader[0] = true;
        for (i, instr) in instrs.iter().enumerate() {
            let target = match instr {
                Instruction::Br { target, .. } => Some(target),
                Instruction::Jmp(target) => Some(target),
                _ => None,
            };
            if let Some(target) = target {
                if target.is_fall_through() {
                    return Err(PolicyError::EmptyLabel { index: i });
                }
                if i + 1 >= n {
                    return Err(PolicyError::ControlFallsOffEnd { index: i });
                }
                leader[i + 1] = true;
                let j = code
                    .find_label(target)
                    .ok_or_else(|| PolicyError::UnknownLabel(target.clone()))?;
                if j + 1 >= n {
                    return Err(PolicyError::ControlFallsOffEnd { index: j });
                }
                leader[j + 1] = true;
            }
        }

        // Maximal runs starting at leaders.
        let mut raw: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        for i in 1..n {
            if leader[i] {
                raw.push((start, i));
                start = i;
            }
        }
        raw.push((start, n));

        // Entry label per raw block: the LBL that ends the previous block,
        // or a synthetic one.
        let raw_labels: Vec<Label> = raw
            .iter()
            .enumerate()
            .map(|(k, &(s, _))| {
                if k > 0 {
                    if let Instruction::Lbl(label) = &instrs[s - 1] {
                        return label.clone();
                    }
                }
                Label::new(format!("$b{}", k))
            })
            .collect();

        // Strip labels; contract label-only blocks into their successor.
        struct Slice {
            labels: Vec<Label>,
            instrs: Vec<usize>,
            raw_idx: usize,
        }
        let mut finals: Vec<Slice> = Vec::new();
        let mut raw_to_final = vec![usize::MAX; raw.len()];
        let mut pending: Vec<Label> = Vec::new();
        for (k, &(s, e)) in raw.iter().enumerate() {
            let stripped: Vec<usize> = (s..e)
                .filter(|&i| !matches!(instrs[i], Instruction::Lbl(_)))
                .collect();
            let mut labels = std::mem::take(&mut pending);
            labels.push(raw_labels[k].clone());
            if stripped.is_empty() {
                pending = labels;
            } else {
                raw_to_final[k] = finals.len();
                finals.push(Slice {
                    labels,
                    instrs: stripped,
                    raw_idx: k,
                });
            }
        }
        if !pending.is_empty() {
            // The code ends in a run of labels; nothing to fall through to.
            return Err(PolicyError::HaltNotLast);
        }
        for k in (0..raw.len()).rev() {
            if raw_to_final[k] == usize::MAX {
                raw_to_final[k] = raw_to_final[k + 1];
            }
        }

        // Nodes.
        let mut graph = DiGraph::new();
        let entry = graph.add_node(Block {
            labels: vec![Label::new("$entry")],
            instrs: Vec::new(),
        });
        let exit = graph.add_node(Block {
            labels: vec![Label::new("$exit")],
            instrs: Vec::new(),
        });
        let nodes: Vec<NodeIndex> = finals
            .iter()
            .map(|s| {
                graph.add_node(Block {
                    labels: s.labels.clone(),
                    instrs: s.instrs.clone(),
                })
            })
            .collect();

        let mut label_map: HashMap<Label, NodeIndex> = HashMap::new();
        for (fi, slice) in finals.iter().enumerate() {
            for label in &slice.labels {
                label_map.insert(label.clone(), nodes[fi]);
            }
        }

        graph.add_edge(entry, nodes[raw_to_final[0]], Label::fall_through());

        // Successor edges, derived from each block's original last
        // instruction.
        let mut exit_wired = false;
        for (fi, slice) in finals.iter().enumerate() {
            let node = nodes[fi];
            let (_, e) = raw[slice.raw_idx];
            let fall_through_to = |raw_to_final: &[usize], k: usize| -> Result<NodeIndex, PolicyError> {
                raw_to_final
                    .get(k + 1)
                    .map(|&f| nodes[f])
                    .ok_or(PolicyError::HaltNotLast)
            };
            match &instrs[e - 1] {
                Instruction::Br { target, .. } => {
                    let next = fall_through_to(&raw_to_final, slice.raw_idx)?;
                    graph.add_edge(node, next, Label::fall_through());
                    let t = *label_map
                        .get(target)
                        .ok_or_else(|| PolicyError::UnknownLabel(target.clone()))?;
                    graph.add_edge(node, t, target.clone());
                }
                Instruction::Jmp(target) => {
                    let t = *label_map
                        .get(target)
                        .ok_or_else(|| PolicyError::UnknownLabel(target.clone()))?;
                    graph.add_edge(node, t, target.clone());
                }
                Instruction::Hlt => {
                    graph.add_edge(node, exit, Label::fall_through());
                    exit_wired = true;
                }
                _ => {
                    let next = fall_through_to(&raw_to_final, slice.raw_idx)?;
                    graph.add_edge(node, next, Label::fall_through());
                }
            }
        }
        if !exit_wired {
            return Err(PolicyError::MissingHalt);
        }

        Ok(Cfg {
            graph,
            entry,
            exit,
            blocks: nodes,
        })
    }

    /// Concatenate the blocks back into an instruction list, reinserting the
    /// user-assigned labels. For programs whose labels are all branch targets
    /// this reproduces the original list.
    pub fn reassemble(&self, code: &Code) -> Vec<Instruction> {
        let mut out = Vec::new();
        for &node in &self.blocks {
            let block = &self.graph[node];
            for label in &block.labels {
                if !label.is_synthetic() {
                    out.push(Instruction::Lbl(label.clone()));
                }
            }
            for &i in &block.instrs {
                out.push(code.instructions[i].clone());
            }
        }
        out
    }

    /// Predecessor blocks of `node` (entry included, duplicates possible for
    /// parallel edges).
    pub(crate) fn preds(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .collect()
    }

    /// Successor blocks of `node` (exit included).
    pub(crate) fn succs(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use petgraph::visit::EdgeRef;

    use super::*;
    use crate::ir::*;

    fn val(v: i64, s: u16) -> Operand {
        Operand::Value(Value::new(v, Size(s)))
    }

    /// The pass-through shape: a branch, two arms, a shared exit label.
    fn branchy_code() -> Code {
        Code::new(
            vec![],
            vec![
                Instruction::Br {
                    lhs: Operand::Field(Field::new("inport_bitmap")),
                    op: CmpOp::Eq,
                    rhs: val(2, 2),
                    target: Label::new("LBL_1"),
                },
                Instruction::Ld {
                    dst: Field::new("outport_bitmap"),
                    src: LdSource::Value(Value::new(2, Size(2))),
                },
                Instruction::Jmp(Label::new("LBL_HLT")),
                Instruction::Lbl(Label::new("LBL_1")),
                Instruction::Ld {
                    dst: Field::new("outport_bitmap"),
                    src: LdSource::Value(Value::new(1, Size(1))),
                },
                Instruction::Lbl(Label::new("LBL_HLT")),
                Instruction::Hlt,
            ],
        )
    }

    #[test]
    fn test_blocks_and_edges() {
        let code = branchy_code();
        let cfg = Cfg::build(&code).unwrap();

        // [BR], [LD, JMP], [LD], [HLT]; the LBL-only block is contracted.
        assert_eq!(cfg.blocks.len(), 4);

        // Entry has exactly one successor: the BR block.
        assert_eq!(cfg.succs(cfg.entry).len(), 1);

        // The BR block has two successors (fall-through + target).
        let br_block = cfg.blocks[0];
        assert_eq!(cfg.succs(br_block).len(), 2);

        // Every body block has at least one successor; only the HLT block
        // reaches $exit.
        for &b in &cfg.blocks {
            assert!(!cfg.succs(b).is_empty());
        }
        assert_eq!(cfg.preds(cfg.exit).len(), 1);
    }

    #[test]
    fn test_reassemble_round_trip() {
        let code = branchy_code();
        let cfg = Cfg::build(&code).unwrap();
        assert_eq!(cfg.reassemble(&code), code.instructions);
    }

    #[test]
    fn test_branch_edge_weights_carry_selecting_label() {
        let code = branchy_code();
        let cfg = Cfg::build(&code).unwrap();
        let br_block = cfg.blocks[0];
        let mut weights: Vec<Label> = cfg
            .graph
            .edges(br_block)
            .map(|e| e.weight().clone())
            .collect();
        weights.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(weights, vec![Label::fall_through(), Label::new("LBL_1")]);
    }

    #[test]
    fn test_straight_line_single_block() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Id,
                Instruction::Id,
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.graph[cfg.blocks[0]].instrs, vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let code = Code::new(
            vec![],
            vec![Instruction::Jmp(Label::new("ghost")), Instruction::Hlt],
        );
        assert_eq!(
            Cfg::build(&code).unwrap_err(),
            PolicyError::UnknownLabel(Label::new("ghost"))
        );
    }

    #[test]
    fn test_missing_halt_rejected() {
        let code = Code::new(vec![], vec![Instruction::Id]);
        assert_eq!(Cfg::build(&code).unwrap_err(), PolicyError::MissingHalt);
    }

    #[test]
    fn test_consecutive_targeted_labels_alias_one_block() {
        let code = Code::new(
            vec![],
            vec![
                Instruction::Br {
                    lhs: val(0, 1),
                    op: CmpOp::Eq,
                    rhs: val(0, 1),
                    target: Label::new("a"),
                },
                Instruction::Br {
                    lhs: val(0, 1),
                    op: CmpOp::Eq,
                    rhs: val(1, 1),
                    target: Label::new("b"),
                },
                Instruction::Lbl(Label::new("a")),
                Instruction::Lbl(Label::new("b")),
                Instruction::Hlt,
            ],
        );
        let cfg = Cfg::build(&code).unwrap();
        // [BR], [BR], [HLT] — both labels land on the HLT block.
        assert_eq!(cfg.blocks.len(), 3);
        assert_eq!(cfg.reassemble(&code), code.instructions);
    }
}
