//! Structural validation. Everything here is a programmer error: a policy
//! that fails validation is rejected before any engine starts.

use crate::error::PolicyError;

use super::*;

impl Policy {
    /// Validate the whole policy, collecting every defect found.
    pub fn validate(&self) -> Result<(), Vec<PolicyError>> {
        let mut errors = Vec::new();
        validate_code(&self.code, &self.decls, false, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_code(code: &Code, decls: &Decls, in_concurrent: bool, errors: &mut Vec<PolicyError>) {
    let instrs = &code.instructions;
    if instrs.is_empty() {
        errors.push(PolicyError::EmptyCode);
        return;
    }

    // Exactly one HLT, and it must be the final instruction; the CFG wires
    // only one block to $exit, so anything else is ambiguous.
    let halts = instrs
        .iter()
        .filter(|i| matches!(i, Instruction::Hlt))
        .count();
    if halts == 0 {
        errors.push(PolicyError::MissingHalt);
    } else if halts > 1 {
        errors.push(PolicyError::MultipleHalts { count: halts });
    } else if !matches!(instrs.last(), Some(Instruction::Hlt)) {
        errors.push(PolicyError::HaltNotLast);
    }

    // Duplicate label markers make targets ambiguous.
    let mut seen_labels: Vec<&Label> = Vec::new();
    for instr in instrs {
        if let Instruction::Lbl(label) = instr {
            if seen_labels.contains(&label) {
                errors.push(PolicyError::DuplicateLabel(label.clone()));
            } else {
                seen_labels.push(label);
            }
        }
    }

    for (index, instr) in instrs.iter().enumerate() {
        match instr {
            Instruction::Br { target, .. } | Instruction::Jmp(target) => {
                if target.is_fall_through() {
                    errors.push(PolicyError::EmptyLabel { index });
                } else if code.find_label(target).is_none() {
                    errors.push(PolicyError::UnknownLabel(target.clone()));
                }
                if index + 1 == instrs.len() {
                    errors.push(PolicyError::ControlFallsOffEnd { index });
                }
            }
            Instruction::Ldt { dsts, table, .. } => {
                check_arity(decls, table, dsts.len(), errors);
            }
            Instruction::Stt { table, srcs, .. } => {
                if let Some(decl) = check_arity(decls, table, srcs.len(), errors) {
                    let mismatch = match (&decl.fields, srcs) {
                        (TableFields::Simple(_), WriteSources::Masked(_)) => {
                            Some("masked sources against a simple-field table")
                        }
                        (TableFields::Match(_), WriteSources::Plain(_)) => {
                            Some("plain sources against a match-field table")
                        }
                        _ => None,
                    };
                    if let Some(detail) = mismatch {
                        errors.push(PolicyError::OperandKind {
                            table: table.clone(),
                            detail: detail.to_string(),
                        });
                    }
                }
            }
            Instruction::Inct { table, .. } => {
                if decls.get(table).is_none() {
                    errors.push(PolicyError::UnknownTable(table.clone()));
                }
            }
            Instruction::Lkt { table, srcs, .. } => {
                check_arity(decls, table, srcs.len(), errors);
            }
            Instruction::Push { .. } | Instruction::Pop { .. } => {
                if in_concurrent {
                    errors.push(PolicyError::PushPopInConcurrent);
                }
            }
            Instruction::St { loc, src } => {
                if in_concurrent {
                    let static_offset = matches!(loc.offset, Operand::Value(_));
                    let static_source = matches!(src, Operand::Value(_));
                    if !static_offset || !static_source {
                        errors.push(PolicyError::DynamicStoreInConcurrent);
                    }
                }
            }
            Instruction::Atm(inner) | Instruction::Seq(inner) => {
                validate_code(inner, decls, in_concurrent, errors);
            }
            Instruction::Cnc(codes) => {
                for inner in codes {
                    validate_code(inner, decls, true, errors);
                }
            }
            _ => {}
        }
    }
}

fn check_arity<'a>(
    decls: &'a Decls,
    table: &TableId,
    found: usize,
    errors: &mut Vec<PolicyError>,
) -> Option<&'a Table> {
    match decls.get(table) {
        None => {
            errors.push(PolicyError::UnknownTable(table.clone()));
            None
        }
        Some(decl) => {
            let expected = decl.fields.arity();
            if expected != found {
                errors.push(PolicyError::ArityMismatch {
                    table: table.clone(),
                    expected,
                    found,
                });
            }
            Some(decl)
        }
    }
}
