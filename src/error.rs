//! Error taxonomy.
//!
//! Two propagation regimes, per the engine's isolation contract:
//!
//! - [`PolicyError`] — structural defects in a policy. These are programmer
//!   errors and fail fast at build/optimize time; an engine refuses to start
//!   on a policy that does not validate.
//! - [`RuntimeError`] — faults encountered while processing one in-flight
//!   [`crate::runtime::State`]. They abort only that state's processing; the
//!   engine marks the packet dropped, records a [`RuntimeFault`] for the
//!   operator, and keeps serving subsequent packets.
//!
//! [`EngineError`] wraps both for the synchronous engine facade.

use std::error::Error;
use std::fmt;

use crate::ir::{Field, Label, TableId};

// ─── Build-time errors ─────────────────────────────────────────────

/// A structural defect detected while validating or transforming a policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// A code block with no instructions.
    EmptyCode,
    /// A branch or jump names a label with no matching LBL in its block.
    UnknownLabel(Label),
    /// Two LBL instructions in one block carry the same label.
    DuplicateLabel(Label),
    /// A branch or jump uses the reserved empty label.
    EmptyLabel { index: usize },
    /// A branch or jump is the final instruction, so its fall-through
    /// successor does not exist.
    ControlFallsOffEnd { index: usize },
    /// A code block without a HLT.
    MissingHalt,
    /// More than one HLT in a single code block.
    MultipleHalts { count: usize },
    /// The HLT is not the final instruction of its block.
    HaltNotLast,
    /// An instruction references a table that was never declared.
    UnknownTable(TableId),
    /// A positional operand list does not line up with the table's row.
    ArityMismatch {
        table: TableId,
        expected: usize,
        found: usize,
    },
    /// An operand of the wrong taxonomy tier for its slot (for example,
    /// masked sources against a simple-field table).
    OperandKind { table: TableId, detail: String },
    /// PUSH/POP inside a concurrent branch; payload resizing breaks the
    /// disjoint-write discipline.
    PushPopInConcurrent,
    /// An ST inside a concurrent branch whose offset or source cannot be
    /// resolved statically, so no merge plan can be computed for it.
    DynamicStoreInConcurrent,
    /// A field is used on some path with no ADD reaching it, and no declared
    /// size can be recovered for it.
    MissingField(Field),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::EmptyCode => write!(f, "code block has no instructions"),
            PolicyError::UnknownLabel(label) => write!(f, "unknown label '{}'", label),
            PolicyError::DuplicateLabel(label) => write!(f, "duplicate label '{}'", label),
            PolicyError::EmptyLabel { index } => {
                write!(f, "instruction {} uses the reserved empty label", index)
            }
            PolicyError::ControlFallsOffEnd { index } => {
                write!(f, "control transfer at {} falls off the end", index)
            }
            PolicyError::MissingHalt => write!(f, "code block has no HLT"),
            PolicyError::MultipleHalts { count } => {
                write!(f, "code block has {} HLT instructions, expected one", count)
            }
            PolicyError::HaltNotLast => write!(f, "HLT is not the final instruction"),
            PolicyError::UnknownTable(table) => write!(f, "unknown table '{}'", table),
            PolicyError::ArityMismatch {
                table,
                expected,
                found,
            } => write!(
                f,
                "table '{}' row has {} fields but {} operands were given",
                table, expected, found
            ),
            PolicyError::OperandKind { table, detail } => {
                write!(f, "operand kind mismatch against table '{}': {}", table, detail)
            }
            PolicyError::PushPopInConcurrent => {
                write!(f, "PUSH/POP is not allowed inside a concurrent branch")
            }
            PolicyError::DynamicStoreInConcurrent => write!(
                f,
                "ST inside a concurrent branch must use immediate offset and source"
            ),
            PolicyError::MissingField(field) => {
                write!(f, "no ADD for field '{}' reaches its use", field)
            }
        }
    }
}

impl Error for PolicyError {}

// ─── Per-packet runtime errors ─────────────────────────────────────

/// A fault encountered while processing a single in-flight state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// A field read or written that is not visible in the current header.
    MissingField(Field),
    /// A jump to a label that does not exist at runtime.
    UnknownLabel(Label),
    /// A table reference that the engine has no actor for.
    UnknownTable(TableId),
    /// A table row index outside the declared entry count.
    TableIndexOutOfRange {
        table: TableId,
        index: i64,
        len: usize,
    },
    /// A store into a destination narrower than its source.
    SizeMismatch {
        dst: Field,
        dst_bits: u16,
        src_bits: u16,
    },
    /// An operand of the wrong taxonomy tier reached the runtime.
    OperandKind { detail: String },
    /// A packet access outside the payload's bit length.
    PacketBounds {
        offset: usize,
        len: usize,
        available: usize,
    },
    /// Division by a zero-valued operand.
    DivideByZero,
    /// A table lookup matched no row. Not necessarily fatal: LKt materializes
    /// this as the −1 sentinel and lets the policy decide (CTR is the
    /// documented way to surface a miss to the controller).
    NoMatch,
    /// An internal invariant broke; always a bug in the engine itself.
    Internal(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::MissingField(field) => {
                write!(f, "field '{}' is not visible in the header", field)
            }
            RuntimeError::UnknownLabel(label) => write!(f, "unknown label '{}'", label),
            RuntimeError::UnknownTable(table) => write!(f, "unknown table '{}'", table),
            RuntimeError::TableIndexOutOfRange { table, index, len } => write!(
                f,
                "index {} out of range for table '{}' with {} rows",
                index, table, len
            ),
            RuntimeError::SizeMismatch {
                dst,
                dst_bits,
                src_bits,
            } => write!(
                f,
                "destination '{}' is {} bits but the source is {} bits",
                dst, dst_bits, src_bits
            ),
            RuntimeError::OperandKind { detail } => write!(f, "operand kind mismatch: {}", detail),
            RuntimeError::PacketBounds {
                offset,
                len,
                available,
            } => write!(
                f,
                "packet access at bit {} for {} bits exceeds payload of {} bits",
                offset, len, available
            ),
            RuntimeError::DivideByZero => write!(f, "division by zero"),
            RuntimeError::NoMatch => write!(f, "lookup matched no row"),
            RuntimeError::Internal(detail) => write!(f, "internal engine error: {}", detail),
        }
    }
}

impl Error for RuntimeError {}

/// An operator-facing record of a per-packet fault: what failed and where.
///
/// Drained through [`crate::engine::Engine::take_faults`]; the affected state
/// is still emitted with its DRP bit raised and an `ENGINE_FAULT` reason.
#[derive(Clone, Debug)]
pub struct RuntimeFault {
    /// The instruction (or table operation) that faulted, rendered.
    pub context: String,
    /// The underlying error.
    pub error: RuntimeError,
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

// ─── Engine facade errors ──────────────────────────────────────────

/// Errors surfaced by the synchronous engine facade.
#[derive(Debug)]
pub enum EngineError {
    /// The policy did not validate; the engine refuses to exist.
    Invalid(Vec<PolicyError>),
    /// The operation requires a started engine.
    NotStarted,
    /// `start` on an engine that is already running.
    AlreadyStarted,
    /// The engine was stopped and its channels are gone.
    Stopped,
    /// A table CRUD operation failed.
    Table(RuntimeError),
    /// The worker runtime could not be brought up.
    RuntimeInit(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Invalid(errors) => {
                write!(f, "policy failed validation with {} error(s)", errors.len())?;
                for e in errors {
                    write!(f, "\n  {}", e)?;
                }
                Ok(())
            }
            EngineError::NotStarted => write!(f, "engine is not started"),
            EngineError::AlreadyStarted => write!(f, "engine is already started"),
            EngineError::Stopped => write!(f, "engine has been stopped"),
            EngineError::Table(e) => write!(f, "table operation failed: {}", e),
            EngineError::RuntimeInit(detail) => {
                write!(f, "failed to bring up the worker runtime: {}", detail)
            }
        }
    }
}

impl Error for EngineError {}

impl From<RuntimeError> for EngineError {
    fn from(e: RuntimeError) -> Self {
        EngineError::Table(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Size;

    #[test]
    fn test_policy_error_display() {
        let e = PolicyError::UnknownLabel(Label::new("LBL_X"));
        assert_eq!(format!("{}", e), "unknown label 'LBL_X'");

        let e = PolicyError::ArityMismatch {
            table: TableId::new("match_table"),
            expected: 2,
            found: 1,
        };
        assert_eq!(
            format!("{}", e),
            "table 'match_table' row has 2 fields but 1 operands were given"
        );
    }

    #[test]
    fn test_runtime_error_display() {
        let e = RuntimeError::SizeMismatch {
            dst: Field::new("outport_bitmap"),
            dst_bits: Size(16).0,
            src_bits: Size(48).0,
        };
        assert_eq!(
            format!("{}", e),
            "destination 'outport_bitmap' is 16 bits but the source is 48 bits"
        );
    }

    #[test]
    fn test_engine_error_wraps_validation() {
        let e = EngineError::Invalid(vec![PolicyError::MissingHalt]);
        let rendered = format!("{}", e);
        assert!(rendered.contains("1 error(s)"));
        assert!(rendered.contains("no HLT"));
    }
}
