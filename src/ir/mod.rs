//! The policy intermediate representation.
//!
//! A [`Policy`] is table declarations plus one root [`Code`]. A `Code` is an
//! ordered instruction list with a declared set of *argument fields* — the
//! header slots visible to it when it runs as a nested scope. Instructions
//! form a closed sum type; operand slots are typed to one of three capability
//! tiers, enforced structurally rather than by runtime checks:
//!
//! - destination/index slots take a bare [`Field`];
//! - general sources take an [`Operand`] (field or immediate value);
//! - payload-capable sources take an [`LdSource`] (operand or an indirect
//!   [`Location`] into the packet bit-vector).
//!
//! The IR carries no behavior beyond validation (`Policy::validate`); the
//! builder front-end produces it once and only the optimizer edits it.

mod display;
mod fields;
mod validate;

pub use fields::{
    bitmap_to_ports, is_reserved_field, is_special_field, ports_to_bitmap, reserved_fields,
    RESERVED_FIELDS, SPECIAL_FIELDS,
};
pub(crate) use fields::{
    add_instruction_count, is_reserved_or_argument, modified_fields, modified_locations,
    modified_reserved_fields, rmv_instruction_count,
};

use serde::{Deserialize, Serialize};

// ─── Scalar domains ────────────────────────────────────────────────

/// A bit width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Size(pub u16);

/// A sized register value. Arithmetic is signed 64-bit and is not masked to
/// the declared size; the −1 lookup-miss sentinel depends on signedness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Value {
    pub value: i64,
    pub size: Size,
}

impl Value {
    pub fn new(value: i64, size: Size) -> Self {
        Value { value, size }
    }
}

/// A ternary match mask. A fresh match row carries `Mask(-1)` (all ones).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mask(pub i64);

/// An interned header-slot name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Field(String);

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A symbolic jump target. The empty label is the reserved fall-through
/// sentinel and never denotes a real target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label(name.into())
    }

    /// The reserved fall-through sentinel.
    pub fn fall_through() -> Self {
        Label(String::new())
    }

    pub fn is_fall_through(&self) -> bool {
        self.0.is_empty()
    }

    /// Synthetic labels start with `$` and are never user-assigned.
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with('$')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A diagnostic attached to DRP/CTR outcomes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: String,
    pub description: String,
}

impl Reason {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Reason {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.description.is_empty()
    }
}

/// A table name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(String);

impl TableId {
    pub fn new(name: impl Into<String>) -> Self {
        TableId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ─── Operators ─────────────────────────────────────────────────────

/// Arithmetic/bitwise operators for OP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
}

/// Comparison operators for BR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

// ─── Operand taxonomy ──────────────────────────────────────────────

/// A general source operand: a header field or an immediate value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Field(Field),
    Value(Value),
}

impl Operand {
    pub fn field(&self) -> Option<&Field> {
        match self {
            Operand::Field(f) => Some(f),
            Operand::Value(_) => None,
        }
    }
}

/// An offset into the packet bit-vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub offset: Operand,
}

impl Location {
    pub fn new(offset: Operand) -> Self {
        Location { offset }
    }
}

/// A payload-capable source: general operand or indirect packet location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LdSource {
    Field(Field),
    Value(Value),
    Location(Location),
}

// ─── Table declarations ────────────────────────────────────────────

/// Match discipline for a CAM column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    Binary,
    Ternary,
}

/// Physical table storage kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Cam,
    Ram,
    Hash,
}

/// A table's row layout. Field order is fixed at declaration; all positional
/// instruction operand lists must align with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableFields {
    /// Exact-valued columns (RAM/HASH storage).
    Simple(Vec<(Field, Size)>),
    /// Masked match columns (CAM storage).
    Match(Vec<(Field, Size, MatchKind)>),
}

impl TableFields {
    /// Number of columns in one row.
    pub fn arity(&self) -> usize {
        match self {
            TableFields::Simple(fields) => fields.len(),
            TableFields::Match(fields) => fields.len(),
        }
    }

    pub fn field_names(&self) -> Vec<&Field> {
        match self {
            TableFields::Simple(fields) => fields.iter().map(|(f, _)| f).collect(),
            TableFields::Match(fields) => fields.iter().map(|(f, _, _)| f).collect(),
        }
    }
}

/// One declared table: row layout, entry count, storage kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    pub fields: TableFields,
    pub entries: usize,
    pub kind: TableKind,
}

/// Table declarations, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decls {
    pub tables: Vec<(TableId, Table)>,
}

impl Decls {
    pub fn new() -> Self {
        Decls::default()
    }

    pub fn insert(&mut self, id: TableId, table: Table) {
        self.tables.push((id, table));
    }

    pub fn get(&self, id: &TableId) -> Option<&Table> {
        self.tables.iter().find(|(t, _)| t == id).map(|(_, t)| t)
    }

    pub fn ids(&self) -> Vec<TableId> {
        self.tables.iter().map(|(id, _)| id.clone()).collect()
    }
}

// ─── Instructions ──────────────────────────────────────────────────

/// Positional sources for STt: plain values for simple rows, value/mask
/// pairs for match rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteSources {
    Plain(Vec<Operand>),
    Masked(Vec<(Operand, Mask)>),
}

impl WriteSources {
    pub fn len(&self) -> usize {
        match self {
            WriteSources::Plain(ops) => ops.len(),
            WriteSources::Masked(ops) => ops.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The closed instruction set.
///
/// 23 variants in four groups:
///
/// - header/packet primitives: ID, DRP, CTR, ADD, RMV, LD, ST, OP, PUSH, POP
/// - control flow: BR, JMP, LBL, HLT
/// - table access: LDt, STt, INCt, LKt
/// - digests and composition: CRC, HSH, CNC, ATM, SEQ
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// No-op.
    Id,
    /// Mark the packet dropped and record a reason.
    Drp(Reason),
    /// Punt the packet to the controller and record a reason.
    Ctr(Reason),
    /// Make a field visible in the header with a zero value of the given size.
    Add(Field, Size),
    /// Remove a field from the header, reclaiming its capacity.
    Rmv(Field),
    /// Load a destination field from a field, an immediate, or the packet.
    Ld { dst: Field, src: LdSource },
    /// Store a source into the packet at a bit offset.
    St { loc: Location, src: Operand },
    /// Arithmetic/bitwise operation over two sources.
    Op {
        dst: Field,
        lhs: Operand,
        op: AluOp,
        rhs: Operand,
    },
    /// Insert the source's bits into the packet at an offset.
    Push { loc: Location, src: Operand },
    /// Read bits at an offset into a field and remove them from the packet.
    Pop { dst: Field, loc: Location },
    /// Conditional branch to a label.
    Br {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
        target: Label,
    },
    /// Unconditional jump to a label.
    Jmp(Label),
    /// Label marker; stripped by the CFG builder.
    Lbl(Label),
    /// Load a table row into destination fields, positionally.
    Ldt {
        dsts: Vec<Field>,
        table: TableId,
        index: Operand,
    },
    /// Store sources into a table row, positionally.
    Stt {
        table: TableId,
        index: Operand,
        srcs: WriteSources,
    },
    /// Increment every column of a table row (statistics counters).
    Inct { table: TableId, index: Operand },
    /// Look the sources up in a table; the destination receives the first
    /// matching row index, or −1 on a miss.
    Lkt {
        dst: Field,
        table: TableId,
        srcs: Vec<Operand>,
    },
    /// CRC-16 over the concatenated sources.
    Crc { dst: Field, srcs: Vec<Operand> },
    /// Digest over the concatenated sources.
    Hsh { dst: Field, srcs: Vec<Operand> },
    /// Halt; the unique exit of a code block.
    Hlt,
    /// Run the branch bodies concurrently; each writes back only what it is
    /// statically known to modify. Overlapping writes are a caller bug.
    Cnc(Vec<Code>),
    /// Run the body atomically: indivisible from the outer network's view.
    Atm(Box<Code>),
    /// Run the body as a nested pipeline that may hold several states while
    /// preserving per-state result order.
    Seq(Box<Code>),
}

/// Discriminant-only view of [`Instruction`], used for analysis exclude
/// lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrKind {
    Id,
    Drp,
    Ctr,
    Add,
    Rmv,
    Ld,
    St,
    Op,
    Push,
    Pop,
    Br,
    Jmp,
    Lbl,
    Ldt,
    Stt,
    Inct,
    Lkt,
    Crc,
    Hsh,
    Hlt,
    Cnc,
    Atm,
    Seq,
}

impl Instruction {
    pub fn kind(&self) -> InstrKind {
        match self {
            Instruction::Id => InstrKind::Id,
            Instruction::Drp(_) => InstrKind::Drp,
            Instruction::Ctr(_) => InstrKind::Ctr,
            Instruction::Add(_, _) => InstrKind::Add,
            Instruction::Rmv(_) => InstrKind::Rmv,
            Instruction::Ld { .. } => InstrKind::Ld,
            Instruction::St { .. } => InstrKind::St,
            Instruction::Op { .. } => InstrKind::Op,
            Instruction::Push { .. } => InstrKind::Push,
            Instruction::Pop { .. } => InstrKind::Pop,
            Instruction::Br { .. } => InstrKind::Br,
            Instruction::Jmp(_) => InstrKind::Jmp,
            Instruction::Lbl(_) => InstrKind::Lbl,
            Instruction::Ldt { .. } => InstrKind::Ldt,
            Instruction::Stt { .. } => InstrKind::Stt,
            Instruction::Inct { .. } => InstrKind::Inct,
            Instruction::Lkt { .. } => InstrKind::Lkt,
            Instruction::Crc { .. } => InstrKind::Crc,
            Instruction::Hsh { .. } => InstrKind::Hsh,
            Instruction::Hlt => InstrKind::Hlt,
            Instruction::Cnc(_) => InstrKind::Cnc,
            Instruction::Atm(_) => InstrKind::Atm,
            Instruction::Seq(_) => InstrKind::Seq,
        }
    }
}

// ─── Code and policy ───────────────────────────────────────────────

/// An instruction sequence plus the argument fields visible to it when it
/// executes as a nested scope. Fields outside this set (plus the reserved
/// fields) are invisible inside the scope.
#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    pub argument_fields: Vec<Field>,
    pub instructions: Vec<Instruction>,
}

impl Code {
    pub fn new(argument_fields: Vec<Field>, instructions: Vec<Instruction>) -> Self {
        Code {
            argument_fields,
            instructions,
        }
    }

    /// Index of the first LBL carrying `label`, if any.
    pub fn find_label(&self, label: &Label) -> Option<usize> {
        self.instructions.iter().position(|i| match i {
            Instruction::Lbl(l) => l == label,
            _ => false,
        })
    }
}

/// Table declarations plus the root program.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub decls: Decls,
    pub code: Code,
}

impl Policy {
    pub fn new(decls: Decls, code: Code) -> Self {
        Policy { decls, code }
    }
}
