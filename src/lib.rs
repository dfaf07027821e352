//! flowasm — a network assembly language for programmable dataplanes.
//!
//! A policy is a set of table declarations plus one program over a per-packet
//! header/payload state machine. The crate covers the compiler core and the
//! execution engines:
//!
//! - [`ir`] — the instruction set, operand taxonomy, table declarations, and
//!   structural validation.
//! - [`cfg`] — basic-block slicing and control-flow-graph construction.
//! - [`analysis`] — the iterative dataflow solver and its four instantiations
//!   (reaching definitions, field reachability, liveness, field usability).
//! - [`optimize`] — code motion and dead/redundant code elimination, composed
//!   into one pipeline that recurses into nested sub-programs.
//! - [`cost`] — static area/latency estimation for hardware-resource sizing.
//! - [`runtime`] — the per-packet Header/Packet/State model and the table
//!   row storage shared by both engines.
//! - [`engine`] — two interchangeable execution strategies behind one trait:
//!   a sequential interpreter and a pipelined actor network.
//!
//! The textual front-end and the switch/controller integration are external
//! collaborators: they hand a well-formed [`ir::Policy`] to an engine and
//! exchange per-packet [`runtime::State`] values and table CRUD calls with it.

pub mod analysis;
pub mod cfg;
pub mod cost;
pub mod engine;
pub mod error;
pub mod ir;
pub mod optimize;
pub mod runtime;

// Re-exports — the surface an embedding bridge actually touches.
pub use cost::{cost_policy, CostEstimate};
pub use engine::{Engine, PipelineEngine, SequentialEngine};
pub use error::{EngineError, PolicyError, RuntimeError, RuntimeFault};
pub use ir::Policy;
pub use optimize::optimize_policy;
pub use runtime::{Header, Packet, State, TableEntry};
