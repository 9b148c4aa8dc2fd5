//! Low-level intermediate representation of the loess compiler back-end.
//!
//! The lir is a single straight-line block of mutating tensor instructions
//! over named memory locations: externally visible weights and scratch
//! activations bounded by alloc/dealloc pairs.

pub mod builder;
pub mod lir_nodes;
pub mod module;
pub mod opt;
pub mod types;
pub mod value;
mod verifier;

pub use builder::ModuleBuilder;
pub use lir_nodes::{Inst, OperandKind};
pub use module::{InstId, Module};
pub use opt::optimize;
pub use types::{ElemKind, Type};
pub use value::{Mutability, Use, Value, ValueId, ValueKind};
pub use verifier::VerifyError;
