//! loess: a small neural-network compiler back-end.
//!
//! The interesting part lives in [`loess_lir`]: the low-level tensor IR and
//! its optimization pipeline. This crate wires the pieces together into a
//! driver.

pub mod demo;

pub use loess_common::{CompilationMode, Config};
pub use loess_lir::{optimize, Module, ModuleBuilder};
