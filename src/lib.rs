//! Venom IR middle-end.
//!
//! This crate lowers nothing and emits nothing: it is the middle of a
//! smart-contract compiler. It owns the SSA-form Venom intermediate
//! representation ([`ir`]), a cache of interdependent analyses
//! ([`analysis`]), a library of transformation passes ([`passes`]), and
//! the pass manager that sequences them per optimization level
//! ([`pass_manager`]).
//!
//! The front-end hands over a [`ir::Context`] whose blocks all end in
//! terminators; [`pass_manager::run_passes`] leaves behind a normalized,
//! single-use-expanded IR for the stack-machine emitter.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod analysis;
pub mod errors;
pub(crate) mod fx;
pub mod ir;
pub mod mem_allocator;
pub mod pass_manager;
pub mod passes;

pub use crate::errors::{CompilerPanic, MemoryError, PassError, UnreachableStack};
pub use crate::pass_manager::{run_passes, OptLevel, PipelineOptions};
