//! Error types surfaced by the middle-end.
//!
//! Analyses and passes never swallow errors: an invariant violation becomes a
//! [`CompilerPanic`] that propagates straight to the pipeline driver, which
//! only attaches the name of the running pass before re-raising it as a
//! [`PassError`].

use crate::ir::Label;
use thiserror::Error;

/// An internal invariant was violated (missing terminator, analysis
/// divergence, unreachable phi edge, failed CFG normalization). Fatal;
/// aborts the compilation of the current context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("compiler panic: {0}")]
pub struct CompilerPanic(pub String);

impl CompilerPanic {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A [`CompilerPanic`] annotated with the pass and function it surfaced
/// from. Produced only by the pipeline driver.
#[derive(Debug, Error)]
#[error("in pass `{pass}` on function `{function}`: {source}")]
pub struct PassError {
    pub pass: &'static str,
    pub function: Label,
    #[source]
    pub source: CompilerPanic,
}

/// The memory allocator could not satisfy a request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("memory allocation of {size:#x} bytes failed")]
pub struct MemoryError {
    pub size: usize,
}

/// Raised by the downstream stack-machine emitter when it cannot realize the
/// stack layout an instruction requires. The driver may respond by demoting
/// the offending variable to memory and retrying; it is defined here so the
/// emitter and the driver agree on the type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot reach stack slot for `{operand}`")]
pub struct UnreachableStack {
    pub operand: String,
}

/// Shorthand for results that fail with a [`CompilerPanic`].
pub type PanicResult<T = ()> = Result<T, CompilerPanic>;
