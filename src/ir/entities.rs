//! Venom IR entity references.
//!
//! Functions own their blocks, blocks own their instructions, and every
//! cross-reference (CFG edges, def-use chains, liveness sets) goes through
//! one of the small handle types defined here instead of a pointer. Handles
//! are plain `u32` indices into the per-function arenas, so side tables can
//! be keyed by them and clones are free.

use cranelift_entity::entity_impl;

/// An opaque reference to a basic block in a [`Function`](super::Function).
///
/// A `Block` stays valid when the block is removed from the function body;
/// only the body order and label index forget about it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "bb");

/// An opaque reference to an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to an SSA variable.
///
/// Each `Var` stands for one `(name, version)` pair; the pair itself lives
/// in the function's variable arena. Before `make_ssa` has run, a variable
/// may be the output of more than one instruction; afterwards exactly one
/// instruction in the function defines it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(u32);
entity_impl!(Var, "var");
