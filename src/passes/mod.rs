//! Transformation passes.
//!
//! Passes are free functions over `(&mut Function, &mut AnalysesCache)`
//! (context-wide passes take `&mut Context`); each requests the analyses
//! it needs, mutates through [`InstUpdater`], and invalidates what it
//! touched. The pass manager sequences them per optimization level.

pub mod algebraic;
pub mod assign_elimination;
pub mod branch_optimization;
pub mod cfg_normalization;
pub mod concretize_mem_loc;
pub mod cse;
pub mod dead_store_elimination;
pub mod dft;
pub mod float_allocas;
pub mod func_inliner;
pub mod inst_updater;
pub mod literals_codesize;
pub mod load_elimination;
pub mod loop_invariant_hoisting;
pub mod lower_dload;
pub mod make_ssa;
pub mod mem2var;
pub mod memmerging;
pub mod phi_elimination;
pub mod remove_unused_variables;
pub mod revert_to_assert;
pub mod sccp;
pub mod simplify_cfg;
pub mod single_use_expansion;

pub use self::inst_updater::InstUpdater;
pub use self::sccp::SccpOptions;
