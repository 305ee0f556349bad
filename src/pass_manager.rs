//! The pipeline driver: optimization-level presets and pass sequencing.
//!
//! The pass lists are ground truth — their ordering is part of the
//! contract with the stack emitter. Every level ends with single-use
//! expansion, DFT scheduling, and CFG normalization, which establish the
//! shape the emitter requires.

use crate::analysis::mem_ssa::AddrSpace;
use crate::analysis::AnalysesCache;
use crate::errors::{CompilerPanic, PassError};
use crate::ir::{Context, Function};
use crate::passes;
use crate::passes::SccpOptions;

/// Optimization levels.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum OptLevel {
    O0,
    O1,
    /// The default level.
    #[default]
    O2,
    O3,
    /// Optimize for codesize.
    Os,
}

/// One scheduled pass with its options.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pass {
    FloatAllocas,
    SimplifyCfg,
    MakeSsa,
    PhiElimination,
    Sccp { remove_allocas: bool },
    AssignElimination,
    Algebraic,
    Mem2Var,
    LoadElimination,
    RevertToAssert,
    MemMerge,
    RemoveUnusedVariables,
    DeadStoreElimination(AddrSpace),
    LowerDload,
    BranchOptimization,
    Cse,
    LoopInvariantHoisting,
    ConcretizeMemLoc,
    ReduceLiteralsCodesize,
    SingleUseExpansion,
    Dft,
    CfgNormalization,
}

impl Pass {
    pub fn name(self) -> &'static str {
        match self {
            Pass::FloatAllocas => "float_allocas",
            Pass::SimplifyCfg => "simplify_cfg",
            Pass::MakeSsa => "make_ssa",
            Pass::PhiElimination => "phi_elimination",
            Pass::Sccp { .. } => "sccp",
            Pass::AssignElimination => "assign_elimination",
            Pass::Algebraic => "algebraic_optimization",
            Pass::Mem2Var => "mem2var",
            Pass::LoadElimination => "load_elimination",
            Pass::RevertToAssert => "revert_to_assert",
            Pass::MemMerge => "memmerging",
            Pass::RemoveUnusedVariables => "remove_unused_variables",
            Pass::DeadStoreElimination(_) => "dead_store_elimination",
            Pass::LowerDload => "lower_dload",
            Pass::BranchOptimization => "branch_optimization",
            Pass::Cse => "common_subexpression_elimination",
            Pass::LoopInvariantHoisting => "loop_invariant_hoisting",
            Pass::ConcretizeMemLoc => "concretize_mem_loc",
            Pass::ReduceLiteralsCodesize => "literals_codesize",
            Pass::SingleUseExpansion => "single_use_expansion",
            Pass::Dft => "dft",
            Pass::CfgNormalization => "cfg_normalization",
        }
    }

    fn run(
        self,
        func: &mut Function,
        cache: &mut AnalysesCache,
        ctx: &mut Context,
    ) -> Result<(), CompilerPanic> {
        match self {
            Pass::FloatAllocas => passes::float_allocas::run(func, cache),
            Pass::SimplifyCfg => passes::simplify_cfg::run(func, cache),
            Pass::MakeSsa => passes::make_ssa::run(func, cache),
            Pass::PhiElimination => passes::phi_elimination::run(func, cache),
            Pass::Sccp { remove_allocas } => {
                passes::sccp::run(func, cache, SccpOptions { remove_allocas })
            }
            Pass::AssignElimination => passes::assign_elimination::run(func, cache),
            Pass::Algebraic => passes::algebraic::run(func, cache),
            Pass::Mem2Var => passes::mem2var::run(func, cache),
            Pass::LoadElimination => passes::load_elimination::run(func, cache),
            Pass::RevertToAssert => passes::revert_to_assert::run(func, cache),
            Pass::MemMerge => passes::memmerging::run(func, cache),
            Pass::RemoveUnusedVariables => passes::remove_unused_variables::run(func, cache),
            Pass::DeadStoreElimination(space) => {
                passes::dead_store_elimination::run(func, cache, space)
            }
            Pass::LowerDload => passes::lower_dload::run(func, cache),
            Pass::BranchOptimization => passes::branch_optimization::run(func, cache),
            Pass::Cse => passes::cse::run(func, cache),
            Pass::LoopInvariantHoisting => passes::loop_invariant_hoisting::run(func, cache),
            Pass::ConcretizeMemLoc => passes::concretize_mem_loc::run(func, cache, ctx),
            Pass::ReduceLiteralsCodesize => passes::literals_codesize::run(func, cache),
            Pass::SingleUseExpansion => passes::single_use_expansion::run(func, cache),
            Pass::Dft => passes::dft::run(func, cache),
            Pass::CfgNormalization => passes::cfg_normalization::run(func, cache, ctx),
        }
    }
}

/// The ordered pass list of one optimization level.
pub fn passes_for(level: OptLevel) -> Vec<Pass> {
    use Pass::*;
    match level {
        OptLevel::O0 => vec![
            FloatAllocas,
            SimplifyCfg,
            MakeSsa,
            Sccp { remove_allocas: true },
            AssignElimination,
            RevertToAssert,
            SimplifyCfg,
            LowerDload,
            SingleUseExpansion,
            Dft,
            CfgNormalization,
        ],
        OptLevel::O1 => {
            let mut list = common_prefix(false);
            list.extend(common_suffix(false));
            list
        }
        OptLevel::O2 => {
            let mut list = common_prefix(true);
            list.extend(common_suffix(true));
            list
        }
        OptLevel::O3 => {
            let mut list = common_prefix(true);
            list.push(LoopInvariantHoisting);
            list.extend(common_suffix(true));
            list
        }
        OptLevel::Os => {
            let mut list = common_prefix(true);
            list.extend([
                RemoveUnusedVariables,
                DeadStoreElimination(AddrSpace::Memory),
                DeadStoreElimination(AddrSpace::Storage),
                DeadStoreElimination(AddrSpace::Transient),
                AssignElimination,
                RemoveUnusedVariables,
                ConcretizeMemLoc,
                Sccp { remove_allocas: true },
                SimplifyCfg,
                // memmerge must see the loads before dload lowering
                // rewrites them.
                MemMerge,
                LowerDload,
                RemoveUnusedVariables,
                BranchOptimization,
                Algebraic,
                RemoveUnusedVariables,
                PhiElimination,
                AssignElimination,
                Cse,
                AssignElimination,
                RemoveUnusedVariables,
                SingleUseExpansion,
                ReduceLiteralsCodesize,
                Dft,
                CfgNormalization,
            ]);
            list
        }
    }
}

/// The shared opening rounds: repeated SSA/SCCP/simplify cycles, memory
/// promotion on the optimizing levels, and the store-level cleanups.
fn common_prefix(mem_opts: bool) -> Vec<Pass> {
    use Pass::*;
    let mut list = vec![
        FloatAllocas,
        SimplifyCfg,
        MakeSsa,
        PhiElimination,
        Algebraic,
        Sccp { remove_allocas: false },
        SimplifyCfg,
        AssignElimination,
    ];
    if mem_opts {
        list.push(Mem2Var);
        list.push(MakeSsa);
        list.push(PhiElimination);
    } else {
        list.push(MakeSsa);
        list.push(PhiElimination);
    }
    list.extend([
        Sccp { remove_allocas: true },
        SimplifyCfg,
        AssignElimination,
        Algebraic,
    ]);
    if mem_opts {
        list.extend([LoadElimination, PhiElimination, AssignElimination]);
    }
    list.extend([
        Sccp { remove_allocas: true },
        AssignElimination,
        RevertToAssert,
        SimplifyCfg,
    ]);
    list
}

/// The shared closing rounds: store cleanups, branch folding, the
/// emitter-shape passes.
fn common_suffix(mem_opts: bool) -> Vec<Pass> {
    use Pass::*;
    let mut list = vec![
        MemMerge,
        RemoveUnusedVariables,
        DeadStoreElimination(AddrSpace::Memory),
        DeadStoreElimination(AddrSpace::Storage),
        DeadStoreElimination(AddrSpace::Transient),
        LowerDload,
        BranchOptimization,
        Algebraic,
        RemoveUnusedVariables,
        PhiElimination,
        AssignElimination,
    ];
    if mem_opts {
        list.extend([Cse, AssignElimination]);
    }
    list.extend([
        RemoveUnusedVariables,
        SingleUseExpansion,
        Dft,
        CfgNormalization,
    ]);
    list
}

/// Options for the top-level driver.
#[derive(Copy, Clone, Debug, Default)]
pub struct PipelineOptions {
    pub level: OptLevel,
    /// Run the global function inliner ahead of the per-function
    /// pipeline.
    pub inline: bool,
}

/// Run the full pipeline over every function of the context.
///
/// Each function gets a private analyses cache. A [`CompilerPanic`]
/// surfacing from a pass is wrapped with the pass and function name and
/// aborts the run.
pub fn run_passes(ctx: &mut Context, options: PipelineOptions) -> Result<(), PassError> {
    if options.inline {
        // The inliner is the only cross-function pass; it runs serially
        // before anything else.
        passes::func_inliner::run(ctx).map_err(|panic| PassError {
            pass: "func_inliner",
            function: ctx
                .entry_function()
                .cloned()
                .unwrap_or_else(|| crate::ir::Label::new("<context>")),
            source: panic,
        })?;
    }

    let pass_list = passes_for(options.level);
    for label in ctx.function_labels() {
        let Some(mut func) = ctx.take_function(&label) else {
            continue;
        };
        let mut cache = AnalysesCache::new();
        for pass in &pass_list {
            log::trace!("running {} on {}", pass.name(), label);
            if let Err(panic) = pass.run(&mut func, &mut cache, ctx) {
                ctx.put_function(func);
                return Err(PassError {
                    pass: pass.name(),
                    function: label,
                    source: panic,
                });
            }
        }
        ctx.put_function(func);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_ends_with_the_emitter_shape() {
        for level in [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3, OptLevel::Os] {
            let list = passes_for(level);
            let n = list.len();
            assert_eq!(list[0], Pass::FloatAllocas);
            assert_eq!(list[n - 2], Pass::Dft);
            assert_eq!(list[n - 1], Pass::CfgNormalization);
            let expansion = list
                .iter()
                .position(|&p| p == Pass::SingleUseExpansion)
                .expect("single-use expansion scheduled");
            assert!(expansion < n - 2);
        }
    }

    #[test]
    fn o2_adds_memory_passes_over_o1() {
        let o1 = passes_for(OptLevel::O1);
        let o2 = passes_for(OptLevel::O2);
        assert!(!o1.contains(&Pass::Mem2Var));
        assert!(!o1.contains(&Pass::Cse));
        assert!(o2.contains(&Pass::Mem2Var));
        assert!(o2.contains(&Pass::LoadElimination));
        assert!(o2.contains(&Pass::Cse));
        assert!(passes_for(OptLevel::O3).contains(&Pass::LoopInvariantHoisting));
        assert!(passes_for(OptLevel::Os).contains(&Pass::ReduceLiteralsCodesize));
        assert!(passes_for(OptLevel::Os).contains(&Pass::ConcretizeMemLoc));
    }

    #[test]
    fn dead_stores_are_swept_per_address_space() {
        let o2 = passes_for(OptLevel::O2);
        for space in [AddrSpace::Memory, AddrSpace::Storage, AddrSpace::Transient] {
            assert!(o2.contains(&Pass::DeadStoreElimination(space)));
        }
    }
}
