//! Dead-store elimination, parameterized by address space.
//!
//! Backed by memory SSA: a store is dead when no memory use anywhere has
//! it as a reaching definition *and* a later store in the same block
//! writes exactly the same literal address (pointer equality, not
//! may-alias). Dead stores become nops; the unused-variable sweep deletes
//! them.

use crate::analysis::mem_ssa::AddrSpace;
use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Inst};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache, space: AddrSpace) -> PanicResult {
    let dead: Vec<Inst> = {
        let mem_ssa = cache.request_mem_ssa(func, space)?;
        let mut dead = Vec::new();
        for block in func.basic_blocks() {
            let defs = mem_ssa.defs(block);
            for (i, def) in defs.iter().enumerate() {
                // Only plain stores with literal addresses are candidates;
                // calls and copies clobber more than one slot.
                let Some(addr) = mem_ssa.store_address(func, def.inst) else {
                    continue;
                };
                if mem_ssa.is_reached_by_use(def) {
                    continue;
                }
                let overwritten = defs[i + 1..].iter().any(|later| {
                    mem_ssa.store_address(func, later.inst) == Some(addr)
                });
                if overwritten {
                    dead.push(def.inst);
                }
            }
        }
        dead
    };
    if dead.is_empty() {
        return Ok(());
    }

    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    for inst in dead {
        updater.nop(inst);
    }
    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::MemSsa);
    Ok(())
}
