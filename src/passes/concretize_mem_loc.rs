//! Assign concrete scratch-memory addresses to size-only allocas.
//!
//! An alloca carrying just a size has not been placed yet; the context's
//! first-fit allocator picks its address (requests rounded up to a word)
//! and the instruction collapses into an assignment of the literal, which
//! SCCP then folds into the users.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::ir::{Context, Function, Opcode, Operand};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache, ctx: &mut Context) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    let mut changed = false;

    for block in updater.func.block_ids() {
        for inst in updater.func.block_insts(block) {
            let data = updater.func.inst(inst);
            if !matches!(
                data.opcode,
                Opcode::Alloca | Opcode::Palloca | Opcode::Calloca
            ) {
                continue;
            }
            if data.operands.len() != 1 {
                continue; // already placed
            }
            let Some(size) = data.operands[0].as_lit().and_then(|l| l.to_usize()) else {
                return Err(CompilerPanic::new(format!(
                    "alloca with non-literal size: {}",
                    updater.func.display_inst(inst)
                )));
            };
            let rounded = size.div_ceil(32) * 32;
            let address = ctx
                .mem_allocator
                .allocate(rounded)
                .map_err(|e| CompilerPanic::new(e.to_string()))?;
            updater.assign_to(inst, Operand::lit(address as u64));
            changed = true;
        }
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    if changed {
        cache.invalidate(AnalysisKind::Liveness);
        cache.invalidate(AnalysisKind::VarEquivalence);
    }
    Ok(())
}
