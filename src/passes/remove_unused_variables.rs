//! Remove instructions whose outputs are dead.
//!
//! Iterates to a fixed point: an instruction with an output, no volatile
//! behavior, and an output absent from the next instruction's live set is
//! dropped; `nop` instructions are always dropped. Removing one
//! instruction can kill the inputs of another, hence the loop.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::ir::{Function, Opcode};

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let mut rounds = func.num_vars() + 2;
    loop {
        let removed = run_once(func, cache)?;
        if removed == 0 {
            break;
        }
        cache.invalidate(AnalysisKind::Dfg);
        cache.invalidate(AnalysisKind::Liveness);
        if rounds == 0 {
            return Err(CompilerPanic::new(
                "unused-variable removal failed to converge",
            ));
        }
        rounds -= 1;
    }
    Ok(())
}

fn run_once(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult<usize> {
    cache.request_liveness(func)?;

    let mut remove = Vec::new();
    for block in func.block_ids() {
        let insts = func.block_insts(block);
        // The terminator is never a candidate.
        for (i, &inst) in insts.iter().enumerate().take(insts.len().saturating_sub(1)) {
            let data = func.inst(inst);
            if data.opcode == Opcode::Nop {
                remove.push(inst);
                continue;
            }
            if data.is_volatile() {
                continue;
            }
            let Some(out) = data.output else { continue };
            let liveness = cache.request_liveness(func)?;
            if !liveness.live_before(insts[i + 1]).contains(&out) {
                remove.push(inst);
            }
        }
    }

    for &inst in &remove {
        func.detach_inst(inst);
    }
    Ok(remove.len())
}
