//! Load elimination for the three mutable address spaces.
//!
//! Per block, left to right, track at most one `(address, value)` window
//! per address space: a store opens one, a load refreshes it, and any
//! instruction whose write effects cover the space closes it. A load whose
//! address is equivalent (by assign-chain equivalence) to the tracked
//! address forwards the tracked value instead of touching memory.

use crate::analysis::equivalent_vars::VarEquivalenceAnalysis;
use crate::analysis::mem_ssa::AddrSpace;
use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Opcode, Operand};
use crate::passes::InstUpdater;

const SPACES: [AddrSpace; 3] = [AddrSpace::Memory, AddrSpace::Storage, AddrSpace::Transient];

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let equivalence = {
        let dfg = cache.request_dfg(func);
        VarEquivalenceAnalysis::compute(func, dfg)
    };
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    for block in updater.func.block_ids() {
        process_block(&mut updater, &equivalence, block);
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::VarEquivalence);
    cache.invalidate(AnalysisKind::AvailableExpressions);
    cache.invalidate(AnalysisKind::MemSsa);
    Ok(())
}

fn process_block(
    updater: &mut InstUpdater,
    equivalence: &VarEquivalenceAnalysis,
    block: crate::ir::Block,
) {
    // (address, value) per space.
    let mut windows: [Option<(Operand, Operand)>; 3] = [None, None, None];

    for inst in updater.func.block_insts(block) {
        let opcode = updater.func.inst(inst).opcode;
        let writes = opcode.writes();
        for (i, space) in SPACES.iter().enumerate() {
            if writes.intersects(space.effect()) {
                windows[i] = None;
            }
        }

        for (i, space) in SPACES.iter().enumerate() {
            if opcode == space.store_opcode() {
                // Store operands are `[value, addr]`.
                let ops = &updater.func.inst(inst).operands;
                windows[i] = Some((ops[1].clone(), ops[0].clone()));
            } else if opcode == space.load_opcode() {
                let addr = updater.func.inst(inst).operands[0].clone();
                let output = updater.func.inst(inst).output;
                let prev = windows[i].take();
                windows[i] = output.map(|o| (addr.clone(), Operand::Var(o)));
                let Some((prev_addr, prev_value)) = prev else {
                    continue;
                };
                if !equivalence.equivalent(&addr, &prev_addr) {
                    continue;
                }
                updater.assign_to(inst, prev_value);
            }
        }
    }
}
