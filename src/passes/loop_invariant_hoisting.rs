//! Loop-invariant hoisting: instructions that are neither volatile, nor
//! terminators, nor CFG-altering, and whose inputs are all defined outside
//! the loop, move to the block immediately before the loop header, in
//! order, ahead of its terminator. Iterates until nothing is hoistable so
//! chains of invariants leave the loop together.

use crate::analysis::{AnalysesCache, AnalysisKind, LoopDetectionAnalysis};
use crate::errors::PanicResult;
use crate::ir::{Block, Function, Inst};

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    cache.request_cfg(func)?;
    let loops: Vec<(Block, Vec<Block>)> = {
        let analysis: &LoopDetectionAnalysis = cache.request_loops(func)?;
        analysis
            .loops
            .iter()
            .map(|(&before, blocks)| (before, blocks.clone()))
            .collect()
    };

    loop {
        let mut hoisted = false;
        for (before, loop_blocks) in &loops {
            let candidates = hoistable(func, cache, loop_blocks);
            if candidates.is_empty() {
                continue;
            }
            hoisted = true;
            for inst in candidates {
                func.detach_inst(inst);
                let index = func.block(*before).len() - 1;
                func.attach_inst(*before, index, inst);
            }
        }
        if !hoisted {
            break;
        }
        cache.invalidate(AnalysisKind::Liveness);
    }
    Ok(())
}

fn hoistable(func: &Function, cache: &mut AnalysesCache, loop_blocks: &[Block]) -> Vec<Inst> {
    let dfg = cache.request_dfg(func);
    let mut result = Vec::new();
    for &block in loop_blocks {
        for &inst in func.block(block).insts() {
            let data = func.inst(inst);
            let opcode = data.opcode;
            if opcode.is_volatile() || opcode.is_terminator() || opcode.is_cfg_altering() {
                continue;
            }
            if opcode.is_pseudo() {
                continue;
            }
            let defined_inside = data.input_vars().any(|var| {
                dfg.get_producing_instruction(var)
                    .and_then(|src| func.inst(src).parent())
                    .is_some_and(|src_block| loop_blocks.contains(&src_block))
            });
            if !defined_inside {
                result.push(inst);
            }
        }
    }
    result
}
