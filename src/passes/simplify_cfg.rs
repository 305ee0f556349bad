//! CFG simplification: drop unreachable blocks (fixing up phis that named
//! them) and merge straight-line chains — a block with a single successor
//! whose successor has it as its single predecessor absorbs that
//! successor, provided the successor carries no phis.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::FxHashMap;
use crate::ir::{Function, Label, Opcode, OperandList};

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let mut rounds = 2 * func.num_basic_blocks() + 2;
    loop {
        let changed = run_once(func, cache)?;
        if !changed {
            break;
        }
        if rounds == 0 {
            return Err(CompilerPanic::new("CFG simplification failed to converge"));
        }
        rounds -= 1;
    }
    Ok(())
}

fn run_once(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult<bool> {
    let cfg = cache.force_cfg(func)?;

    // Unreachable blocks first; their edges must not keep merges from
    // firing or phi operands alive.
    let dead: Vec<_> = func
        .block_ids()
        .into_iter()
        .filter(|&b| !cfg.is_reachable(b))
        .collect();

    // Drop phi arms coming in over removed edges: a predecessor that no
    // longer branches to us (constant-folded jnz) as well as removed
    // blocks.
    let mut reduced = false;
    for block in func.block_ids() {
        if !cfg.is_reachable(block) {
            continue;
        }
        let preds: Vec<Label> = cfg
            .cfg_in(block)
            .iter()
            .map(|&p| func.label_of(p).clone())
            .collect();
        for inst in func.block_insts(block) {
            if func.inst(inst).opcode != Opcode::Phi {
                break;
            }
            let keep: OperandList = func
                .inst(inst)
                .operands
                .chunks(2)
                .filter(|pair| {
                    let label = pair[0].as_label().expect("phi operand: label expected");
                    preds.contains(label)
                })
                .flat_map(|pair| pair.iter().cloned())
                .collect();
            if keep.len() != func.inst(inst).operands.len() {
                func.reduce_phi(inst, keep);
                reduced = true;
            }
        }
    }

    let removed = func.remove_blocks(&dead) > 0;
    if removed || reduced {
        cache.invalidate(AnalysisKind::Cfg);
        cache.invalidate(AnalysisKind::Dfg);
        return Ok(true);
    }

    let merged = merge_chains(func, cache)?;
    Ok(merged)
}

fn merge_chains(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult<bool> {
    let cfg = cache.request_cfg(func)?;
    let mut merge = None;
    'outer: for block in func.basic_blocks() {
        if !cfg.is_reachable(block) {
            continue;
        }
        let succs = cfg.cfg_out(block);
        if succs.len() != 1 {
            continue;
        }
        let next = *succs.first().unwrap();
        if next == block || next == func.entry() || cfg.cfg_in(next).len() != 1 {
            continue;
        }
        for &inst in func.block(next).insts() {
            if func.inst(inst).opcode == Opcode::Phi {
                continue 'outer;
            }
            break;
        }
        merge = Some((block, next));
        break;
    }

    let Some((block, next)) = merge else {
        return Ok(false);
    };

    // Drop the jump, then splice the successor's instructions in.
    let term = func.terminator(block).expect("merged block has a terminator");
    func.detach_inst(term);
    let moved = func.block_insts(next);
    for inst in moved {
        func.detach_inst(inst);
        let index = func.block(block).len();
        func.attach_inst(block, index, inst);
    }
    let merged_label = func.label_of(next).clone();
    let into_label = func.label_of(block).clone();
    func.remove_basic_block(next);

    // Phis downstream still name the merged block.
    let mapping: FxHashMap<Label, Label> =
        FxHashMap::from_iter([(merged_label, into_label)]);
    for other in func.block_ids() {
        for inst in func.block_insts(other) {
            if func.inst(inst).opcode != Opcode::Phi {
                break;
            }
            func.inst_mut(inst).replace_label_operands(&mapping);
        }
    }

    cache.invalidate(AnalysisKind::Cfg);
    cache.invalidate(AnalysisKind::Dfg);
    Ok(true)
}
