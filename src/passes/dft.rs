//! Data-flow-transform scheduling.
//!
//! Reorders each block so that the eventual stack scheduler sees producers
//! directly ahead of their consumers. A per-block dependency graph
//! combines data edges (operand producer before consumer), effect edges
//! (writers after the previous writer and readers of the same effect), and
//! terminator edges (every volatile instruction before the terminator).
//! Instructions are emitted depth-first from the terminator backwards;
//! ties prefer the child with the larger transitive-dependent count (deep
//! chains first) and bias `iszero` late so it can fuse with the branch.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Effects, Function, Inst, Opcode, Operand};

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    cache.request_dfg(func);

    for block in func.block_ids() {
        process_block(func, cache, block)?;
    }

    cache.invalidate(AnalysisKind::Dfg);
    cache.invalidate(AnalysisKind::Liveness);
    Ok(())
}

fn process_block(func: &mut Function, cache: &mut AnalysesCache, block: Block) -> PanicResult {
    let insts = func.block_insts(block);
    let pseudo: Vec<Inst> = insts
        .iter()
        .copied()
        .filter(|&i| func.inst(i).is_pseudo())
        .collect();
    let body: Vec<Inst> = insts
        .iter()
        .copied()
        .filter(|&i| !matches!(func.inst(i).opcode, Opcode::Phi))
        .collect();
    if body.is_empty() {
        return Ok(());
    }

    let deps = dependency_graph(func, cache, &body);

    // Transitive dependent counts, memoized.
    let mut offspring: FxHashMap<Inst, u64> = FxHashMap::default();
    {
        let mut visited = FxHashSet::default();
        for &inst in body.iter().rev() {
            count_offspring(func, &deps, inst, &mut offspring, &mut visited);
        }
    }

    let mut scheduled: Vec<Inst> = pseudo.clone();
    let mut visited: FxHashSet<Inst> = FxHashSet::default();
    for &inst in body.iter().rev() {
        emit(func, &deps, &offspring, inst, &mut scheduled, &mut visited);
    }

    // Dead instructions nothing depends on trail the terminator in the
    // depth-first emission; keep the terminator last.
    let term_pos = scheduled
        .iter()
        .position(|&i| func.inst(i).is_terminator())
        .ok_or_else(|| {
            CompilerPanic::new(format!(
                "block {} lost its terminator during scheduling",
                func.label_of(block)
            ))
        })?;
    let term = scheduled.remove(term_pos);
    scheduled.push(term);

    debug_assert_eq!(scheduled.len(), insts.len());
    func.set_block_insts(block, scheduled);
    Ok(())
}

/// `deps[i]` lists the instructions that must execute before `i`.
fn dependency_graph(
    func: &Function,
    cache: &mut AnalysesCache,
    body: &[Inst],
) -> FxHashMap<Inst, Vec<Inst>> {
    let dfg = cache.request_dfg(func);
    let mut deps: FxHashMap<Inst, Vec<Inst>> = body.iter().map(|&i| (i, Vec::new())).collect();
    let terminator = *body.last().expect("non-empty body");
    let block = func.inst(terminator).parent();

    let mut last_effects: FxHashMap<Effects, Inst> = FxHashMap::default();
    for &inst in body {
        let data = func.inst(inst);

        // Data edges: our output feeds same-block consumers.
        if let Some(out) = data.output {
            for &user in dfg.get_uses(out) {
                if func.inst(user).parent() == block && deps.contains_key(&user) {
                    deps.get_mut(&user).unwrap().push(inst);
                }
            }
        }

        if data.is_volatile() && inst != terminator {
            deps.get_mut(&terminator).unwrap().push(inst);
        }

        for write in data.opcode.writes().iter() {
            if let Some(&prev) = last_effects.get(&write) {
                if prev != inst {
                    deps.get_mut(&inst).unwrap().push(prev);
                }
            }
            last_effects.insert(write, inst);
        }
        for read in data.opcode.reads().iter() {
            if let Some(&prev) = last_effects.get(&read) {
                if prev != inst {
                    deps.get_mut(&inst).unwrap().push(prev);
                }
            }
        }
    }
    deps
}

fn count_offspring(
    func: &Function,
    deps: &FxHashMap<Inst, Vec<Inst>>,
    inst: Inst,
    offspring: &mut FxHashMap<Inst, u64>,
    visited: &mut FxHashSet<Inst>,
) {
    if !visited.insert(inst) {
        return;
    }
    offspring.insert(inst, 1);
    let children = deps.get(&inst).cloned().unwrap_or_default();
    for child in children {
        count_offspring(func, deps, child, offspring, visited);
        let add = offspring.get(&child).copied().unwrap_or(0);
        *offspring.get_mut(&inst).unwrap() += add;
    }
}

fn emit(
    func: &Function,
    deps: &FxHashMap<Inst, Vec<Inst>>,
    offspring: &FxHashMap<Inst, u64>,
    inst: Inst,
    scheduled: &mut Vec<Inst>,
    visited: &mut FxHashSet<Inst>,
) {
    if !visited.insert(inst) {
        return;
    }
    if func.inst(inst).is_pseudo() {
        return; // already pinned at the block head
    }

    let mut children = deps.get(&inst).cloned().unwrap_or_default();
    children.sort_by_key(|&child| {
        let bias = if func.inst(child).opcode == Opcode::Iszero {
            10
        } else {
            0
        };
        let operand_index = func
            .inst(child)
            .output
            .and_then(|out| {
                func.inst(inst)
                    .operands
                    .iter()
                    .position(|op| *op == Operand::Var(out))
            })
            .unwrap_or(0);
        (
            -(offspring.get(&child).copied().unwrap_or(0) as i64) + bias,
            operand_index,
        )
    });

    for child in children {
        emit(func, deps, offspring, child, scheduled, visited);
    }
    scheduled.push(inst);
}
