//! Common subexpression elimination over the available-expression
//! analysis.
//!
//! A redundant instruction is replaced with an assignment of an earlier
//! equivalent's output when that earlier instruction dominates it, or sits
//! earlier in the same block with no killing effect in between (which is
//! exactly what availability at the instruction's position encodes).
//! Small expressions are only replaced within their own block: a
//! cross-block forwarding of a one-deep expression tends to cost more
//! codesize than recomputing it.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Inst, Opcode, Operand};
use crate::passes::InstUpdater;

/// Expressions at or below this depth stay block-local. Tunable; the
/// historical value is 1.
pub const SMALL_EXPRESSION: u32 = 1;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    loop {
        let replacements = find_replaceable(func, cache)?;
        if replacements.is_empty() {
            return Ok(());
        }

        let dfg = cache.take_dfg(func);
        let mut updater = InstUpdater::new(func, dfg);
        for (inst, replacement) in replacements {
            let source = updater
                .func
                .inst(replacement)
                .output
                .expect("replacement instruction has an output");
            updater.assign_to(inst, Operand::Var(source));
        }
        let dfg = updater.finish();
        cache.put_dfg(dfg);

        cache.invalidate(AnalysisKind::Dfg);
        cache.invalidate(AnalysisKind::Liveness);
        cache.invalidate(AnalysisKind::AvailableExpressions);
    }
}

fn find_replaceable(
    func: &Function,
    cache: &mut AnalysesCache,
) -> PanicResult<Vec<(Inst, Inst)>> {
    cache.request_available_expressions(func)?;
    cache.request_domtree(func)?;
    let avail = cache.available_expressions().expect("requested above");
    let domtree = cache.domtree().expect("requested above");

    let mut result = Vec::new();
    let mut claimed: Vec<Inst> = Vec::new();
    for block in func.basic_blocks() {
        for &inst in func.block(block).insts() {
            let opcode = func.inst(inst).opcode;
            if opcode == Opcode::Offset || opcode.is_nonidempotent() || opcode.is_uninteresting_for_cse()
            {
                continue;
            }
            let Some(expr) = avail.expression(inst) else {
                continue;
            };
            let Some(candidates) = avail.available_at(inst) else {
                continue;
            };
            let position = func.position_in_block(inst);

            let depth = avail.depth(expr);
            let mut chosen = None;
            for &candidate in candidates {
                if candidate == inst || claimed.contains(&candidate) {
                    continue;
                }
                let candidate_block = func
                    .inst(candidate)
                    .parent()
                    .expect("candidate instruction in a block");
                let same_block = candidate_block == block
                    && func.position_in_block(candidate) < position;
                if depth <= SMALL_EXPRESSION {
                    if same_block {
                        chosen = Some(candidate);
                        break;
                    }
                    continue;
                }
                if same_block || (candidate_block != block && domtree.dominates(candidate_block, block)) {
                    chosen = Some(candidate);
                    break;
                }
            }
            if let Some(replacement) = chosen {
                // An instruction rewritten this round must not serve as a
                // replacement source for a later one.
                claimed.push(inst);
                result.push((inst, replacement));
            }
        }
    }
    Ok(result)
}
