//! Branch optimization: `jnz c, a, a` collapses to `jmp a`, constant
//! conditions take their side unconditionally, and a condition that is a
//! single-use `iszero` inverts into a swapped-target `jnz` so the extra
//! negation dies.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Opcode, Operand};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    let mut changed = false;

    for block in updater.func.block_ids() {
        let Some(term) = updater.func.terminator(block) else {
            continue;
        };
        if updater.func.inst(term).opcode != Opcode::Jnz {
            continue;
        }
        let ops = updater.func.inst(term).operands.clone();
        let (cond, then_label, else_label) = (ops[0].clone(), ops[1].clone(), ops[2].clone());

        if then_label == else_label {
            updater.update(term, Opcode::Jmp, [then_label]);
            changed = true;
            continue;
        }

        if let Some(k) = cond.as_lit() {
            let taken = if k.is_zero() { else_label } else { then_label };
            updater.update(term, Opcode::Jmp, [taken]);
            changed = true;
            continue;
        }

        // Invert through a single-use iszero.
        if let Some(cond_var) = cond.as_var() {
            if updater.dfg().get_uses(cond_var).len() != 1 {
                continue;
            }
            let Some(producer) = updater.dfg().get_producing_instruction(cond_var) else {
                continue;
            };
            if updater.func.inst(producer).opcode != Opcode::Iszero {
                continue;
            }
            let inner = updater.func.inst(producer).operands[0].clone();
            if matches!(inner, Operand::Label(_)) {
                continue;
            }
            updater.update(term, Opcode::Jnz, [inner, else_label, then_label]);
            changed = true;
        }
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    if changed {
        cache.invalidate(AnalysisKind::Cfg);
        cache.invalidate(AnalysisKind::Liveness);
    }
    Ok(())
}
