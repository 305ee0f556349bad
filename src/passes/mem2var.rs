//! Memory-to-variable promotion.
//!
//! An `alloca` (or `palloca`) whose pointer is consumed only as the
//! address of plain `mload`/`mstore` instructions never escapes: each
//! store becomes an assignment to one shared scalar name and each load an
//! assignment from it. The rewrite deliberately reintroduces pre-SSA name
//! reuse — the MakeSSA run scheduled right after this pass rebuilds phi
//! nodes over the new name.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Inst, Opcode, Operand, Var};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    cache.request_cfg(func)?;
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    let allocas: Vec<(Var, Inst)> = updater
        .dfg()
        .outputs()
        .filter(|&(_, inst)| {
            matches!(
                updater.func.inst(inst).opcode,
                Opcode::Alloca | Opcode::Palloca
            )
        })
        .collect();
    let mut count = 0usize;
    for (ptr, alloca) in allocas {
        promote(&mut updater, ptr, alloca, &mut count);
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Dfg);
    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::MemSsa);
    Ok(())
}

fn promote(updater: &mut InstUpdater, ptr: Var, alloca: Inst, count: &mut usize) {
    let uses: Vec<Inst> = updater.dfg().get_uses(ptr).to_vec();
    if uses.is_empty() {
        return;
    }
    let mut has_store = false;
    for &user in &uses {
        let data = updater.func.inst(user);
        let escapes = match data.opcode {
            // `mload [addr]`.
            Opcode::Mload => data.operands[0] != Operand::Var(ptr),
            // `mstore [value, addr]`: the pointer must be the address,
            // not the stored value.
            Opcode::Mstore => {
                has_store = true;
                data.operands[1] != Operand::Var(ptr) || data.operands[0] == Operand::Var(ptr)
            }
            _ => true,
        };
        if escapes {
            return;
        }
    }

    // A palloca's parameter init store must be present: without it the
    // loads observe zero-initialized memory, and a scalar rewrite would
    // leave them reading a name nothing ever assigns.
    if updater.func.inst(alloca).opcode == Opcode::Palloca && !has_store {
        return;
    }

    let name = format!("alloca_{}_{}", count, ptr_display(updater.func, ptr));
    *count += 1;
    let scalar = updater.func.named_variable(&name);

    for user in uses {
        let opcode = updater.func.inst(user).opcode;
        match opcode {
            Opcode::Mstore => {
                let value = updater.func.inst(user).operands[0].clone();
                updater.update_with_output(user, Opcode::Assign, [value], Some(scalar));
            }
            Opcode::Mload => {
                updater.update(user, Opcode::Assign, [Operand::Var(scalar)]);
            }
            _ => unreachable!("escape analysis admitted only loads and stores"),
        }
    }
}

fn ptr_display(func: &Function, ptr: Var) -> String {
    func.var(ptr).name().to_string()
}
