//! Lower `dload`/`dloadbytes` into code copies.
//!
//! Immutables live in the code section past the `code_end` label; a
//! `dload` becomes a `codecopy` of one word into scratch memory followed
//! by an `mload`, and a `dloadbytes` becomes a `codecopy` with its source
//! rebased by `code_end`.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Label, Opcode, Operand};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    let mut changed = false;

    for block in updater.func.block_ids() {
        for inst in updater.func.block_insts(block) {
            match updater.func.inst(inst).opcode {
                Opcode::Dload => {
                    let ptr = updater.func.inst(inst).operands[0].clone();
                    let scratch = updater
                        .add_before(inst, Opcode::Alloca, [Operand::lit(32u64)])
                        .expect("alloca has an output");
                    let code_ptr = updater
                        .add_before(
                            inst,
                            Opcode::Add,
                            [ptr, Operand::Label(Label::new("code_end"))],
                        )
                        .expect("add has an output");
                    // codecopy [length, src, dst].
                    updater.add_before(
                        inst,
                        Opcode::Codecopy,
                        [
                            Operand::lit(32u64),
                            Operand::Var(code_ptr),
                            Operand::Var(scratch),
                        ],
                    );
                    updater.update(inst, Opcode::Mload, [Operand::Var(scratch)]);
                    changed = true;
                }
                Opcode::Dloadbytes => {
                    let src = updater.func.inst(inst).operands[1].clone();
                    let code_ptr = updater
                        .add_before(
                            inst,
                            Opcode::Add,
                            [src, Operand::Label(Label::new("code_end"))],
                        )
                        .expect("add has an output");
                    let ops = updater.func.inst(inst).operands.clone();
                    updater.update(
                        inst,
                        Opcode::Codecopy,
                        [ops[0].clone(), Operand::Var(code_ptr), ops[2].clone()],
                    );
                    changed = true;
                }
                _ => {}
            }
        }
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    if changed {
        cache.invalidate(AnalysisKind::Liveness);
        cache.invalidate(AnalysisKind::MemSsa);
        cache.invalidate(AnalysisKind::AvailableExpressions);
    }
    Ok(())
}
