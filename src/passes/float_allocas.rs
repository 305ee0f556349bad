//! Move alloca-family instructions to the entry block.
//!
//! Allocas could go to the immediate dominator of their block, but the
//! entry dominates everything and the later passes (SCCP in particular)
//! rely on seeing every alloca before any of its uses in traversal order.
//! A `palloca` travels together with the `mstore` that initializes its
//! parameter, which the lowering bridge guarantees to emit immediately
//! after it.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::ir::{Function, Opcode, Operand};

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let entry = func.entry();
    if !func.is_terminated(entry) {
        return Err(CompilerPanic::new("entry block is not terminated"));
    }

    let mut moves = Vec::new();
    for block in func.block_ids() {
        if block == entry {
            continue;
        }
        let insts = func.block_insts(block);
        let mut i = 0;
        while i < insts.len() {
            let inst = insts[i];
            let opcode = func.inst(inst).opcode;
            if matches!(opcode, Opcode::Alloca | Opcode::Palloca | Opcode::Calloca) {
                moves.push(inst);
                if opcode == Opcode::Palloca {
                    let output = func.inst(inst).output;
                    let init = insts.get(i + 1).copied().filter(|&next| {
                        let data = func.inst(next);
                        data.opcode == Opcode::Mstore
                            && data.operands.len() >= 2
                            && output.is_some_and(|o| data.operands[1] == Operand::Var(o))
                    });
                    if let Some(init) = init {
                        moves.push(init);
                        i += 1;
                    } else if let Some(output) = output {
                        // The init store, if any, must be adjacent; a
                        // straggler would re-run inside loops.
                        for &later in &insts[i + 1..] {
                            let data = func.inst(later);
                            if data.opcode == Opcode::Mstore
                                && data.operands.len() >= 2
                                && data.operands[1] == Operand::Var(output)
                            {
                                return Err(CompilerPanic::new(format!(
                                    "palloca {} has a detached init store {}",
                                    func.display_inst(inst),
                                    func.display_inst(later)
                                )));
                            }
                        }
                    }
                }
            }
            i += 1;
        }
    }

    let moved = !moves.is_empty();
    for inst in moves {
        func.detach_inst(inst);
        let index = func.block(entry).len() - 1;
        func.attach_inst(entry, index, inst);
    }
    if moved {
        cache.invalidate(AnalysisKind::Liveness);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    #[test]
    fn allocas_float_with_their_init_stores() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let body = func.append_basic_block(Label::new("body"));
        func.append_inst(entry, Opcode::Jmp, [Operand::Label(Label::new("body"))]);

        let (pa, ptr) = func.append_inst(body, Opcode::Palloca, [Operand::lit(64u64), Operand::lit(32u64)]);
        let (init, _) = func.append_inst(
            body,
            Opcode::Mstore,
            [Operand::lit(0u64), Operand::Var(ptr.unwrap())],
        );
        let (other, _) = func.append_inst(body, Opcode::Callvalue, []);
        func.append_inst(body, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        let entry_insts = func.block_insts(entry);
        // jmp stays the terminator; the palloca and its store precede it.
        assert_eq!(entry_insts.len(), 3);
        assert_eq!(entry_insts[0], pa);
        assert_eq!(entry_insts[1], init);
        assert_eq!(func.inst(*entry_insts.last().unwrap()).opcode, Opcode::Jmp);
        let body_insts = func.block_insts(body);
        assert_eq!(body_insts.len(), 2);
        assert_eq!(body_insts[0], other);
        assert_eq!(func.inst(body_insts[1]).opcode, Opcode::Stop);
    }

    #[test]
    fn detached_init_store_is_an_error() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let body = func.append_basic_block(Label::new("body"));
        func.append_inst(entry, Opcode::Jmp, [Operand::Label(Label::new("body"))]);

        let (_, ptr) = func.append_inst(body, Opcode::Palloca, [Operand::lit(64u64), Operand::lit(32u64)]);
        func.append_inst(body, Opcode::Callvalue, []);
        func.append_inst(
            body,
            Opcode::Mstore,
            [Operand::lit(0u64), Operand::Var(ptr.unwrap())],
        );
        func.append_inst(body, Opcode::Stop, []);

        let err = run(&mut func, &mut AnalysesCache::new()).unwrap_err();
        assert!(err.0.contains("detached init store"));
    }
}
