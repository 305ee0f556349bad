//! Rewrite branches into bare `revert 0, 0` blocks as asserts:
//!
//! ```text
//! jnz %cond, @revert_bb, @else   =>   assert iszero %cond; jmp @else
//! jnz %cond, @then, @revert_bb   =>   assert %cond;        jmp @then
//! ```
//!
//! The revert block usually becomes unreachable and is swept by the next
//! CFG simplification.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Block, Function, Literal, Opcode, Operand};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let revert_blocks: Vec<Block> = {
        let cfg = cache.request_cfg(func)?;
        func.basic_blocks()
            .filter(|&bb| {
                cfg.is_reachable(bb) && {
                    let insts = func.block(bb).insts();
                    insts.len() == 1 && {
                        let data = func.inst(insts[0]);
                        data.opcode == Opcode::Revert
                            && data.operands.iter().all(|op| op.as_lit() == Some(Literal::ZERO))
                    }
                }
            })
            .collect()
    };
    if revert_blocks.is_empty() {
        return Ok(());
    }

    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    let mut changed = false;

    for revert_bb in revert_blocks {
        let revert_label = updater.func.label_of(revert_bb).clone();
        for pred in updater.func.block_ids() {
            let Some(term) = updater.func.terminator(pred) else {
                continue;
            };
            if updater.func.inst(term).opcode != Opcode::Jnz {
                continue;
            }
            let ops = updater.func.inst(term).operands.clone();
            let (cond, then_label, else_label) = (ops[0].clone(), ops[1].clone(), ops[2].clone());

            if then_label.as_label() == Some(&revert_label) {
                // Branch *into* the revert when cond holds: assert the
                // negation.
                let negated = updater
                    .add_before(term, Opcode::Iszero, [cond])
                    .expect("iszero has an output");
                updater.add_before(term, Opcode::Assert, [Operand::Var(negated)]);
                updater.update(term, Opcode::Jmp, [else_label]);
                changed = true;
            } else if else_label.as_label() == Some(&revert_label) {
                updater.add_before(term, Opcode::Assert, [cond]);
                updater.update(term, Opcode::Jmp, [then_label]);
                changed = true;
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    fn build(revert_first: bool) -> (Function, crate::ir::Inst, crate::ir::Var) {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let fail = func.append_basic_block(Label::new("fail"));
        let ok = func.append_basic_block(Label::new("ok"));
        let (_, cond) = func.append_inst(entry, Opcode::Callvalue, []);
        let cond = cond.unwrap();
        let targets = if revert_first {
            [label("fail"), label("ok")]
        } else {
            [label("ok"), label("fail")]
        };
        let (jnz, _) = func.append_inst(
            entry,
            Opcode::Jnz,
            [Operand::Var(cond), targets[0].clone(), targets[1].clone()],
        );
        func.append_inst(fail, Opcode::Revert, [Operand::lit(0u64), Operand::lit(0u64)]);
        func.append_inst(ok, Opcode::Stop, []);
        (func, jnz, cond)
    }

    #[test]
    fn revert_on_true_asserts_negation() {
        let (mut func, jnz, cond) = build(true);
        run(&mut func, &mut AnalysesCache::new()).unwrap();

        let entry = func.entry();
        let insts = func.block_insts(entry);
        // callvalue, iszero, assert, jmp.
        assert_eq!(insts.len(), 4);
        assert_eq!(func.inst(insts[1]).opcode, Opcode::Iszero);
        assert_eq!(func.inst(insts[1]).operands[0], Operand::Var(cond));
        assert_eq!(func.inst(insts[2]).opcode, Opcode::Assert);
        assert_eq!(func.inst(jnz).opcode, Opcode::Jmp);
        assert_eq!(func.inst(jnz).operands[0], label("ok"));
    }

    #[test]
    fn revert_on_false_asserts_condition() {
        let (mut func, jnz, cond) = build(false);
        run(&mut func, &mut AnalysesCache::new()).unwrap();

        let entry = func.entry();
        let insts = func.block_insts(entry);
        assert_eq!(insts.len(), 3);
        assert_eq!(func.inst(insts[1]).opcode, Opcode::Assert);
        assert_eq!(func.inst(insts[1]).operands[0], Operand::Var(cond));
        assert_eq!(func.inst(jnz).opcode, Opcode::Jmp);
        assert_eq!(func.inst(jnz).operands[0], label("ok"));
    }

    #[test]
    fn reverts_with_payload_are_left_alone() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let fail = func.append_basic_block(Label::new("fail"));
        let ok = func.append_basic_block(Label::new("ok"));
        let (_, cond) = func.append_inst(entry, Opcode::Callvalue, []);
        let (jnz, _) = func.append_inst(
            entry,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("fail"), label("ok")],
        );
        func.append_inst(fail, Opcode::Revert, [Operand::lit(32u64), Operand::lit(0u64)]);
        func.append_inst(ok, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(jnz).opcode, Opcode::Jnz);
    }
}
