//! Control-flow graph analysis: per-block predecessor and successor edge
//! sets, derived from the label operands of CFG-altering instructions, plus
//! reachability from the entry block.
//!
//! Edge sets are insertion-ordered; the order in which predecessors appear
//! is the body order of the blocks that branch to us, which downstream
//! consumers (phi matching, normalization naming) observe.

use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::FxIndexSet;
use crate::ir::{Block, Function};
use cranelift_entity::EntityRef;

/// CFG side tables for one function.
#[derive(Debug)]
pub struct CfgAnalysis {
    cfg_in: Vec<FxIndexSet<Block>>,
    cfg_out: Vec<FxIndexSet<Block>>,
    reachable: FxIndexSet<Block>,
}

impl CfgAnalysis {
    /// Compute the CFG of `func`.
    ///
    /// Fails with a [`CompilerPanic`] when a block is empty or does not end
    /// in a terminator.
    pub fn compute(func: &Function) -> PanicResult<Self> {
        let num_blocks = func.basic_blocks().map(|b| b.index() + 1).max().unwrap_or(0);
        let mut cfg = Self {
            cfg_in: vec![FxIndexSet::default(); num_blocks],
            cfg_out: vec![FxIndexSet::default(); num_blocks],
            reachable: FxIndexSet::default(),
        };

        for block in func.basic_blocks() {
            let Some(&last) = func.block(block).insts().last() else {
                return Err(CompilerPanic::new(format!(
                    "basic block {} is empty",
                    func.label_of(block)
                )));
            };
            if !func.inst(last).is_terminator() {
                return Err(CompilerPanic::new(format!(
                    "basic block {} does not end in a terminator: {}",
                    func.label_of(block),
                    func.display_inst(last)
                )));
            }

            for &inst in func.block(block).insts() {
                if !func.inst(inst).opcode.is_cfg_altering() {
                    continue;
                }
                for label in func.inst(inst).label_operands() {
                    let target = func.get_basic_block(label).ok_or_else(|| {
                        CompilerPanic::new(format!(
                            "branch to unknown basic block {label} in {}",
                            func.label_of(block)
                        ))
                    })?;
                    cfg.cfg_in[target.index()].insert(block);
                }
            }
        }

        // Complete the forward edges from the reverse ones, preserving the
        // predecessor scan order.
        for block in func.basic_blocks() {
            for pred in cfg.cfg_in[block.index()].clone() {
                cfg.cfg_out[pred.index()].insert(block);
            }
        }

        cfg.compute_reachability(func);
        Ok(cfg)
    }

    fn compute_reachability(&mut self, func: &Function) {
        let mut stack = vec![func.entry()];
        while let Some(block) = stack.pop() {
            if !self.reachable.insert(block) {
                continue;
            }
            for &succ in &self.cfg_out[block.index()] {
                if !self.reachable.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
    }

    pub fn cfg_in(&self, block: Block) -> &FxIndexSet<Block> {
        &self.cfg_in[block.index()]
    }

    pub fn cfg_out(&self, block: Block) -> &FxIndexSet<Block> {
        &self.cfg_out[block.index()]
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.reachable.contains(&block)
    }

    pub fn reachable(&self) -> &FxIndexSet<Block> {
        &self.reachable
    }

    /// A function is normalized when no block simultaneously has multiple
    /// predecessors and a predecessor with multiple successors. The code
    /// generator requires this shape.
    pub fn is_normalized(&self) -> bool {
        for preds in &self.cfg_in {
            if preds.len() <= 1 {
                continue;
            }
            for &pred in preds {
                if self.cfg_out(pred).len() > 1 {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Opcode, Operand};

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    #[test]
    fn branches_and_jumps() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let then_bb = func.append_basic_block(Label::new("then"));
        let else_bb = func.append_basic_block(Label::new("else"));
        let (_, cond) = func.append_inst(entry, Opcode::Callvalue, []);
        func.append_inst(
            entry,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("then"), label("else")],
        );
        func.append_inst(then_bb, Opcode::Jmp, [label("else")]);
        func.append_inst(else_bb, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        assert_eq!(cfg.cfg_out(entry).len(), 2);
        assert_eq!(cfg.cfg_in(then_bb).len(), 1);
        // Predecessor order follows body order: entry branches first.
        let preds: Vec<_> = cfg.cfg_in(else_bb).iter().copied().collect();
        assert_eq!(preds, vec![entry, then_bb]);
        assert!(cfg.is_reachable(else_bb));
    }

    #[test]
    fn missing_terminator_is_fatal() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        func.append_inst(entry, Opcode::Callvalue, []);
        let err = CfgAnalysis::compute(&func).unwrap_err();
        assert!(err.0.contains("terminator"));
    }

    #[test]
    fn unreachable_blocks_are_flagged() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let orphan = func.append_basic_block(Label::new("orphan"));
        func.append_inst(entry, Opcode::Stop, []);
        func.append_inst(orphan, Opcode::Stop, []);
        let cfg = CfgAnalysis::compute(&func).unwrap();
        assert!(cfg.is_reachable(entry));
        assert!(!cfg.is_reachable(orphan));
    }
}
