//! Liveness analysis: per-instruction live-in sets and per-block out-vars,
//! by backward dataflow iterated over the whole function until no block's
//! head set changes.
//!
//! Phi handling is edge-sensitive: the variables flowing into a block from
//! a specific predecessor include only the phi operand labeled with that
//! predecessor; the other phi inputs are dropped on that edge.

use super::cfg::CfgAnalysis;
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::{FxHashMap, FxIndexSet};
use crate::ir::{Block, Function, Inst, Opcode, Var};

#[derive(Debug)]
pub struct LivenessAnalysis {
    live_in: FxHashMap<Inst, FxIndexSet<Var>>,
    out_vars: FxHashMap<Block, FxIndexSet<Var>>,
}

impl LivenessAnalysis {
    pub fn compute(func: &Function, cfg: &CfgAnalysis) -> PanicResult<Self> {
        let mut live = Self {
            live_in: FxHashMap::default(),
            out_vars: FxHashMap::default(),
        };
        for block in func.basic_blocks() {
            live.out_vars.insert(block, FxIndexSet::default());
            for &inst in func.block(block).insts() {
                live.live_in.insert(inst, FxIndexSet::default());
            }
        }

        // A generous bound derived from the problem size: each sweep must
        // grow at least one set or we are done, and total growth is capped
        // by |blocks| * |vars|.
        let mut budget = func.num_basic_blocks() * func.num_vars() + 2;
        loop {
            let mut changed = false;
            for block in func.basic_blocks() {
                changed |= live.calculate_out_vars(func, cfg, block)?;
                changed |= live.calculate_block(func, block);
            }
            if !changed {
                break;
            }
            if budget == 0 {
                return Err(CompilerPanic::new("liveness failed to converge"));
            }
            budget -= 1;
        }
        Ok(live)
    }

    /// Variables live just before `inst` executes.
    pub fn live_before(&self, inst: Inst) -> &FxIndexSet<Var> {
        &self.live_in[&inst]
    }

    /// Variables live at the end of `block`.
    pub fn out_vars(&self, block: Block) -> &FxIndexSet<Var> {
        &self.out_vars[&block]
    }

    fn calculate_block(&mut self, func: &Function, block: Block) -> bool {
        let insts = func.block(block).insts();
        let Some(&head) = insts.first() else {
            return false;
        };
        let orig_head = self.live_in[&head].clone();

        let mut liveness = self.out_vars[&block].clone();
        for &inst in insts.iter().rev() {
            let data = func.inst(inst);
            for var in data.input_vars() {
                liveness.insert(var);
            }
            if let Some(out) = data.output {
                liveness.shift_remove(&out);
            }
            self.live_in.insert(inst, liveness.clone());
        }
        orig_head != self.live_in[&head]
    }

    fn calculate_out_vars(
        &mut self,
        func: &Function,
        cfg: &CfgAnalysis,
        block: Block,
    ) -> PanicResult<bool> {
        let mut out = FxIndexSet::default();
        for &succ in cfg.cfg_out(block) {
            for var in self.input_vars_from(func, block, succ)? {
                out.insert(var);
            }
        }
        let changed = out != self.out_vars[&block];
        self.out_vars.insert(block, out);
        Ok(changed)
    }

    /// The variables `target` needs from `source` on the edge
    /// `source -> target`: target's head live set, with each phi's inputs
    /// narrowed to the operand labeled `source`.
    pub fn input_vars_from(
        &self,
        func: &Function,
        source: Block,
        target: Block,
    ) -> PanicResult<FxIndexSet<Var>> {
        let mut liveness = match func.block(target).first_inst() {
            Some(head) => self.live_in[&head].clone(),
            None => FxIndexSet::default(),
        };
        let source_label = func.label_of(source);

        for &inst in func.block(target).insts() {
            let data = func.inst(inst);
            if data.opcode != Opcode::Phi {
                break;
            }
            if !data.phi_operands().any(|(label, _)| label == source_label) {
                return Err(CompilerPanic::new(format!(
                    "unreachable: phi {} has no edge from {}",
                    func.display_inst(inst),
                    source_label
                )));
            }
            for (label, var) in data.phi_operands() {
                if label == source_label {
                    liveness.insert(var);
                } else {
                    liveness.shift_remove(&var);
                }
            }
        }
        Ok(liveness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Operand};

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    #[test]
    fn straight_line_liveness() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, a) = func.append_inst(entry, Opcode::Callvalue, []);
        let a = a.unwrap();
        let (add, b) = func.append_inst(entry, Opcode::Add, [Operand::Var(a), Operand::lit(1u64)]);
        let b = b.unwrap();
        let (ret, _) = func.append_inst(
            entry,
            Opcode::Mstore,
            [Operand::Var(b), Operand::lit(0u64)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        let live = LivenessAnalysis::compute(&func, &cfg).unwrap();
        assert!(live.live_before(add).contains(&a));
        assert!(!live.live_before(add).contains(&b));
        assert!(live.live_before(ret).contains(&b));
        assert!(!live.live_before(ret).contains(&a));
        assert!(live.out_vars(entry).is_empty());
    }

    #[test]
    fn phi_narrows_per_edge() {
        // entry -> (left | right) -> join, join has a phi over both.
        let mut func = Function::new(Label::new("entry"));
        let entry = func.entry();
        let left = func.append_basic_block(Label::new("left"));
        let right = func.append_basic_block(Label::new("right"));
        let join = func.append_basic_block(Label::new("join"));

        let (_, cond) = func.append_inst(entry, Opcode::Callvalue, []);
        func.append_inst(
            entry,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("left"), label("right")],
        );
        let (_, lv) = func.append_inst(left, Opcode::Calldatasize, []);
        let lv = lv.unwrap();
        func.append_inst(left, Opcode::Jmp, [label("join")]);
        let (_, rv) = func.append_inst(right, Opcode::Codesize, []);
        let rv = rv.unwrap();
        func.append_inst(right, Opcode::Jmp, [label("join")]);

        let out = func.new_variable();
        func.append_inst_with(
            join,
            Opcode::Phi,
            [
                label("left"),
                Operand::Var(lv),
                label("right"),
                Operand::Var(rv),
            ],
            Some(out),
        );
        func.append_inst(
            join,
            Opcode::Mstore,
            [Operand::Var(out), Operand::lit(0u64)],
        );
        func.append_inst(join, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        let live = LivenessAnalysis::compute(&func, &cfg).unwrap();

        let from_left = live.input_vars_from(&func, left, join).unwrap();
        assert!(from_left.contains(&lv));
        assert!(!from_left.contains(&rv));
        let from_right = live.input_vars_from(&func, right, join).unwrap();
        assert!(from_right.contains(&rv));
        assert!(!from_right.contains(&lv));

        assert!(live.out_vars(left).contains(&lv));
        assert!(!live.out_vars(left).contains(&rv));
    }

    #[test]
    fn unreachable_phi_edge_is_a_panic() {
        let mut func = Function::new(Label::new("entry"));
        let entry = func.entry();
        let join = func.append_basic_block(Label::new("join"));
        let (_, v) = func.append_inst(entry, Opcode::Callvalue, []);
        func.append_inst(entry, Opcode::Jmp, [label("join")]);
        // Phi names a block that is not the actual predecessor.
        let out = func.new_variable();
        func.append_inst_with(
            join,
            Opcode::Phi,
            [label("nowhere"), Operand::Var(v.unwrap())],
            Some(out),
        );
        func.append_inst(join, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        let err = LivenessAnalysis::compute(&func, &cfg).unwrap_err();
        assert!(err.0.contains("unreachable"));
    }
}
