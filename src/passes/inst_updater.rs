//! The single mutation facade for instruction-level rewrites.
//!
//! Every operand-level change a pass makes goes through the updater so the
//! def-use graph stays consistent: removing the old uses, adding the new
//! ones, and keeping the producer map in step. The updater holds the DFG
//! taken out of the analyses cache; [`InstUpdater::finish`] hands it back.

use crate::analysis::DfgAnalysis;
use crate::ir::{Function, Inst, InstData, Opcode, Operand, OperandList, Var};
use crate::fx::FxHashMap;
use crate::ir::Label;

pub struct InstUpdater<'a> {
    pub func: &'a mut Function,
    dfg: DfgAnalysis,
}

impl<'a> InstUpdater<'a> {
    pub fn new(func: &'a mut Function, dfg: DfgAnalysis) -> Self {
        Self { func, dfg }
    }

    pub fn dfg(&self) -> &DfgAnalysis {
        &self.dfg
    }

    /// Give the maintained DFG back (to be re-cached).
    pub fn finish(self) -> DfgAnalysis {
        self.dfg
    }

    /// Replace opcode and operands in place, keeping the output.
    pub fn update(
        &mut self,
        inst: Inst,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
    ) {
        self.drop_operand_uses(inst);
        let data = self.func.inst_mut(inst);
        data.opcode = opcode;
        data.operands = operands.into_iter().collect();
        self.add_operand_uses(inst);
    }

    /// Replace opcode, operands, and output.
    pub fn update_with_output(
        &mut self,
        inst: Inst,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
        output: Option<Var>,
    ) {
        let old_output = self.func.inst(inst).output;
        if old_output != output {
            if let Some(old) = old_output {
                self.dfg.clear_producer(old);
            }
            if let Some(new) = output {
                self.dfg.set_producer(new, inst);
            }
            self.func.inst_mut(inst).output = output;
        }
        self.update(inst, opcode, operands);
    }

    /// Turn the instruction into a `nop` with no operands and no output.
    pub fn nop(&mut self, inst: Inst) {
        self.drop_operand_uses(inst);
        let data = self.func.inst_mut(inst);
        if let Some(out) = data.output.take() {
            self.dfg.clear_producer(out);
        }
        data.opcode = Opcode::Nop;
        data.operands = OperandList::new();
    }

    /// Detach the instruction from its block entirely.
    pub fn remove(&mut self, inst: Inst) {
        self.drop_operand_uses(inst);
        if let Some(out) = self.func.inst(inst).output {
            self.dfg.clear_producer(out);
        }
        self.func.detach_inst(inst);
    }

    /// Rewrite the instruction into an assignment of `source` to its
    /// existing output.
    pub fn assign_to(&mut self, inst: Inst, source: Operand) {
        debug_assert!(self.func.inst(inst).output.is_some());
        self.update(inst, Opcode::Assign, [source]);
    }

    /// Insert a new instruction before `anchor`, allocating a fresh output
    /// when the opcode produces one. The new instruction inherits the
    /// anchor's diagnostic tags. Returns the output variable.
    pub fn add_before(
        &mut self,
        anchor: Inst,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
    ) -> Option<Var> {
        let index = self
            .func
            .position_in_block(anchor)
            .expect("anchor must be attached");
        self.insert_at(anchor, index, opcode, operands)
    }

    /// Insert a new instruction after `anchor`.
    pub fn add_after(
        &mut self,
        anchor: Inst,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
    ) -> Option<Var> {
        let index = self
            .func
            .position_in_block(anchor)
            .expect("anchor must be attached");
        self.insert_at(anchor, index + 1, opcode, operands)
    }

    fn insert_at(
        &mut self,
        anchor: Inst,
        index: usize,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
    ) -> Option<Var> {
        let block = self.func.inst(anchor).parent().expect("anchor in a block");
        let output = if opcode.has_output() {
            Some(self.func.new_variable())
        } else {
            None
        };
        let inst = self.func.insert_inst_at(block, index, opcode, operands, output);
        // Diagnostics follow the instruction being rewritten around.
        let (src, msg) = {
            let a = self.func.inst(anchor);
            (a.ast_source, a.error_msg.clone())
        };
        let data = self.func.inst_mut(inst);
        data.ast_source = src;
        data.error_msg = msg;

        self.add_operand_uses(inst);
        if let Some(out) = output {
            self.dfg.set_producer(out, inst);
        }
        output
    }

    /// Apply an operand substitution map.
    pub fn replace_operands(&mut self, inst: Inst, mapping: &FxHashMap<Operand, Operand>) {
        let new_operands: OperandList = self
            .func
            .inst(inst)
            .operands
            .iter()
            .map(|op| mapping.get(op).cloned().unwrap_or_else(|| op.clone()))
            .collect();
        let opcode = self.func.inst(inst).opcode;
        self.update(inst, opcode, new_operands);
    }

    /// Replace the operand at one position only.
    pub fn set_operand(&mut self, inst: Inst, index: usize, operand: Operand) {
        if let Some(var) = self.func.inst(inst).operands[index].as_var() {
            self.dfg.remove_use(var, inst);
        }
        if let Some(var) = operand.as_var() {
            self.dfg.add_use(var, inst);
        }
        self.func.inst_mut(inst).operands[index] = operand;
    }

    /// Label renames do not touch the def-use graph.
    pub fn replace_label_operands(&mut self, inst: Inst, mapping: &FxHashMap<Label, Label>) {
        self.func.inst_mut(inst).replace_label_operands(mapping);
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        self.func.inst(inst)
    }

    fn drop_operand_uses(&mut self, inst: Inst) {
        let vars: Vec<Var> = self.func.inst(inst).input_vars().collect();
        for var in vars {
            self.dfg.remove_use(var, inst);
        }
    }

    fn add_operand_uses(&mut self, inst: Inst) {
        let vars: Vec<Var> = self.func.inst(inst).input_vars().collect();
        for var in vars {
            self.dfg.add_use(var, inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Opcode};

    #[test]
    fn updates_keep_the_dfg_in_step() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, a) = func.append_inst(entry, Opcode::Callvalue, []);
        let a = a.unwrap();
        let (_, b) = func.append_inst(entry, Opcode::Calldatasize, []);
        let b = b.unwrap();
        let (add, _) = func.append_inst(entry, Opcode::Add, [Operand::Var(a), Operand::Var(b)]);
        func.append_inst(entry, Opcode::Stop, []);

        let dfg = DfgAnalysis::compute(&func);
        let mut updater = InstUpdater::new(&mut func, dfg);
        updater.update(add, Opcode::Assign, [Operand::Var(a)]);
        assert_eq!(updater.dfg().get_uses(a).len(), 1);
        assert!(updater.dfg().get_uses(b).is_empty());

        updater.nop(add);
        assert!(updater.dfg().get_uses(a).is_empty());
        let dfg = updater.finish();
        assert_eq!(func.inst(add).opcode, Opcode::Nop);
        assert!(func.inst(add).output.is_none());
        drop(dfg);
    }

    #[test]
    fn insertions_register_producers() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (stop, _) = func.append_inst(entry, Opcode::Stop, []);

        let dfg = DfgAnalysis::compute(&func);
        let mut updater = InstUpdater::new(&mut func, dfg);
        let v = updater.add_before(stop, Opcode::Assign, [Operand::lit(7u64)]).unwrap();
        let producer = updater.dfg().get_producing_instruction(v).unwrap();
        let dfg = updater.finish();
        drop(dfg);
        assert_eq!(func.block(entry).insts()[0], producer);
        assert_eq!(func.inst(producer).output, Some(v));
    }
}
