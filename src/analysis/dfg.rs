//! Def-use graph: for every variable, the single producing instruction
//! (post-SSA) and the list of consuming instructions, one entry per use
//! occurrence. Built in one linear pass; kept up to date incrementally by
//! the instruction updater.

use crate::fx::FxHashMap;
use crate::ir::{Function, Inst, Var};

#[derive(Default)]
pub struct DfgAnalysis {
    uses: FxHashMap<Var, Vec<Inst>>,
    outputs: FxHashMap<Var, Inst>,
}

impl DfgAnalysis {
    pub fn compute(func: &Function) -> Self {
        let mut dfg = Self::default();
        for block in func.basic_blocks() {
            for &inst in func.block(block).insts() {
                let data = func.inst(inst);
                for var in data.input_vars() {
                    dfg.add_use(var, inst);
                }
                if let Some(out) = data.output {
                    dfg.outputs.insert(out, inst);
                }
            }
        }
        dfg
    }

    /// The instructions using `var`, in build/update order; an instruction
    /// appears once per operand occurrence.
    pub fn get_uses(&self, var: Var) -> &[Inst] {
        self.uses.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Uses of `var` restricted to one block.
    pub fn get_uses_in_block(&self, func: &Function, var: Var, block: crate::ir::Block) -> Vec<Inst> {
        self.get_uses(var)
            .iter()
            .copied()
            .filter(|&i| func.inst(i).parent() == Some(block))
            .collect()
    }

    pub fn get_producing_instruction(&self, var: Var) -> Option<Inst> {
        self.outputs.get(&var).copied()
    }

    pub fn add_use(&mut self, var: Var, inst: Inst) {
        self.uses.entry(var).or_default().push(inst);
    }

    /// Remove one use occurrence.
    pub fn remove_use(&mut self, var: Var, inst: Inst) {
        if let Some(uses) = self.uses.get_mut(&var) {
            if let Some(pos) = uses.iter().position(|&i| i == inst) {
                uses.remove(pos);
            }
        }
    }

    pub fn set_producer(&mut self, var: Var, inst: Inst) {
        self.outputs.insert(var, inst);
    }

    pub fn clear_producer(&mut self, var: Var) {
        self.outputs.remove(&var);
    }

    pub fn outputs(&self) -> impl Iterator<Item = (Var, Inst)> + '_ {
        self.outputs.iter().map(|(&v, &i)| (v, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Opcode, Operand};

    #[test]
    fn producers_and_consumers() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (pi, v) = func.append_inst(entry, Opcode::Callvalue, []);
        let v = v.unwrap();
        let (ai, sum) = func.append_inst(
            entry,
            Opcode::Add,
            [Operand::Var(v), Operand::Var(v)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        let dfg = DfgAnalysis::compute(&func);
        assert_eq!(dfg.get_producing_instruction(v), Some(pi));
        assert_eq!(dfg.get_producing_instruction(sum.unwrap()), Some(ai));
        // Two operand occurrences, two use entries.
        assert_eq!(dfg.get_uses(v), &[ai, ai]);
        assert!(dfg.get_uses(sum.unwrap()).is_empty());
    }
}
