//! Variable equivalence: operands connected through `assign` chains fall
//! into the same bag. Deliberately under-approximate — only assignment
//! forwarding is tracked, which is all the algebraic and load-elimination
//! consumers need.

use super::dfg::DfgAnalysis;
use crate::fx::FxHashMap;
use crate::ir::{Function, Opcode, Operand};

pub struct VarEquivalenceAnalysis {
    bags: FxHashMap<Operand, usize>,
}

impl VarEquivalenceAnalysis {
    pub fn compute(func: &Function, _dfg: &DfgAnalysis) -> Self {
        let mut bags: FxHashMap<Operand, usize> = FxHashMap::default();
        let mut next_bag = 0usize;

        // Walk definitions in body order so an assign's source is usually
        // bagged before the assign's output.
        for block in func.basic_blocks() {
            for &inst in func.block(block).insts() {
                let data = func.inst(inst);
                if data.opcode != Opcode::Assign {
                    continue;
                }
                let Some(out) = data.output else { continue };
                let source = data.operands[0].clone();
                let out = Operand::Var(out);
                match bags.get(&source) {
                    Some(&bag) => {
                        bags.insert(out, bag);
                    }
                    None => {
                        bags.insert(out, next_bag);
                        bags.insert(source, next_bag);
                        next_bag += 1;
                    }
                }
            }
        }
        Self { bags }
    }

    /// True if the two operands are known to carry the same value. Equal
    /// operands are trivially equivalent.
    pub fn equivalent(&self, a: &Operand, b: &Operand) -> bool {
        if a == b {
            return true;
        }
        match (self.bags.get(a), self.bags.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}
