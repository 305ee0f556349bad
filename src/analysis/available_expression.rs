//! Available-expression analysis.
//!
//! Pure instructions are interned into structural expressions: the opcode
//! plus its operands, where an operand produced by another interned
//! instruction nests as that instruction's expression. Commutative opcodes
//! canonicalize their operand order, so `add %a, %b` and `add %b, %a` meet
//! in one bucket.
//!
//! Availability is a forward dataflow: an expression is generated by the
//! instruction computing it and killed by any instruction whose write
//! effects overlap the expression's (accumulated) read effects. The meet
//! over predecessors is set intersection, so an expression is available at
//! a point only when it is computed on every path and not invalidated
//! since.

use super::cfg::CfgAnalysis;
use super::dfg::DfgAnalysis;
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::{FxHashMap, FxIndexMap, FxIndexSet};
use crate::ir::{Block, Effects, Function, Inst, Label, Literal, Opcode, Operand, Var};

pub type ExprId = u32;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
enum Node {
    Lit(Literal),
    LabelRef(Label),
    Leaf(Var),
    Sub(ExprId),
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct ExprKey {
    opcode: Opcode,
    children: Vec<Node>,
}

struct ExprData {
    depth: u32,
    reads: Effects,
}

type AvailState = FxIndexMap<ExprId, FxIndexSet<Inst>>;

pub struct AvailableExpressionAnalysis {
    interner: FxIndexMap<ExprKey, ExprId>,
    exprs: Vec<ExprData>,
    expr_of: FxHashMap<Inst, ExprId>,
    /// For each interned instruction: the equivalent instructions available
    /// just before it executes.
    candidates: FxHashMap<Inst, FxIndexSet<Inst>>,
}

impl AvailableExpressionAnalysis {
    pub fn compute(func: &Function, cfg: &CfgAnalysis, dfg: &DfgAnalysis) -> PanicResult<Self> {
        let mut analysis = Self {
            interner: FxIndexMap::default(),
            exprs: Vec::new(),
            expr_of: FxHashMap::default(),
            candidates: FxHashMap::default(),
        };
        analysis.intern_function(func, dfg);
        analysis.propagate(func, cfg)?;
        Ok(analysis)
    }

    /// The expression computed by `inst`, if it was interned.
    pub fn expression(&self, inst: Inst) -> Option<ExprId> {
        self.expr_of.get(&inst).copied()
    }

    pub fn depth(&self, expr: ExprId) -> u32 {
        self.exprs[expr as usize].depth
    }

    /// Equivalent instructions available just before `inst`.
    pub fn available_at(&self, inst: Inst) -> Option<&FxIndexSet<Inst>> {
        self.candidates.get(&inst)
    }

    fn eligible(opcode: Opcode) -> bool {
        if !opcode.has_output() {
            return false;
        }
        if opcode.is_uninteresting_for_cse() || opcode.is_nonidempotent() {
            return false;
        }
        // Distinct allocations are distinct values even with equal
        // operands, and `offset` is assembler magic.
        !matches!(
            opcode,
            Opcode::Alloca | Opcode::Palloca | Opcode::Calloca | Opcode::Offset
        )
    }

    fn intern_function(&mut self, func: &Function, dfg: &DfgAnalysis) {
        for block in func.basic_blocks() {
            for &inst in func.block(block).insts() {
                self.intern_inst(func, dfg, inst);
            }
        }
    }

    fn intern_inst(&mut self, func: &Function, dfg: &DfgAnalysis, inst: Inst) -> Option<ExprId> {
        if let Some(&id) = self.expr_of.get(&inst) {
            return Some(id);
        }
        let data = func.inst(inst);
        if !Self::eligible(data.opcode) {
            return None;
        }

        let mut depth = 1u32;
        let mut reads = data.opcode.reads();
        let mut children = Vec::with_capacity(data.operands.len());
        for op in &data.operands {
            let node = match op {
                Operand::Lit(l) => Node::Lit(*l),
                Operand::Label(l) => Node::LabelRef(l.clone()),
                Operand::Var(v) => match dfg
                    .get_producing_instruction(*v)
                    .and_then(|p| self.intern_inst(func, dfg, p))
                {
                    Some(sub) => {
                        depth = depth.max(1 + self.exprs[sub as usize].depth);
                        reads |= self.exprs[sub as usize].reads;
                        Node::Sub(sub)
                    }
                    None => Node::Leaf(*v),
                },
            };
            children.push(node);
        }
        if data.opcode.is_commutative() {
            children.sort();
        }

        let key = ExprKey {
            opcode: data.opcode,
            children,
        };
        let id = match self.interner.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.interner.len() as ExprId;
                self.interner.insert(key, id);
                self.exprs.push(ExprData { depth, reads });
                id
            }
        };
        self.expr_of.insert(inst, id);
        Some(id)
    }

    fn transfer(&mut self, func: &Function, block: Block, state: &mut AvailState, record: bool) {
        for &inst in func.block(block).insts() {
            let expr = self.expr_of.get(&inst).copied();
            if record {
                if let Some(e) = expr {
                    let mut avail = state.get(&e).cloned().unwrap_or_default();
                    avail.shift_remove(&inst);
                    self.candidates.insert(inst, avail);
                }
            }

            let writes = func.inst(inst).opcode.writes();
            if !writes.is_empty() {
                state.retain(|&e, _| !self.exprs[e as usize].reads.intersects(writes));
            }
            if let Some(e) = expr {
                state.entry(e).or_default().insert(inst);
            }
        }
    }

    fn propagate(&mut self, func: &Function, cfg: &CfgAnalysis) -> PanicResult {
        // Reverse post-order over the reachable blocks.
        let rpo: Vec<Block> = {
            let mut visited = FxIndexSet::default();
            let mut post = Vec::new();
            let mut stack = vec![(func.entry(), 0usize)];
            visited.insert(func.entry());
            while let Some((block, idx)) = stack.pop() {
                let succs: Vec<Block> = cfg.cfg_out(block).iter().copied().collect();
                if idx < succs.len() {
                    stack.push((block, idx + 1));
                    let succ = succs[idx];
                    if visited.insert(succ) {
                        stack.push((succ, 0));
                    }
                } else {
                    post.push(block);
                }
            }
            post.reverse();
            post
        };

        let mut outs: FxHashMap<Block, AvailState> = FxHashMap::default();
        let mut budget = (rpo.len() as i64 + 1) * (rpo.len() as i64 + 1);
        loop {
            let mut changed = false;
            for &block in &rpo {
                let mut state: Option<AvailState> = None;
                for &pred in cfg.cfg_in(block) {
                    let Some(pred_out) = outs.get(&pred) else {
                        // Not yet computed; optimistic, refined on the next
                        // round once the back edge has a value.
                        continue;
                    };
                    state = Some(match state {
                        None => pred_out.clone(),
                        Some(mut acc) => {
                            acc.retain(|e, insts| match pred_out.get(e) {
                                Some(other) => {
                                    insts.retain(|i| other.contains(i));
                                    true
                                }
                                None => false,
                            });
                            acc
                        }
                    });
                }
                let mut state = state.unwrap_or_default();
                self.transfer(func, block, &mut state, false);
                if outs.get(&block) != Some(&state) {
                    outs.insert(block, state);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            budget -= 1;
            if budget < 0 {
                return Err(CompilerPanic::new(
                    "available expressions failed to converge",
                ));
            }
        }

        // Final recording pass with the converged block-entry states.
        for &block in &rpo {
            let mut state: Option<AvailState> = None;
            for &pred in cfg.cfg_in(block) {
                let Some(pred_out) = outs.get(&pred) else {
                    continue;
                };
                state = Some(match state {
                    None => pred_out.clone(),
                    Some(mut acc) => {
                        acc.retain(|e, insts| match pred_out.get(e) {
                            Some(other) => {
                                insts.retain(|i| other.contains(i));
                                true
                            }
                            None => false,
                        });
                        acc
                    }
                });
            }
            let mut state = state.unwrap_or_default();
            self.transfer(func, block, &mut state, true);
        }
        Ok(())
    }
}
