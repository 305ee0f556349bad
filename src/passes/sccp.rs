//! Sparse conditional constant propagation.
//!
//! A joint lattice over block reachability and variable constancy: values
//! are `Top` (unvisited), `Const(k)`, or `Bottom`. A worklist of CFG edges
//! discovers reachable blocks; a worklist of SSA edges re-evaluates the
//! consumers of every lowered variable. On convergence, constant variables
//! become literal operands, instructions computing constants become
//! assignments, and `jnz` over a constant condition becomes `jmp`.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Function, Inst, Literal, Opcode, Operand, Var};
use crate::passes::InstUpdater;
use std::collections::VecDeque;

/// Pass options. Early pipeline runs keep allocas opaque so memory
/// promotion still sees them as address-taken.
#[derive(Copy, Clone, Debug)]
pub struct SccpOptions {
    pub remove_allocas: bool,
}

impl Default for SccpOptions {
    fn default() -> Self {
        Self {
            remove_allocas: true,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Lattice {
    Top,
    Const(Literal),
    Bottom,
}

impl Lattice {
    fn meet(self, other: Lattice) -> Lattice {
        use Lattice::*;
        match (self, other) {
            (Top, x) | (x, Top) => x,
            (Const(a), Const(b)) if a == b => Const(a),
            _ => Bottom,
        }
    }
}

pub fn run(func: &mut Function, cache: &mut AnalysesCache, options: SccpOptions) -> PanicResult {
    cache.request_cfg(func)?;
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    let mut solver = Solver {
        options,
        lattice: FxHashMap::default(),
        executable_edges: FxHashSet::default(),
        reachable: FxHashSet::default(),
        flow_worklist: VecDeque::new(),
        ssa_worklist: VecDeque::new(),
    };
    solver.solve(&mut updater)?;
    let folded_branches = solver.rewrite(&mut updater)?;

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::VarEquivalence);
    cache.invalidate(AnalysisKind::AvailableExpressions);
    if folded_branches {
        cache.invalidate(AnalysisKind::Cfg);
    }
    Ok(())
}

struct Solver {
    options: SccpOptions,
    lattice: FxHashMap<Var, Lattice>,
    executable_edges: FxHashSet<(Block, Block)>,
    reachable: FxHashSet<Block>,
    flow_worklist: VecDeque<(Option<Block>, Block)>,
    ssa_worklist: VecDeque<Inst>,
}

impl Solver {
    fn value(&self, operand: &Operand) -> Lattice {
        match operand {
            Operand::Lit(l) => Lattice::Const(*l),
            Operand::Var(v) => self.lattice.get(v).copied().unwrap_or(Lattice::Top),
            Operand::Label(_) => Lattice::Bottom,
        }
    }

    fn lower(&mut self, updater: &InstUpdater, var: Var, value: Lattice) {
        let old = self.lattice.get(&var).copied().unwrap_or(Lattice::Top);
        let new = old.meet(value);
        if new != old {
            self.lattice.insert(var, new);
            for &user in updater.dfg().get_uses(var) {
                self.ssa_worklist.push_back(user);
            }
        }
    }

    fn solve(&mut self, updater: &mut InstUpdater) -> PanicResult {
        self.flow_worklist.push_back((None, updater.func.entry()));

        while !self.flow_worklist.is_empty() || !self.ssa_worklist.is_empty() {
            if let Some((from, to)) = self.flow_worklist.pop_front() {
                if let Some(from) = from {
                    if !self.executable_edges.insert((from, to)) {
                        continue;
                    }
                } else if self.reachable.contains(&to) {
                    continue;
                }
                let first_visit = self.reachable.insert(to);
                if first_visit {
                    for inst in updater.func.block_insts(to) {
                        self.visit_inst(updater, inst)?;
                    }
                } else {
                    // A new edge into an already-visited block only
                    // refreshes its phis.
                    for inst in updater.func.block_insts(to) {
                        if updater.func.inst(inst).opcode != Opcode::Phi {
                            break;
                        }
                        self.visit_inst(updater, inst)?;
                    }
                }
                continue;
            }

            if let Some(inst) = self.ssa_worklist.pop_front() {
                let in_reachable_block = updater
                    .func
                    .inst(inst)
                    .parent()
                    .is_some_and(|b| self.reachable.contains(&b));
                if in_reachable_block {
                    self.visit_inst(updater, inst)?;
                }
            }
        }
        Ok(())
    }

    fn visit_inst(&mut self, updater: &mut InstUpdater, inst: Inst) -> PanicResult {
        let func = &*updater.func;
        let data = func.inst(inst);
        let opcode = data.opcode;
        let block = data.parent().expect("instruction outside a block");

        match opcode {
            Opcode::Phi => {
                let mut value = Lattice::Top;
                let pairs: Vec<(Block, Var)> = data
                    .phi_operands()
                    .filter_map(|(label, var)| {
                        func.get_basic_block(label).map(|pred| (pred, var))
                    })
                    .collect();
                for (pred, var) in pairs {
                    if self.executable_edges.contains(&(pred, block)) {
                        value = value.meet(self.lattice.get(&var).copied().unwrap_or(Lattice::Top));
                    }
                }
                if let Some(out) = data.output {
                    self.lower(updater, out, value);
                }
            }
            Opcode::Assign => {
                let value = self.value(&data.operands[0]);
                if let Some(out) = data.output {
                    self.lower(updater, out, value);
                }
            }
            Opcode::Jmp => {
                if let Some(target) = data.operands[0]
                    .as_label()
                    .and_then(|l| func.get_basic_block(l))
                {
                    self.flow_worklist.push_back((Some(block), target));
                }
            }
            Opcode::Jnz => {
                let cond = self.value(&data.operands[0]);
                let then_bb = data.operands[1].as_label().and_then(|l| func.get_basic_block(l));
                let else_bb = data.operands[2].as_label().and_then(|l| func.get_basic_block(l));
                match cond {
                    Lattice::Top => {}
                    Lattice::Const(k) => {
                        let taken = if k.is_zero() { else_bb } else { then_bb };
                        if let Some(t) = taken {
                            self.flow_worklist.push_back((Some(block), t));
                        }
                    }
                    Lattice::Bottom => {
                        for t in [then_bb, else_bb].into_iter().flatten() {
                            self.flow_worklist.push_back((Some(block), t));
                        }
                    }
                }
            }
            Opcode::Djmp => {
                for label in data.label_operands() {
                    if let Some(t) = func.get_basic_block(label) {
                        self.flow_worklist.push_back((Some(block), t));
                    }
                }
            }
            Opcode::Alloca | Opcode::Palloca | Opcode::Calloca => {
                let value = if self.options.remove_allocas && data.operands.len() >= 2 {
                    self.value(&data.operands[0])
                } else {
                    Lattice::Bottom
                };
                if let Some(out) = data.output {
                    self.lower(updater, out, value);
                }
            }
            _ => {
                let Some(out) = data.output else { return Ok(()) };
                let value = self.evaluate(func, inst);
                self.lower(updater, out, value);
            }
        }
        Ok(())
    }

    /// Fold a pure instruction over constant operands.
    fn evaluate(&self, func: &Function, inst: Inst) -> Lattice {
        let data = func.inst(inst);
        let opcode = data.opcode;
        if opcode.is_volatile() || !opcode.writes().is_empty() || !opcode.reads().is_empty() {
            return Lattice::Bottom;
        }

        let mut consts = Vec::with_capacity(data.operands.len());
        let mut any_top = false;
        for op in &data.operands {
            match self.value(op) {
                Lattice::Const(k) => consts.push(k),
                Lattice::Top => any_top = true,
                Lattice::Bottom => return Lattice::Bottom,
            }
        }
        if any_top {
            return Lattice::Top;
        }
        match eval_arith(opcode, &consts) {
            Some(k) => Lattice::Const(k),
            None => Lattice::Bottom,
        }
    }

    /// Rewrite the function from the converged lattice. Returns true if a
    /// branch was folded.
    fn rewrite(&self, updater: &mut InstUpdater) -> PanicResult<bool> {
        let mut folded_branch = false;
        for block in updater.func.block_ids() {
            if !self.reachable.contains(&block) {
                continue;
            }
            for inst in updater.func.block_insts(block) {
                let data = updater.func.inst(inst);
                let opcode = data.opcode;

                if opcode == Opcode::Jnz {
                    if let Lattice::Const(k) = self.value(&data.operands[0]) {
                        let target = if k.is_zero() {
                            data.operands[2].clone()
                        } else {
                            data.operands[1].clone()
                        };
                        updater.update(inst, Opcode::Jmp, [target]);
                        folded_branch = true;
                        continue;
                    }
                }

                if opcode == Opcode::Phi {
                    continue;
                }

                // A pure instruction with a constant output becomes an
                // assignment of the literal; later passes clean it up.
                if let Some(out) = data.output {
                    if let Some(Lattice::Const(k)) = self.lattice.get(&out).copied() {
                        let pure = !opcode.is_volatile()
                            && opcode.writes().is_empty()
                            && opcode != Opcode::Assign;
                        if pure {
                            updater.assign_to(inst, Operand::Lit(k));
                            continue;
                        }
                    }
                }

                // Otherwise propagate constants into the operand list.
                let data = updater.func.inst(inst);
                let replacements: Vec<(usize, Literal)> = data
                    .operands
                    .iter()
                    .enumerate()
                    .filter_map(|(i, op)| match op {
                        Operand::Var(v) => match self.lattice.get(v) {
                            Some(Lattice::Const(k)) => Some((i, *k)),
                            _ => None,
                        },
                        _ => None,
                    })
                    .collect();
                for (i, k) in replacements {
                    updater.set_operand(inst, i, Operand::Lit(k));
                }
            }
        }
        Ok(folded_branch)
    }
}

/// Constant-fold one arithmetic/comparison/bitwise opcode. Operands are in
/// reverse EVM stack order, so binary `op [b, a]` computes `a op b`.
pub fn eval_arith(opcode: Opcode, ops: &[Literal]) -> Option<Literal> {
    use Opcode::*;
    let result = match (opcode, ops) {
        (Add, [b, a]) => a.wrapping_add(*b),
        (Sub, [b, a]) => a.wrapping_sub(*b),
        (Mul, [b, a]) => a.wrapping_mul(*b),
        (Div, [b, a]) => a.evm_div(*b),
        (Sdiv, [b, a]) => a.evm_sdiv(*b),
        (Mod, [b, a]) => a.evm_mod(*b),
        (Smod, [b, a]) => a.evm_smod(*b),
        (Exp, [e, a]) => a.evm_exp(*e),
        (Lt, [b, a]) => Literal::lt(*a, *b),
        (Gt, [b, a]) => Literal::gt(*a, *b),
        (Slt, [b, a]) => a.slt(*b),
        (Sgt, [b, a]) => a.sgt(*b),
        (Eq, [b, a]) => Literal::from_bool(a == b),
        (Iszero, [a]) => Literal::from_bool(a.is_zero()),
        (And, [b, a]) => Literal(a.0 & b.0),
        (Or, [b, a]) => Literal(a.0 | b.0),
        (Xor, [b, a]) => Literal(a.0 ^ b.0),
        (Not, [a]) => Literal(!a.0),
        (Shl, [v, s]) => v.evm_shl(*s),
        (Shr, [v, s]) => v.evm_shr(*s),
        (Sar, [v, s]) => v.evm_sar(*s),
        _ => return None,
    };
    Some(result)
}
