//! Dominator tree analysis: DFS order, dominator sets, immediate
//! dominators, dominated sets, and dominance frontiers.
//!
//! Dominator sets are computed by iterative dataflow to a fixed point with
//! a generous `|V|²` divergence bound; immediate dominators fall out of the
//! sets ordered by the DFS numbering, and frontiers use the
//! Cooper-Harvey-Kennedy walk-up over join-point predecessors.

use super::cfg::CfgAnalysis;
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::{FxHashMap, FxIndexSet};
use crate::ir::{Block, Function};

pub struct DominatorTreeAnalysis {
    /// Post-order walk of the reachable blocks.
    dfs_walk: Vec<Block>,
    /// 1-based post-order number per reachable block.
    dfs_order: FxHashMap<Block, u32>,
    dominators: FxHashMap<Block, FxIndexSet<Block>>,
    idoms: FxHashMap<Block, Block>,
    dominated: FxHashMap<Block, FxIndexSet<Block>>,
    frontiers: FxHashMap<Block, FxIndexSet<Block>>,
}

impl DominatorTreeAnalysis {
    pub fn compute(func: &Function, cfg: &CfgAnalysis) -> PanicResult<Self> {
        let mut tree = Self {
            dfs_walk: Vec::new(),
            dfs_order: FxHashMap::default(),
            dominators: FxHashMap::default(),
            idoms: FxHashMap::default(),
            dominated: FxHashMap::default(),
            frontiers: FxHashMap::default(),
        };
        tree.compute_dfs(func.entry(), cfg);
        tree.compute_dominators(func, cfg)?;
        tree.compute_idoms(func.entry());
        tree.compute_frontiers(cfg);
        Ok(tree)
    }

    /// True if `a` dominates `b`. A block dominates itself. Unreachable
    /// blocks have empty dominator sets, so dominance is always false for
    /// them.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        self.dominators.get(&b).is_some_and(|doms| doms.contains(&a))
    }

    /// The immediate dominator; the entry is its own idom, unreachable
    /// blocks have none.
    pub fn immediate_dominator(&self, block: Block) -> Option<Block> {
        self.idoms.get(&block).copied()
    }

    /// The blocks whose immediate dominator is `block`.
    pub fn dominated(&self, block: Block) -> Option<&FxIndexSet<Block>> {
        self.dominated.get(&block)
    }

    pub fn dominance_frontier(&self, block: Block) -> Option<&FxIndexSet<Block>> {
        self.frontiers.get(&block)
    }

    /// Post-order walk used for the computation; reversed it is an RPO.
    pub fn dfs_walk(&self) -> &[Block] {
        &self.dfs_walk
    }

    pub fn dfs_order(&self, block: Block) -> Option<u32> {
        self.dfs_order.get(&block).copied()
    }

    fn compute_dfs(&mut self, entry: Block, cfg: &CfgAnalysis) {
        // Iterative post-order: push the node, then its unvisited
        // successors; emit when every successor has been handled.
        let mut visited = FxIndexSet::default();
        let mut emitted = FxIndexSet::default();
        let mut stack = vec![entry];
        visited.insert(entry);
        while let Some(&block) = stack.last() {
            let mut pushed = false;
            for &succ in cfg.cfg_out(block) {
                if visited.insert(succ) {
                    stack.push(succ);
                    pushed = true;
                    break;
                }
            }
            if pushed {
                continue;
            }
            stack.pop();
            if emitted.insert(block) {
                self.dfs_walk.push(block);
                self.dfs_order.insert(block, self.dfs_walk.len() as u32);
            }
        }
    }

    fn compute_dominators(&mut self, func: &Function, cfg: &CfgAnalysis) -> PanicResult {
        let blocks: Vec<Block> = self.dfs_walk.clone();
        let universe: FxIndexSet<Block> = blocks.iter().copied().collect();
        for &bb in &blocks {
            self.dominators.insert(bb, universe.clone());
        }
        let entry = func.entry();
        self.dominators
            .insert(entry, FxIndexSet::from_iter([entry]));

        let mut count = (blocks.len() as i64) * (blocks.len() as i64);
        let mut changed = true;
        while changed {
            count -= 1;
            if count < 0 {
                return Err(CompilerPanic::new("dominators failed to converge"));
            }
            changed = false;
            for &bb in &blocks {
                if bb == entry {
                    continue;
                }
                let preds: Vec<Block> = cfg
                    .cfg_in(bb)
                    .iter()
                    .copied()
                    .filter(|p| self.dfs_order.contains_key(p))
                    .collect();
                if preds.is_empty() {
                    continue;
                }
                let mut new_doms: FxIndexSet<Block> = self.dominators[&preds[0]].clone();
                for pred in &preds[1..] {
                    let pred_doms = &self.dominators[pred];
                    new_doms.retain(|b| pred_doms.contains(b));
                }
                new_doms.insert(bb);
                if new_doms != self.dominators[&bb] {
                    self.dominators.insert(bb, new_doms);
                    changed = true;
                }
            }
        }
        Ok(())
    }

    fn compute_idoms(&mut self, entry: Block) {
        self.idoms.insert(entry, entry);
        for &bb in &self.dfs_walk.clone() {
            if bb == entry {
                continue;
            }
            // The dominators of a block form a chain; sorted by post-order
            // number the block itself comes first and its immediate
            // dominator second.
            let mut doms: Vec<Block> = self.dominators[&bb].iter().copied().collect();
            doms.sort_by_key(|b| self.dfs_order[b]);
            debug_assert_eq!(doms[0], bb);
            self.idoms.insert(bb, doms[1]);
        }

        for &bb in &self.dfs_walk {
            self.dominated.insert(bb, FxIndexSet::default());
        }
        for (&bb, &idom) in &self.idoms {
            self.dominated.get_mut(&idom).unwrap().insert(bb);
        }
    }

    fn compute_frontiers(&mut self, cfg: &CfgAnalysis) {
        for &bb in &self.dfs_walk {
            self.frontiers.insert(bb, FxIndexSet::default());
        }
        for &bb in &self.dfs_walk {
            let preds: Vec<Block> = cfg
                .cfg_in(bb)
                .iter()
                .copied()
                .filter(|p| self.dfs_order.contains_key(p))
                .collect();
            if preds.len() <= 1 {
                continue;
            }
            let idom = self.idoms[&bb];
            for pred in preds {
                let mut runner = pred;
                while runner != idom {
                    self.frontiers.get_mut(&runner).unwrap().insert(bb);
                    runner = self.idoms[&runner];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Opcode, Operand};

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    /// A -> B, A -> C, B -> D, C -> D.
    fn diamond() -> (Function, Block, Block, Block, Block) {
        let mut func = Function::new(Label::new("a"));
        let a = func.entry();
        let b = func.append_basic_block(Label::new("b"));
        let c = func.append_basic_block(Label::new("c"));
        let d = func.append_basic_block(Label::new("d"));
        let (_, cond) = func.append_inst(a, Opcode::Callvalue, []);
        func.append_inst(
            a,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("b"), label("c")],
        );
        func.append_inst(b, Opcode::Jmp, [label("d")]);
        func.append_inst(c, Opcode::Jmp, [label("d")]);
        func.append_inst(d, Opcode::Stop, []);
        (func, a, b, c, d)
    }

    #[test]
    fn diamond_idoms_and_frontiers() {
        let (func, a, b, c, d) = diamond();
        let cfg = CfgAnalysis::compute(&func).unwrap();
        let tree = DominatorTreeAnalysis::compute(&func, &cfg).unwrap();

        assert_eq!(tree.immediate_dominator(a), Some(a));
        assert_eq!(tree.immediate_dominator(b), Some(a));
        assert_eq!(tree.immediate_dominator(c), Some(a));
        assert_eq!(tree.immediate_dominator(d), Some(a));

        assert!(tree.dominance_frontier(a).unwrap().is_empty());
        let df_b: Vec<_> = tree.dominance_frontier(b).unwrap().iter().copied().collect();
        let df_c: Vec<_> = tree.dominance_frontier(c).unwrap().iter().copied().collect();
        assert_eq!(df_b, vec![d]);
        assert_eq!(df_c, vec![d]);

        assert!(tree.dominates(a, d));
        assert!(tree.dominates(d, d));
        assert!(!tree.dominates(b, d));
    }

    #[test]
    fn recomputation_is_idempotent() {
        let (func, _, b, _, d) = diamond();
        let cfg = CfgAnalysis::compute(&func).unwrap();
        let t1 = DominatorTreeAnalysis::compute(&func, &cfg).unwrap();
        let t2 = DominatorTreeAnalysis::compute(&func, &cfg).unwrap();
        assert_eq!(t1.dfs_walk(), t2.dfs_walk());
        for &bb in t1.dfs_walk() {
            assert_eq!(t1.immediate_dominator(bb), t2.immediate_dominator(bb));
            assert_eq!(t1.dominance_frontier(bb), t2.dominance_frontier(bb));
        }
        assert_eq!(t1.dominates(b, d), t2.dominates(b, d));
    }

    #[test]
    fn unreachable_blocks_have_no_dominators() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let orphan = func.append_basic_block(Label::new("orphan"));
        func.append_inst(entry, Opcode::Stop, []);
        func.append_inst(orphan, Opcode::Stop, []);
        let cfg = CfgAnalysis::compute(&func).unwrap();
        let tree = DominatorTreeAnalysis::compute(&func, &cfg).unwrap();
        assert_eq!(tree.immediate_dominator(orphan), None);
        assert!(!tree.dominates(entry, orphan));
    }
}
