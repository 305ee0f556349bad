//! Natural-loop detection by DFS: when the walk meets a block already on
//! its path, the slice of the path from that block onward is a loop body,
//! recorded under the block immediately preceding the loop header on the
//! path.

use super::cfg::CfgAnalysis;
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::{FxHashMap, FxIndexMap};
use crate::ir::{Block, Function};

pub struct LoopDetectionAnalysis {
    /// Key: the block just before the loop (the pre-header position);
    /// value: the blocks of the loop, header first.
    pub loops: FxIndexMap<Block, Vec<Block>>,
}

impl LoopDetectionAnalysis {
    pub fn compute(func: &Function, cfg: &CfgAnalysis) -> PanicResult<Self> {
        let mut analysis = Self {
            loops: FxIndexMap::default(),
        };
        let mut done: FxHashMap<Block, bool> =
            func.basic_blocks().map(|b| (b, false)).collect();
        let mut path = Vec::new();
        analysis.dfs(func.entry(), cfg, &mut done, &mut path)?;
        Ok(analysis)
    }

    fn dfs(
        &mut self,
        block: Block,
        cfg: &CfgAnalysis,
        done: &mut FxHashMap<Block, bool>,
        path: &mut Vec<Block>,
    ) -> PanicResult {
        if let Some(index) = path.iter().position(|&b| b == block) {
            if index == 0 {
                return Err(CompilerPanic::new(
                    "loop header has no basic block before it",
                ));
            }
            let before = path[index - 1];
            if self.loops.contains_key(&before) {
                return Err(CompilerPanic::new(
                    "two loops start from the same basic block",
                ));
            }
            done.insert(block, true);
            self.loops.insert(before, path[index..].to_vec());
            return Ok(());
        }

        path.push(block);
        for &succ in cfg.cfg_out(block) {
            if !done.get(&succ).copied().unwrap_or(true) {
                self.dfs(succ, cfg, done, path)?;
            }
        }
        path.pop();
        done.insert(block, true);
        Ok(())
    }
}
