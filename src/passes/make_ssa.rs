//! SSA construction: place phi nodes at dominance frontiers of each
//! variable's definition blocks, then rename definitions with monotonically
//! increasing versions along a pre-order walk of the dominator tree.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::fx::{FxHashMap, FxIndexMap, FxIndexSet};
use crate::ir::{Block, Function, Opcode, Operand, OperandList, Var};

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    cache.invalidate(AnalysisKind::Cfg);
    cache.request_cfg(func)?;
    cache.request_domtree(func)?;

    let mut state = MakeSsa {
        defs: FxIndexMap::default(),
        version_counters: FxHashMap::default(),
        version_stacks: FxHashMap::default(),
    };
    state.compute_defs(func, cache);
    state.add_phi_nodes(func, cache)?;

    for (&var, _) in &state.defs {
        state.version_counters.insert(var, 0);
        state.version_stacks.insert(var, vec![var]);
    }
    let entry = func.entry();
    state.rename_vars(func, cache, entry)?;
    remove_degenerate_phis(func);

    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::Dfg);
    Ok(())
}

struct MakeSsa {
    /// Blocks defining each (pre-SSA) variable.
    defs: FxIndexMap<Var, FxIndexSet<Block>>,
    version_counters: FxHashMap<Var, u32>,
    /// Stack of live versions per original variable; the base entry is the
    /// original itself (version zero).
    version_stacks: FxHashMap<Var, Vec<Var>>,
}

impl MakeSsa {
    fn compute_defs(&mut self, func: &Function, cache: &mut AnalysesCache) {
        let domtree = cache.request_domtree(func).expect("domtree just computed");
        for &block in domtree.dfs_walk() {
            for &inst in func.block(block).insts() {
                if let Some(out) = func.inst(inst).output {
                    self.defs.entry(out).or_default().insert(block);
                }
            }
        }
    }

    /// Classical iterated-dominance-frontier phi placement.
    fn add_phi_nodes(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
        let domtree = cache.request_domtree(func)?;
        let mut frontier_of: FxHashMap<Block, Vec<Block>> = FxHashMap::default();
        for &block in domtree.dfs_walk() {
            frontier_of.insert(
                block,
                domtree
                    .dominance_frontier(block)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default(),
            );
        }
        let cfg_preds: FxHashMap<Block, Vec<Block>> = {
            let cfg = cache.request_cfg(func)?;
            func.basic_blocks()
                .map(|b| (b, cfg.cfg_in(b).iter().copied().collect()))
                .collect()
        };

        let mut placed: FxHashMap<Block, u32> = FxHashMap::default();
        let mut work: FxHashMap<Block, u32> = FxHashMap::default();
        let mut round = 0u32;
        let vars: Vec<(Var, Vec<Block>)> = self
            .defs
            .iter()
            .map(|(&v, blocks)| (v, blocks.iter().copied().collect()))
            .collect();
        for (var, def_blocks) in vars {
            round += 1;
            let mut worklist = def_blocks;
            while let Some(block) = worklist.pop() {
                for &df_block in frontier_of.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                    if placed.get(&df_block).copied().unwrap_or(0) >= round {
                        continue;
                    }
                    // Insert `var = phi [pred, var]...` at the block head;
                    // renaming fills in the real versions.
                    let mut operands = OperandList::new();
                    for &pred in &cfg_preds[&df_block] {
                        if pred == df_block {
                            continue;
                        }
                        operands.push(Operand::Label(func.label_of(pred).clone()));
                        operands.push(Operand::Var(var));
                    }
                    func.insert_inst_at(df_block, 0, Opcode::Phi, operands, Some(var));
                    placed.insert(df_block, round);
                    if work.get(&df_block).copied().unwrap_or(0) < round {
                        work.insert(df_block, round);
                        worklist.push(df_block);
                    }
                }
            }
        }
        Ok(())
    }

    /// Pre-order walk of the dominator tree, renaming definitions and uses.
    fn rename_vars(
        &mut self,
        func: &mut Function,
        cache: &mut AnalysesCache,
        block: Block,
    ) -> PanicResult {
        let mut outs: Vec<Var> = Vec::new();

        for inst in func.block_insts(block) {
            let opcode = func.inst(inst).opcode;
            if opcode != Opcode::Phi {
                let operands: OperandList = func
                    .inst(inst)
                    .operands
                    .iter()
                    .map(|op| match op {
                        Operand::Var(v) => {
                            let current = self
                                .version_stacks
                                .get(v)
                                .and_then(|s| s.last())
                                .copied()
                                .unwrap_or(*v);
                            Operand::Var(current)
                        }
                        other => other.clone(),
                    })
                    .collect();
                func.inst_mut(inst).operands = operands;
            }
            if let Some(out) = func.inst(inst).output {
                let version = self.version_counters[&out];
                let renamed = func.versioned_variable(out, version);
                self.version_stacks.get_mut(&out).unwrap().push(renamed);
                self.version_counters.insert(out, version + 1);
                func.inst_mut(inst).output = Some(renamed);
                outs.push(out);
            }
        }

        // Fill our slot in the successors' phis.
        let (succs, dominated) = {
            let cfg = cache.request_cfg(func)?;
            let succs: Vec<Block> = cfg.cfg_out(block).iter().copied().collect();
            let domtree = cache.request_domtree(func)?;
            let dominated: Vec<Block> = domtree
                .dominated(block)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default();
            (succs, dominated)
        };
        let own_label = func.label_of(block).clone();
        for succ in succs {
            for inst in func.block_insts(succ) {
                if func.inst(inst).opcode != Opcode::Phi {
                    break;
                }
                // The phi's original variable is recoverable from any of
                // its own operand slots; all were seeded with it.
                let operands = func.inst(inst).operands.clone();
                let mut updated = operands.clone();
                for i in (0..operands.len()).step_by(2) {
                    if operands[i].as_label() == Some(&own_label) {
                        if let Operand::Var(orig) = &operands[i + 1] {
                            let current = self
                                .version_stacks
                                .get(orig)
                                .and_then(|s| s.last())
                                .copied()
                                .unwrap_or(*orig);
                            updated[i + 1] = Operand::Var(current);
                        }
                    }
                }
                func.inst_mut(inst).operands = updated;
            }
        }

        for child in dominated {
            if child == block {
                continue;
            }
            self.rename_vars(func, cache, child)?;
        }

        for out in outs {
            self.version_stacks.get_mut(&out).unwrap().pop();
        }
        Ok(())
    }
}

/// Drop phis that only ever see themselves or a single distinct input.
fn remove_degenerate_phis(func: &mut Function) {
    for block in func.block_ids() {
        for inst in func.block_insts(block) {
            let data = func.inst(inst);
            if data.opcode != Opcode::Phi {
                break;
            }
            let output = data.output;
            let keep: OperandList = data
                .operands
                .chunks(2)
                .filter(|pair| pair[1].as_var() != output)
                .flat_map(|pair| pair.iter().cloned())
                .collect();
            let distinct: FxIndexSet<Var> = keep
                .chunks(2)
                .filter_map(|pair| pair[1].as_var())
                .collect();
            match distinct.len() {
                0 => func.reduce_phi(inst, OperandList::new()),
                1 => {
                    let only = *distinct.first().unwrap();
                    let data = func.inst_mut(inst);
                    data.opcode = Opcode::Assign;
                    data.operands = OperandList::from_iter([Operand::Var(only)]);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DfgAnalysis;
    use crate::ir::Label;

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    /// Every variable has exactly one defining instruction after the pass.
    fn assert_ssa(func: &Function) {
        let mut seen = FxIndexSet::default();
        for block in func.basic_blocks() {
            for &inst in func.block(block).insts() {
                if let Some(out) = func.inst(inst).output {
                    assert!(
                        seen.insert(out),
                        "variable {} defined twice",
                        func.display_var(out)
                    );
                }
            }
        }
    }

    #[test]
    fn diamond_redefinition_gets_a_phi() {
        // x defined in both arms of a diamond, used at the join.
        let mut func = Function::new(Label::new("a"));
        let a = func.entry();
        let b = func.append_basic_block(Label::new("b"));
        let c = func.append_basic_block(Label::new("c"));
        let d = func.append_basic_block(Label::new("d"));

        let x = func.named_variable("x");
        let (_, cond) = func.append_inst(a, Opcode::Callvalue, []);
        func.append_inst(
            a,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("b"), label("c")],
        );
        func.append_inst_with(b, Opcode::Assign, [Operand::lit(1u64)], Some(x));
        func.append_inst(b, Opcode::Jmp, [label("d")]);
        func.append_inst_with(c, Opcode::Assign, [Operand::lit(2u64)], Some(x));
        func.append_inst(c, Opcode::Jmp, [label("d")]);
        func.append_inst(d, Opcode::Mstore, [Operand::Var(x), Operand::lit(0u64)]);
        func.append_inst(d, Opcode::Stop, []);

        let mut cache = AnalysesCache::new();
        run(&mut func, &mut cache).unwrap();

        assert_ssa(&func);
        let first = func.block_insts(d)[0];
        assert_eq!(func.inst(first).opcode, Opcode::Phi);
        assert_eq!(func.inst(first).operands.len(), 4);
        // The mstore reads the phi's output, not the original name.
        let store = func.block_insts(d)[1];
        assert_eq!(
            func.inst(store).operands[0].as_var(),
            func.inst(first).output
        );
        // Phi arms carry the two renamed definitions.
        let dfg = DfgAnalysis::compute(&func);
        for (_, var) in func.inst(first).phi_operands().collect::<Vec<_>>() {
            assert!(dfg.get_producing_instruction(var).is_some());
        }
    }

    #[test]
    fn straight_line_reuse_is_renamed_without_phis() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let x = func.named_variable("x");
        func.append_inst_with(entry, Opcode::Assign, [Operand::lit(1u64)], Some(x));
        let second = func.append_inst_with(entry, Opcode::Add, [Operand::Var(x), Operand::lit(1u64)], Some(x));
        func.append_inst(entry, Opcode::Mstore, [Operand::Var(x), Operand::lit(0u64)]);
        func.append_inst(entry, Opcode::Stop, []);

        let mut cache = AnalysesCache::new();
        run(&mut func, &mut cache).unwrap();
        assert_ssa(&func);

        let insts = func.block_insts(entry);
        // No phi appeared.
        assert!(insts.iter().all(|&i| func.inst(i).opcode != Opcode::Phi));
        // The add reads version 0 and defines version 1; the store reads
        // version 1.
        let add = insts[1];
        let store = insts[2];
        let add_in = func.inst(add).operands[0].as_var().unwrap();
        let add_out = func.inst(add).output.unwrap();
        assert_eq!(func.var(add_in).version(), 0);
        assert_eq!(func.var(add_out).version(), 1);
        assert_eq!(func.inst(store).operands[0].as_var(), Some(add_out));
        let _ = second;
    }
}
