//! Function call graph over a context: per-function call sites and callee
//! sets, restricted to functions reachable from the entry function.

use crate::fx::{FxIndexMap, FxIndexSet};
use crate::ir::{Context, Inst, Label, Opcode};

pub struct CallGraphAnalysis {
    call_sites: FxIndexMap<Label, Vec<(Label, Inst)>>,
    callees: FxIndexMap<Label, FxIndexSet<Label>>,
    reachable: FxIndexSet<Label>,
}

impl CallGraphAnalysis {
    pub fn compute(ctx: &Context) -> Self {
        let mut cg = Self {
            call_sites: FxIndexMap::default(),
            callees: FxIndexMap::default(),
            reachable: FxIndexSet::default(),
        };
        let Some(entry) = ctx.entry_function().cloned() else {
            return cg;
        };

        // Single DFS from the entry: reachability and edges together.
        let mut stack = vec![entry];
        while let Some(name) = stack.pop() {
            if cg.reachable.contains(&name) {
                continue;
            }
            cg.reachable.insert(name.clone());
            cg.call_sites.entry(name.clone()).or_default();
            cg.callees.entry(name.clone()).or_default();

            let Some(func) = ctx.get_function(&name) else {
                continue;
            };
            for block in func.basic_blocks() {
                for &inst in func.block(block).insts() {
                    if func.inst(inst).opcode != Opcode::Invoke {
                        continue;
                    }
                    let callee = func.inst(inst).operands[0]
                        .as_label()
                        .expect("invoke target must be a label")
                        .clone();
                    cg.callees.get_mut(&name).unwrap().insert(callee.clone());
                    cg.call_sites
                        .entry(callee.clone())
                        .or_default()
                        .push((name.clone(), inst));
                    stack.push(callee);
                }
            }
        }
        cg
    }

    /// Call sites of `func` as `(caller, invoke instruction)` pairs.
    pub fn call_sites(&self, func: &Label) -> &[(Label, Inst)] {
        self.call_sites
            .get(func)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn callees(&self, func: &Label) -> impl Iterator<Item = &Label> + '_ {
        self.callees.get(func).into_iter().flatten()
    }

    pub fn is_reachable(&self, func: &Label) -> bool {
        self.reachable.contains(func)
    }

    pub fn unreachable_functions(&self, ctx: &Context) -> Vec<Label> {
        ctx.function_labels()
            .into_iter()
            .filter(|l| !self.reachable.contains(l))
            .collect()
    }

    /// Post-order DFS over the call graph from `root`: callees first.
    pub fn call_walk(&self, root: &Label) -> Vec<Label> {
        let mut visited = FxIndexSet::default();
        let mut walk = Vec::new();
        self.walk_rec(root, &mut visited, &mut walk);
        walk
    }

    fn walk_rec(&self, func: &Label, visited: &mut FxIndexSet<Label>, walk: &mut Vec<Label>) {
        if !visited.insert(func.clone()) {
            return;
        }
        for callee in self.callees(func) {
            self.walk_rec(callee, visited, walk);
        }
        walk.push(func.clone());
    }
}
