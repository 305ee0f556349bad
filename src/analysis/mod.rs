//! Function analyses and the per-function cache that memoizes them.
//!
//! Passes request analyses through [`AnalysesCache`]; a result is computed
//! once and reused until invalidated. Invalidation cascades along the
//! dependency edges declared in [`AnalysisKind::dependents`], so dropping
//! the CFG also drops everything derived from it.

pub mod available_expression;
pub mod call_graph;
pub mod cfg;
pub mod dfg;
pub mod dominator_tree;
pub mod equivalent_vars;
pub mod liveness;
pub mod loops;
pub mod mem_ssa;

pub use self::available_expression::AvailableExpressionAnalysis;
pub use self::call_graph::CallGraphAnalysis;
pub use self::cfg::CfgAnalysis;
pub use self::dfg::DfgAnalysis;
pub use self::dominator_tree::DominatorTreeAnalysis;
pub use self::equivalent_vars::VarEquivalenceAnalysis;
pub use self::liveness::LivenessAnalysis;
pub use self::loops::LoopDetectionAnalysis;
pub use self::mem_ssa::{AddrSpace, MemSsaAnalysis};

use crate::errors::PanicResult;
use crate::ir::Function;

/// The analyses the cache knows about.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AnalysisKind {
    Cfg,
    DominatorTree,
    Dfg,
    Liveness,
    Loops,
    VarEquivalence,
    AvailableExpressions,
    MemSsa,
}

impl AnalysisKind {
    /// The analyses that become stale when this one is invalidated.
    /// Declared as data so the cascade is auditable in one place.
    pub fn dependents(self) -> &'static [AnalysisKind] {
        use AnalysisKind::*;
        match self {
            Cfg => &[DominatorTree, Liveness, Loops, AvailableExpressions, MemSsa],
            Dfg => &[Liveness, VarEquivalence, AvailableExpressions],
            DominatorTree | Liveness | Loops | VarEquivalence | AvailableExpressions | MemSsa => {
                &[]
            }
        }
    }
}

/// Memoizes analyses for one function. Not shared across threads; a
/// function compiled in parallel with others owns a private cache.
#[derive(Default)]
pub struct AnalysesCache {
    cfg: Option<CfgAnalysis>,
    domtree: Option<DominatorTreeAnalysis>,
    dfg: Option<DfgAnalysis>,
    liveness: Option<LivenessAnalysis>,
    loops: Option<LoopDetectionAnalysis>,
    equivalence: Option<VarEquivalenceAnalysis>,
    available: Option<AvailableExpressionAnalysis>,
    mem_ssa: [Option<MemSsaAnalysis>; 3],
}

fn space_index(space: AddrSpace) -> usize {
    match space {
        AddrSpace::Memory => 0,
        AddrSpace::Storage => 1,
        AddrSpace::Transient => 2,
    }
}

impl AnalysesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cfg(&mut self, func: &Function) -> PanicResult<&CfgAnalysis> {
        if self.cfg.is_none() {
            self.cfg = Some(CfgAnalysis::compute(func)?);
        }
        Ok(self.cfg.as_ref().unwrap())
    }

    pub fn request_domtree(&mut self, func: &Function) -> PanicResult<&DominatorTreeAnalysis> {
        if self.domtree.is_none() {
            self.request_cfg(func)?;
            let cfg = self.cfg.as_ref().unwrap();
            self.domtree = Some(DominatorTreeAnalysis::compute(func, cfg)?);
        }
        Ok(self.domtree.as_ref().unwrap())
    }

    pub fn request_dfg(&mut self, func: &Function) -> &DfgAnalysis {
        if self.dfg.is_none() {
            self.dfg = Some(DfgAnalysis::compute(func));
        }
        self.dfg.as_ref().unwrap()
    }

    /// Take the def-use graph out of the cache so an
    /// [`InstUpdater`](crate::passes::InstUpdater) can maintain it while
    /// mutating the function; return it with [`AnalysesCache::put_dfg`].
    pub fn take_dfg(&mut self, func: &Function) -> DfgAnalysis {
        match self.dfg.take() {
            Some(dfg) => dfg,
            None => DfgAnalysis::compute(func),
        }
    }

    pub fn put_dfg(&mut self, dfg: DfgAnalysis) {
        self.dfg = Some(dfg);
    }

    pub fn request_liveness(&mut self, func: &Function) -> PanicResult<&LivenessAnalysis> {
        if self.liveness.is_none() {
            self.request_cfg(func)?;
            let cfg = self.cfg.as_ref().unwrap();
            self.liveness = Some(LivenessAnalysis::compute(func, cfg)?);
        }
        Ok(self.liveness.as_ref().unwrap())
    }

    pub fn request_loops(&mut self, func: &Function) -> PanicResult<&LoopDetectionAnalysis> {
        if self.loops.is_none() {
            self.request_cfg(func)?;
            let cfg = self.cfg.as_ref().unwrap();
            self.loops = Some(LoopDetectionAnalysis::compute(func, cfg)?);
        }
        Ok(self.loops.as_ref().unwrap())
    }

    pub fn request_equivalence(&mut self, func: &Function) -> &VarEquivalenceAnalysis {
        if self.equivalence.is_none() {
            self.request_dfg(func);
            let dfg = self.dfg.as_ref().unwrap();
            self.equivalence = Some(VarEquivalenceAnalysis::compute(func, dfg));
        }
        self.equivalence.as_ref().unwrap()
    }

    pub fn request_available_expressions(
        &mut self,
        func: &Function,
    ) -> PanicResult<&AvailableExpressionAnalysis> {
        if self.available.is_none() {
            self.request_cfg(func)?;
            self.request_dfg(func);
            let cfg = self.cfg.as_ref().unwrap();
            let dfg = self.dfg.as_ref().unwrap();
            self.available = Some(AvailableExpressionAnalysis::compute(func, cfg, dfg)?);
        }
        Ok(self.available.as_ref().unwrap())
    }

    pub fn request_mem_ssa(
        &mut self,
        func: &Function,
        space: AddrSpace,
    ) -> PanicResult<&MemSsaAnalysis> {
        let idx = space_index(space);
        if self.mem_ssa[idx].is_none() {
            self.request_cfg(func)?;
            let cfg = self.cfg.as_ref().unwrap();
            self.mem_ssa[idx] = Some(MemSsaAnalysis::compute(func, cfg, space));
        }
        Ok(self.mem_ssa[idx].as_ref().unwrap())
    }

    /// Read-only access to an already-requested result. Returns `None`
    /// until the corresponding `request_*` has run; lets a pass hold two
    /// analyses at once.
    pub fn cfg(&self) -> Option<&CfgAnalysis> {
        self.cfg.as_ref()
    }

    pub fn domtree(&self) -> Option<&DominatorTreeAnalysis> {
        self.domtree.as_ref()
    }

    pub fn dfg(&self) -> Option<&DfgAnalysis> {
        self.dfg.as_ref()
    }

    pub fn liveness(&self) -> Option<&LivenessAnalysis> {
        self.liveness.as_ref()
    }

    pub fn available_expressions(&self) -> Option<&AvailableExpressionAnalysis> {
        self.available.as_ref()
    }

    /// Drop an analysis and, transitively, everything declared to depend
    /// on it.
    pub fn invalidate(&mut self, kind: AnalysisKind) {
        self.drop_one(kind);
        for &dep in kind.dependents() {
            self.invalidate(dep);
        }
    }

    fn drop_one(&mut self, kind: AnalysisKind) {
        match kind {
            AnalysisKind::Cfg => self.cfg = None,
            AnalysisKind::DominatorTree => self.domtree = None,
            AnalysisKind::Dfg => self.dfg = None,
            AnalysisKind::Liveness => self.liveness = None,
            AnalysisKind::Loops => self.loops = None,
            AnalysisKind::VarEquivalence => self.equivalence = None,
            AnalysisKind::AvailableExpressions => self.available = None,
            AnalysisKind::MemSsa => self.mem_ssa = [None, None, None],
        }
    }

    pub fn is_valid(&self, kind: AnalysisKind) -> bool {
        match kind {
            AnalysisKind::Cfg => self.cfg.is_some(),
            AnalysisKind::DominatorTree => self.domtree.is_some(),
            AnalysisKind::Dfg => self.dfg.is_some(),
            AnalysisKind::Liveness => self.liveness.is_some(),
            AnalysisKind::Loops => self.loops.is_some(),
            AnalysisKind::VarEquivalence => self.equivalence.is_some(),
            AnalysisKind::AvailableExpressions => self.available.is_some(),
            AnalysisKind::MemSsa => self.mem_ssa.iter().any(Option::is_some),
        }
    }

    /// Invalidate then recompute.
    pub fn force_cfg(&mut self, func: &Function) -> PanicResult<&CfgAnalysis> {
        self.invalidate(AnalysisKind::Cfg);
        self.request_cfg(func)
    }

    pub fn force_liveness(&mut self, func: &Function) -> PanicResult<&LivenessAnalysis> {
        self.invalidate(AnalysisKind::Liveness);
        self.request_liveness(func)
    }

    pub fn force_available_expressions(
        &mut self,
        func: &Function,
    ) -> PanicResult<&AvailableExpressionAnalysis> {
        self.invalidate(AnalysisKind::AvailableExpressions);
        self.request_available_expressions(func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Opcode};

    #[test]
    fn invalidation_cascades() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        func.append_inst(entry, Opcode::Stop, []);

        let mut cache = AnalysesCache::new();
        cache.request_domtree(&func).unwrap();
        cache.request_liveness(&func).unwrap();
        assert!(cache.is_valid(AnalysisKind::Cfg));
        assert!(cache.is_valid(AnalysisKind::DominatorTree));
        assert!(cache.is_valid(AnalysisKind::Liveness));

        cache.invalidate(AnalysisKind::Cfg);
        assert!(!cache.is_valid(AnalysisKind::Cfg));
        assert!(!cache.is_valid(AnalysisKind::DominatorTree));
        assert!(!cache.is_valid(AnalysisKind::Liveness));
    }

    #[test]
    fn dfg_invalidation_spares_the_cfg() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        func.append_inst(entry, Opcode::Stop, []);

        let mut cache = AnalysesCache::new();
        cache.request_cfg(&func).unwrap();
        cache.request_dfg(&func);
        cache.request_equivalence(&func);
        cache.invalidate(AnalysisKind::Dfg);
        assert!(cache.is_valid(AnalysisKind::Cfg));
        assert!(!cache.is_valid(AnalysisKind::Dfg));
        assert!(!cache.is_valid(AnalysisKind::VarEquivalence));
    }
}
