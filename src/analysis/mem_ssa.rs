//! Memory SSA, parameterized by address space.
//!
//! Every instruction whose write effects include the space defines a new
//! memory version; every instruction whose read effects include it is a
//! use, reaching either the nearest def above it in its block or, at a
//! block boundary, whatever flows in from the predecessors. Block-boundary
//! joins are kept as sets of incoming versions (the phi nodes of a full
//! memory-SSA construction, flattened), which is all the dead-store
//! consumer needs: a def is live exactly when some use can reach it.

use super::cfg::CfgAnalysis;
use crate::fx::{FxHashMap, FxIndexSet};
use crate::ir::{Block, Effects, Function, Inst, Literal, Opcode, Operand};

/// One of the three mutable address spaces.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AddrSpace {
    Memory,
    Storage,
    Transient,
}

impl AddrSpace {
    pub fn effect(self) -> Effects {
        match self {
            AddrSpace::Memory => Effects::MEMORY,
            AddrSpace::Storage => Effects::STORAGE,
            AddrSpace::Transient => Effects::TRANSIENT,
        }
    }

    /// The plain store opcode of this space.
    pub fn store_opcode(self) -> Opcode {
        match self {
            AddrSpace::Memory => Opcode::Mstore,
            AddrSpace::Storage => Opcode::Sstore,
            AddrSpace::Transient => Opcode::Tstore,
        }
    }

    /// The plain load opcode of this space.
    pub fn load_opcode(self) -> Opcode {
        match self {
            AddrSpace::Memory => Opcode::Mload,
            AddrSpace::Storage => Opcode::Sload,
            AddrSpace::Transient => Opcode::Tload,
        }
    }
}

/// A versioned memory definition.
#[derive(Clone, Debug)]
pub struct MemDef {
    pub version: u32,
    pub inst: Inst,
}

/// A memory use and the versions that reach it.
#[derive(Clone, Debug)]
pub struct MemUse {
    pub inst: Inst,
    /// Nearest def above in the same block, or everything live into the
    /// block when there is none.
    pub reaching: FxIndexSet<u32>,
}

pub struct MemSsaAnalysis {
    pub addr_space: AddrSpace,
    defs: FxHashMap<Block, Vec<MemDef>>,
    uses: FxHashMap<Block, Vec<MemUse>>,
    /// Versions reached by at least one use.
    live_versions: FxIndexSet<u32>,
}

impl MemSsaAnalysis {
    pub fn compute(func: &Function, cfg: &CfgAnalysis, addr_space: AddrSpace) -> Self {
        let effect = addr_space.effect();
        let mut analysis = Self {
            addr_space,
            defs: FxHashMap::default(),
            uses: FxHashMap::default(),
            live_versions: FxIndexSet::default(),
        };

        // Local numbering pass.
        let mut next_version = 0u32;
        // Uses with no def above them in their own block, by block.
        let mut open_uses: FxHashMap<Block, Vec<usize>> = FxHashMap::default();
        for block in func.basic_blocks() {
            let mut block_defs = Vec::new();
            let mut block_uses = Vec::new();
            for &inst in func.block(block).insts() {
                let opcode = func.inst(inst).opcode;
                if opcode.reads().intersects(effect) {
                    let reaching: FxIndexSet<u32> = block_defs
                        .last()
                        .map(|d: &MemDef| FxIndexSet::from_iter([d.version]))
                        .unwrap_or_default();
                    if reaching.is_empty() {
                        open_uses.entry(block).or_default().push(block_uses.len());
                    }
                    block_uses.push(MemUse { inst, reaching });
                }
                if opcode.writes().intersects(effect) {
                    block_defs.push(MemDef {
                        version: next_version,
                        inst,
                    });
                    next_version += 1;
                }
            }
            analysis.defs.insert(block, block_defs);
            analysis.uses.insert(block, block_uses);
        }

        // Versions live out of each block: its last def, or whatever flows
        // in. Iterate to a fixed point; sets only grow.
        let mut live_in: FxHashMap<Block, FxIndexSet<u32>> = func
            .basic_blocks()
            .map(|b| (b, FxIndexSet::default()))
            .collect();
        loop {
            let mut changed = false;
            for block in func.basic_blocks() {
                let mut incoming = FxIndexSet::default();
                for &pred in cfg.cfg_in(block) {
                    match analysis.defs[&pred].last() {
                        Some(d) => {
                            incoming.insert(d.version);
                        }
                        None => incoming.extend(live_in[&pred].iter().copied()),
                    }
                }
                if incoming.len() != live_in[&block].len()
                    || !incoming.iter().all(|v| live_in[&block].contains(v))
                {
                    live_in.insert(block, incoming);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Resolve the open uses against the block-entry sets.
        for (block, indices) in open_uses {
            let incoming = live_in[&block].clone();
            let uses = analysis.uses.get_mut(&block).unwrap();
            for idx in indices {
                uses[idx].reaching = incoming.clone();
            }
        }

        for uses in analysis.uses.values() {
            for mem_use in uses {
                analysis.live_versions.extend(mem_use.reaching.iter().copied());
            }
        }
        analysis
    }

    pub fn defs(&self, block: Block) -> &[MemDef] {
        self.defs.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn uses(&self, block: Block) -> &[MemUse] {
        self.uses.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when some use (in any block) reaches this def.
    pub fn is_reached_by_use(&self, def: &MemDef) -> bool {
        self.live_versions.contains(&def.version)
    }

    /// The literal address a plain store writes, if its address operand is
    /// a literal. Store operands are `[value, addr]`.
    pub fn store_address(&self, func: &Function, inst: Inst) -> Option<Literal> {
        let data = func.inst(inst);
        if data.opcode != self.addr_space.store_opcode() {
            return None;
        }
        match data.operands.get(1) {
            Some(Operand::Lit(l)) => Some(*l),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Operand};

    #[test]
    fn overwritten_store_is_not_reached() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, v) = func.append_inst(entry, Opcode::Callvalue, []);
        let v = v.unwrap();
        func.append_inst(entry, Opcode::Mstore, [Operand::Var(v), Operand::lit(0u64)]);
        func.append_inst(entry, Opcode::Mstore, [Operand::Var(v), Operand::lit(0u64)]);
        let (_, _) = func.append_inst(entry, Opcode::Mload, [Operand::lit(0u64)]);
        func.append_inst(entry, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        let ssa = MemSsaAnalysis::compute(&func, &cfg, AddrSpace::Memory);
        let defs = ssa.defs(entry);
        assert_eq!(defs.len(), 2);
        assert!(!ssa.is_reached_by_use(&defs[0]));
        assert!(ssa.is_reached_by_use(&defs[1]));
        assert_eq!(ssa.store_address(&func, defs[0].inst), Some(Literal::from(0u64)));
    }

    #[test]
    fn uses_reach_across_blocks() {
        let mut func = Function::new(Label::new("a"));
        let a = func.entry();
        let b = func.append_basic_block(Label::new("b"));
        let (_, v) = func.append_inst(a, Opcode::Callvalue, []);
        func.append_inst(a, Opcode::Mstore, [Operand::Var(v.unwrap()), Operand::lit(0u64)]);
        func.append_inst(a, Opcode::Jmp, [Operand::Label(Label::new("b"))]);
        func.append_inst(b, Opcode::Mload, [Operand::lit(0u64)]);
        func.append_inst(b, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        let ssa = MemSsaAnalysis::compute(&func, &cfg, AddrSpace::Memory);
        assert!(ssa.is_reached_by_use(&ssa.defs(a)[0]));
    }

    #[test]
    fn spaces_are_independent() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, v) = func.append_inst(entry, Opcode::Callvalue, []);
        func.append_inst(
            entry,
            Opcode::Sstore,
            [Operand::Var(v.unwrap()), Operand::lit(1u64)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        let cfg = CfgAnalysis::compute(&func).unwrap();
        let mem = MemSsaAnalysis::compute(&func, &cfg, AddrSpace::Memory);
        let storage = MemSsaAnalysis::compute(&func, &cfg, AddrSpace::Storage);
        assert!(mem.defs(entry).is_empty());
        assert_eq!(storage.defs(entry).len(), 1);
    }
}
