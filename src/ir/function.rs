//! A function: entity arenas for blocks, instructions, and variables, plus
//! the insertion-ordered block map that gives the function its body.

use super::basic_block::BlockData;
use super::entities::{Block, Inst, Var};
use super::instruction::{InstData, OperandList};
use super::opcode::Opcode;
use super::operand::{Label, Operand};
use crate::fx::{FxHashMap, FxIndexMap};
use cranelift_entity::PrimaryMap;

/// The `(name, version)` identity behind a [`Var`] handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarData {
    name: Box<str>,
    version: u32,
}

impl VarData {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

/// One frame of the code-generation diagnostic stack.
#[derive(Clone, Debug, Default)]
pub struct SourceFrame {
    pub ast_source: Option<u32>,
    pub error_msg: Option<String>,
}

/// Function that contains basic blocks.
///
/// The first block appended is the entry. Blocks are kept in insertion
/// order and indexed by label; removing a block forgets it from the body
/// without invalidating outstanding handles.
pub struct Function {
    pub name: Label,
    blocks: PrimaryMap<Block, BlockData>,
    insts: PrimaryMap<Inst, InstData>,
    vars: PrimaryMap<Var, VarData>,
    order: FxIndexMap<Label, Block>,
    last_variable: u32,
    source_stack: Vec<SourceFrame>,
}

impl Function {
    /// Create a function whose entry block carries the function's label.
    pub fn new(name: Label) -> Self {
        let mut func = Self {
            name: name.clone(),
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            vars: PrimaryMap::new(),
            order: FxIndexMap::default(),
            last_variable: 0,
            source_stack: Vec::new(),
        };
        func.append_basic_block(name);
        func
    }

    // ------------------------------------------------------------------
    // Blocks.
    // ------------------------------------------------------------------

    /// Append a new basic block to the function body.
    ///
    /// Panics if the label is already taken; labels are unique within a
    /// function.
    pub fn append_basic_block(&mut self, label: Label) -> Block {
        assert!(
            !self.order.contains_key(&label),
            "duplicate basic block label {label}"
        );
        let block = self.blocks.push(BlockData::new(label.clone()));
        self.order.insert(label, block);
        block
    }

    /// Remove a block from the function body. Its instructions stay in the
    /// arena but are no longer part of the function.
    pub fn remove_basic_block(&mut self, block: Block) {
        let label = self.blocks[block].label.clone();
        self.order.shift_remove(&label);
    }

    pub fn entry(&self) -> Block {
        *self.order.first().expect("function has no blocks").1
    }

    pub fn has_basic_block(&self, label: &Label) -> bool {
        self.order.contains_key(label)
    }

    pub fn get_basic_block(&self, label: &Label) -> Option<Block> {
        self.order.get(label).copied()
    }

    /// Iterate over the body in insertion order.
    pub fn basic_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.order.values().copied()
    }

    /// The body as an owned list, for passes that mutate while iterating.
    pub fn block_ids(&self) -> Vec<Block> {
        self.order.values().copied().collect()
    }

    pub fn num_basic_blocks(&self) -> usize {
        self.order.len()
    }

    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    pub fn label_of(&self, block: Block) -> &Label {
        &self.blocks[block].label
    }

    /// The instruction list of `block` as a fresh vector.
    pub fn block_insts(&self, block: Block) -> Vec<Inst> {
        self.blocks[block].insts.clone()
    }

    /// Drop every block from the body (the arenas are untouched). Used by
    /// passes that rebuild the body in a new order.
    pub fn clear_basic_blocks(&mut self) {
        self.order.clear();
    }

    /// Re-append an existing block to the body, preserving its label.
    pub fn reappend_basic_block(&mut self, block: Block) {
        let label = self.blocks[block].label.clone();
        assert!(!self.order.contains_key(&label));
        self.order.insert(label, block);
    }

    // ------------------------------------------------------------------
    // Variables.
    // ------------------------------------------------------------------

    /// Allocate a fresh numbered variable (`%1`, `%2`, ...).
    pub fn new_variable(&mut self) -> Var {
        self.last_variable += 1;
        let name = self.last_variable.to_string().into_boxed_str();
        self.vars.push(VarData { name, version: 0 })
    }

    /// Allocate a named variable with version zero. The lowering bridge
    /// uses this for source-level names; there is no uniqueness check since
    /// name reuse is what `make_ssa` exists to resolve.
    pub fn named_variable(&mut self, name: &str) -> Var {
        self.vars.push(VarData {
            name: name.into(),
            version: 0,
        })
    }

    /// Allocate a new version of `base`. Version zero is `base` itself.
    pub fn versioned_variable(&mut self, base: Var, version: u32) -> Var {
        if version == 0 {
            return base;
        }
        let name = self.vars[base].name.clone();
        self.vars.push(VarData { name, version })
    }

    pub fn var(&self, var: Var) -> &VarData {
        &self.vars[var]
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    // ------------------------------------------------------------------
    // Instructions.
    // ------------------------------------------------------------------

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    /// Mutable instruction access. Operand-level edits on instructions that
    /// are part of the body must go through
    /// [`InstUpdater`](crate::passes::InstUpdater) so the def-use graph can
    /// be maintained; this accessor is for everything else.
    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }

    /// Append an instruction, allocating a fresh output variable when the
    /// opcode produces one. Returns the instruction and its output.
    pub fn append_inst(
        &mut self,
        block: Block,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
    ) -> (Inst, Option<Var>) {
        let output = if opcode.has_output() {
            Some(self.new_variable())
        } else {
            None
        };
        let inst = self.append_inst_with(block, opcode, operands, output);
        (inst, output)
    }

    /// Append an instruction with an explicit (possibly reused) output.
    pub fn append_inst_with(
        &mut self,
        block: Block,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
        output: Option<Var>,
    ) -> Inst {
        let inst = self.make_inst(opcode, operands, output);
        self.insts[inst].parent = Some(block).into();
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Insert an instruction at `index` within the block.
    pub fn insert_inst_at(
        &mut self,
        block: Block,
        index: usize,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
        output: Option<Var>,
    ) -> Inst {
        let inst = self.make_inst(opcode, operands, output);
        self.insts[inst].parent = Some(block).into();
        self.blocks[block].insts.insert(index, inst);
        inst
    }

    /// Create an instruction in the arena without attaching it to a block,
    /// tagging it with the current diagnostic frame.
    pub fn make_inst(
        &mut self,
        opcode: Opcode,
        operands: impl IntoIterator<Item = Operand>,
        output: Option<Var>,
    ) -> Inst {
        let mut data = InstData::new(opcode, operands);
        data.output = output;
        data.ast_source = self.ast_source();
        data.error_msg = self.error_msg().cloned();
        self.insts.push(data)
    }

    /// Detach an instruction from its block. The arena entry survives.
    pub fn detach_inst(&mut self, inst: Inst) {
        if let Some(block) = self.insts[inst].parent.expand() {
            let insts = &mut self.blocks[block].insts;
            let pos = insts
                .iter()
                .position(|&i| i == inst)
                .expect("instruction not in its parent block");
            insts.remove(pos);
            self.insts[inst].parent = None.into();
        }
    }

    /// Attach a detached instruction at `index` in `block`.
    pub fn attach_inst(&mut self, block: Block, index: usize, inst: Inst) {
        debug_assert!(self.insts[inst].parent.is_none());
        self.insts[inst].parent = Some(block).into();
        self.blocks[block].insts.insert(index, inst);
    }

    /// Replace the instruction list of `block` wholesale. Every instruction
    /// must already have `block` as its parent or be re-parented here.
    pub fn set_block_insts(&mut self, block: Block, insts: Vec<Inst>) {
        for &inst in &insts {
            self.insts[inst].parent = Some(block).into();
        }
        self.blocks[block].insts = insts;
    }

    pub fn position_in_block(&self, inst: Inst) -> Option<usize> {
        let block = self.insts[inst].parent.expand()?;
        self.blocks[block].insts.iter().position(|&i| i == inst)
    }

    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let last = self.blocks[block].last_inst()?;
        if self.insts[last].is_terminator() {
            Some(last)
        } else {
            None
        }
    }

    pub fn is_terminated(&self, block: Block) -> bool {
        self.terminator(block).is_some()
    }

    // ------------------------------------------------------------------
    // Diagnostics.
    // ------------------------------------------------------------------

    pub fn push_source(&mut self, frame: SourceFrame) {
        self.source_stack.push(frame);
    }

    pub fn pop_source(&mut self) {
        self.source_stack.pop().expect("empty source stack");
    }

    pub fn ast_source(&self) -> Option<u32> {
        self.source_stack.last().and_then(|f| f.ast_source)
    }

    pub fn error_msg(&self) -> Option<&String> {
        self.source_stack.last().and_then(|f| f.error_msg.as_ref())
    }

    // ------------------------------------------------------------------
    // Body maintenance.
    // ------------------------------------------------------------------

    /// Chain basic blocks together: any unterminated block jumps to the
    /// next one in body order, and the last falls back to `stop`. The
    /// lowering bridge calls this once before any pass runs.
    pub fn chain_basic_blocks(&mut self) {
        let body = self.block_ids();
        for (i, &block) in body.iter().enumerate() {
            if self.is_terminated(block) {
                continue;
            }
            if let Some(&next) = body.get(i + 1) {
                let target = self.label_of(next).clone();
                self.append_inst(block, Opcode::Jmp, [Operand::Label(target)]);
            } else {
                self.append_inst(block, Opcode::Stop, []);
            }
        }
    }

    /// Remove the given blocks from the body and drop phi operands in the
    /// remaining blocks that reference them. A phi reduced to a single arm
    /// becomes an assignment; one reduced to nothing becomes a nop.
    ///
    /// Returns the number of blocks removed.
    pub fn remove_blocks(&mut self, to_remove: &[Block]) -> usize {
        let mut removed_labels: Vec<Label> = Vec::new();
        for &block in to_remove {
            removed_labels.push(self.blocks[block].label.clone());
            self.remove_basic_block(block);
        }
        if removed_labels.is_empty() {
            return 0;
        }
        let removed: FxHashMap<&Label, ()> =
            removed_labels.iter().map(|l| (l, ())).collect();

        for block in self.block_ids() {
            for inst in self.block_insts(block) {
                if self.insts[inst].opcode != Opcode::Phi {
                    break;
                }
                let keep: OperandList = self.insts[inst]
                    .operands
                    .chunks(2)
                    .filter(|pair| {
                        let label = pair[0].as_label().expect("phi operand: label expected");
                        !removed.contains_key(label)
                    })
                    .flat_map(|pair| pair.iter().cloned())
                    .collect();
                self.reduce_phi(inst, keep);
            }
        }
        removed_labels.len()
    }

    /// Rewrite a phi whose operand pairs have been filtered down to `keep`.
    pub(crate) fn reduce_phi(&mut self, inst: Inst, keep: OperandList) {
        let data = &mut self.insts[inst];
        match keep.len() {
            0 => {
                data.opcode = Opcode::Nop;
                data.operands = OperandList::new();
                data.output = None;
            }
            2 => {
                data.opcode = Opcode::Assign;
                data.operands = OperandList::from_iter([keep[1].clone()]);
            }
            _ => data.operands = keep,
        }
    }

    /// A rough codesize cost, used by inlining policy: one byte-ish unit
    /// per instruction plus the push width of each literal operand.
    pub fn code_size_cost(&self) -> usize {
        self.basic_blocks()
            .flat_map(|b| self.blocks[b].insts.iter())
            .map(|&inst| {
                let data = &self.insts[inst];
                1 + data
                    .operands
                    .iter()
                    .filter(|op| matches!(op, Operand::Lit(_)))
                    .count()
            })
            .sum()
    }
}
