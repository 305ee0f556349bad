//! Basic block contents.

use super::entities::Inst;
use super::operand::Label;

/// The contents of one basic block: a label, unique within the function,
/// and the ordered instruction list. Zero or more phi instructions form a
/// prefix of the list; a reachable block's last instruction is a
/// terminator.
#[derive(Clone, Debug)]
pub struct BlockData {
    pub(crate) label: Label,
    pub(crate) insts: Vec<Inst>,
}

impl BlockData {
    pub(crate) fn new(label: Label) -> Self {
        Self {
            label,
            insts: Vec::new(),
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn first_inst(&self) -> Option<Inst> {
        self.insts.first().copied()
    }

    pub fn last_inst(&self) -> Option<Inst> {
        self.insts.last().copied()
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
