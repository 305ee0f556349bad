//! Instruction contents.

use super::entities::Var;
use super::opcode::Opcode;
use super::operand::{Label, Operand};
use crate::ir::Block;
use cranelift_entity::packed_option::PackedOption;
use smallvec::SmallVec;

/// Operand storage. Four inline slots cover everything but calls.
pub type OperandList = SmallVec<[Operand; 4]>;

/// The contents of one instruction.
///
/// Instructions live in the function's instruction arena and are referenced
/// by [`Inst`](super::Inst) handles; `parent` points back at the block that
/// currently lists the instruction, or is none while detached.
#[derive(Clone, Debug)]
pub struct InstData {
    pub opcode: Opcode,
    pub operands: OperandList,
    pub output: Option<Var>,
    pub(crate) parent: PackedOption<Block>,
    /// Opaque front-end tag for diagnostics, carried across every rewrite
    /// that preserves the instruction's meaning.
    pub ast_source: Option<u32>,
    pub error_msg: Option<String>,
    /// Free-form annotation from the lowering bridge (`return_buffer`,
    /// `return_pc`, ...).
    pub annotation: Option<String>,
}

impl InstData {
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = Operand>) -> Self {
        Self {
            opcode,
            operands: operands.into_iter().collect(),
            output: None,
            parent: None.into(),
            ast_source: None,
            error_msg: None,
            annotation: None,
        }
    }

    pub fn parent(&self) -> Option<Block> {
        self.parent.expand()
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    pub fn is_volatile(&self) -> bool {
        self.opcode.is_volatile()
    }

    pub fn is_pseudo(&self) -> bool {
        self.opcode.is_pseudo()
    }

    /// The variables this instruction reads. Phi operands count.
    pub fn input_vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.operands.iter().filter_map(Operand::as_var)
    }

    /// The label operands, in operand order.
    pub fn label_operands(&self) -> impl Iterator<Item = &Label> + '_ {
        self.operands.iter().filter_map(Operand::as_label)
    }

    /// Phi `(incoming block label, incoming variable)` pairs.
    ///
    /// Panics if called on a malformed phi (odd operand list or non-label /
    /// non-variable entries).
    pub fn phi_operands(&self) -> impl Iterator<Item = (&Label, Var)> + '_ {
        debug_assert_eq!(self.opcode, Opcode::Phi);
        self.operands.chunks(2).map(|pair| {
            let label = pair[0].as_label().expect("phi operand: label expected");
            let var = pair[1].as_var().expect("phi operand: variable expected");
            (label, var)
        })
    }

    /// Replace every occurrence of a labels-map key with its value. Used
    /// when blocks are split or renamed.
    pub fn replace_label_operands(&mut self, mapping: &crate::fx::FxHashMap<Label, Label>) {
        for op in self.operands.iter_mut() {
            if let Operand::Label(l) = op {
                if let Some(new) = mapping.get(l) {
                    *op = Operand::Label(new.clone());
                }
            }
        }
    }
}
