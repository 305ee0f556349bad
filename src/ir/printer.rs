//! Textual form of the IR, for logs and test diagnostics.
//!
//! ```text
//! function main {
//!   main:
//!     %1 = callvalue
//!     jnz %1, @then, @else
//!   ...
//! }
//! ```

use super::entities::{Block, Inst, Var};
use super::function::Function;
use super::opcode::Opcode;
use super::operand::Operand;
use core::fmt;

/// Wrapper that prints an operand with the variable names of `func`.
pub struct DisplayOperand<'a> {
    pub func: &'a Function,
    pub operand: &'a Operand,
}

impl fmt::Display for DisplayOperand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.operand {
            Operand::Var(v) => write!(f, "{}", DisplayVar { func: self.func, var: *v }),
            Operand::Lit(l) => write!(f, "{l}"),
            Operand::Label(l) => write!(f, "{l}"),
        }
    }
}

pub struct DisplayVar<'a> {
    pub func: &'a Function,
    pub var: Var,
}

impl fmt::Display for DisplayVar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let data = self.func.var(self.var);
        if data.version() == 0 {
            write!(f, "%{}", data.name())
        } else {
            write!(f, "%{}:{}", data.name(), data.version())
        }
    }
}

pub struct DisplayInst<'a> {
    pub func: &'a Function,
    pub inst: Inst,
}

impl fmt::Display for DisplayInst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let data = self.func.inst(self.inst);
        if let Some(out) = data.output {
            write!(f, "{} = ", DisplayVar { func: self.func, var: out })?;
        }
        write!(f, "{}", data.opcode)?;
        for (i, op) in data.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{}", DisplayOperand { func: self.func, operand: op })?;
        }
        if let Some(ann) = &data.annotation {
            write!(f, " ; {ann}")?;
        }
        Ok(())
    }
}

impl Function {
    pub fn display_inst(&self, inst: Inst) -> DisplayInst<'_> {
        DisplayInst { func: self, inst }
    }

    pub fn display_var(&self, var: Var) -> DisplayVar<'_> {
        DisplayVar { func: self, var }
    }

    fn fmt_block(&self, f: &mut fmt::Formatter, block: Block) -> fmt::Result {
        writeln!(f, "  {}:", self.label_of(block).as_str())?;
        for &inst in self.block(block).insts() {
            writeln!(f, "    {}", self.display_inst(inst))?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "function {} {{", self.name.as_str())?;
        for block in self.basic_blocks() {
            self.fmt_block(f, block)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for super::context::Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for func in self.functions() {
            writeln!(f, "{func}")?;
        }
        for section in &self.data_segment {
            writeln!(f, "data {} {{", section.label.as_str())?;
            for item in &section.items {
                match item {
                    super::context::DataItem::Bytes(bytes) => {
                        writeln!(f, "  db {} bytes", bytes.len())?
                    }
                    super::context::DataItem::Label(l) => writeln!(f, "  dl {l}")?,
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
