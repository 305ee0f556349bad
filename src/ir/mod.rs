//! Representation of Venom IR: contexts, functions, basic blocks,
//! instructions, operands, and the opcode/effect tables.

pub mod basic_block;
pub mod context;
pub mod effects;
pub mod entities;
pub mod function;
pub mod instruction;
pub mod opcode;
pub mod operand;
pub mod printer;

pub use self::basic_block::BlockData;
pub use self::context::{Context, DataItem, DataSection};
pub use self::effects::Effects;
pub use self::entities::{Block, Inst, Var};
pub use self::function::{Function, SourceFrame, VarData};
pub use self::instruction::{InstData, OperandList};
pub use self::opcode::Opcode;
pub use self::operand::{Label, Literal, Operand};
