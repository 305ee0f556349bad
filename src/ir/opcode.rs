//! The closed opcode catalog.
//!
//! Mirrors the EVM opcodes the lowering bridge emits plus the IR pseudo-ops.
//! Every classification the analyses and passes rely on (terminator,
//! CFG-altering, volatile, commutative, effect sets) is an O(1) lookup on
//! the enum rather than a string-set membership test.
//!
//! Operand conventions: EVM opcodes store their operands in reverse of the
//! EVM stack order, so the *last* operand is the first argument the opcode
//! pops (`mstore` is `[value, offset]`, `mcopy` is `[length, src, dst]`).
//! Pseudo-ops document their own layouts: `jnz` is
//! `[cond, then_label, else_label]`, `phi` is alternating
//! `[label, var, ...]` pairs, `invoke` is `[function_label, args...]`.

use super::effects::Effects;
use core::fmt;

/// One opcode tag. `Assign` is the SSA forwarding pseudo-op, historically
/// called `store` (unrelated to `mstore`/`sstore`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Opcode {
    // Arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Sdiv,
    Mod,
    Smod,
    Exp,
    // Comparison.
    Lt,
    Gt,
    Slt,
    Sgt,
    Eq,
    Iszero,
    // Bitwise.
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Sar,
    Sha3,
    // Memory.
    Mload,
    Mstore,
    Mcopy,
    Msize,
    Calldatacopy,
    Codecopy,
    Returndatacopy,
    // Storage.
    Sload,
    Sstore,
    Tload,
    Tstore,
    // Environment.
    Address,
    Balance,
    Selfbalance,
    Origin,
    Caller,
    Callvalue,
    Calldataload,
    Calldatasize,
    Codesize,
    Gasprice,
    Extcodesize,
    Extcodehash,
    Extcodecopy,
    Returndatasize,
    Coinbase,
    Timestamp,
    Number,
    Prevrandao,
    Gaslimit,
    Chainid,
    Basefee,
    Blobbasefee,
    Gas,
    Pc,
    // Calls and logging.
    Call,
    Staticcall,
    Delegatecall,
    Create,
    Create2,
    Log,
    // Control.
    Jmp,
    Jnz,
    Djmp,
    Invoke,
    Ret,
    Stop,
    Return,
    Revert,
    Invalid,
    Exit,
    Selfdestruct,
    Assert,
    // SSA / IR pseudo-ops.
    Phi,
    Assign,
    Param,
    Alloca,
    Palloca,
    Calloca,
    Source,
    Offset,
    Nop,
    Dload,
    Dloadbytes,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Sdiv => "sdiv",
            Mod => "mod",
            Smod => "smod",
            Exp => "exp",
            Lt => "lt",
            Gt => "gt",
            Slt => "slt",
            Sgt => "sgt",
            Eq => "eq",
            Iszero => "iszero",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Shl => "shl",
            Shr => "shr",
            Sar => "sar",
            Sha3 => "sha3",
            Mload => "mload",
            Mstore => "mstore",
            Mcopy => "mcopy",
            Msize => "msize",
            Calldatacopy => "calldatacopy",
            Codecopy => "codecopy",
            Returndatacopy => "returndatacopy",
            Sload => "sload",
            Sstore => "sstore",
            Tload => "tload",
            Tstore => "tstore",
            Address => "address",
            Balance => "balance",
            Selfbalance => "selfbalance",
            Origin => "origin",
            Caller => "caller",
            Callvalue => "callvalue",
            Calldataload => "calldataload",
            Calldatasize => "calldatasize",
            Codesize => "codesize",
            Gasprice => "gasprice",
            Extcodesize => "extcodesize",
            Extcodehash => "extcodehash",
            Extcodecopy => "extcodecopy",
            Returndatasize => "returndatasize",
            Coinbase => "coinbase",
            Timestamp => "timestamp",
            Number => "number",
            Prevrandao => "prevrandao",
            Gaslimit => "gaslimit",
            Chainid => "chainid",
            Basefee => "basefee",
            Blobbasefee => "blobbasefee",
            Gas => "gas",
            Pc => "pc",
            Call => "call",
            Staticcall => "staticcall",
            Delegatecall => "delegatecall",
            Create => "create",
            Create2 => "create2",
            Log => "log",
            Jmp => "jmp",
            Jnz => "jnz",
            Djmp => "djmp",
            Invoke => "invoke",
            Ret => "ret",
            Stop => "stop",
            Return => "return",
            Revert => "revert",
            Invalid => "invalid",
            Exit => "exit",
            Selfdestruct => "selfdestruct",
            Assert => "assert",
            Phi => "phi",
            Assign => "assign",
            Param => "param",
            Alloca => "alloca",
            Palloca => "palloca",
            Calloca => "calloca",
            Source => "source",
            Offset => "offset",
            Nop => "nop",
            Dload => "dload",
            Dloadbytes => "dloadbytes",
        }
    }

    /// True if this opcode ends a basic block.
    pub fn is_terminator(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Jmp | Jnz | Djmp | Ret | Return | Revert | Stop | Invalid | Exit | Selfdestruct
        )
    }

    /// True if this opcode's label operands create CFG edges.
    pub fn is_cfg_altering(self) -> bool {
        use Opcode::*;
        matches!(self, Jmp | Jnz | Djmp)
    }

    pub fn is_commutative(self) -> bool {
        use Opcode::*;
        matches!(self, Add | Mul | And | Or | Xor | Eq)
    }

    /// Pseudo instructions stay pinned at the top of their block and are
    /// never scheduled by the DFT pass.
    pub fn is_pseudo(self) -> bool {
        use Opcode::*;
        matches!(self, Phi | Param | Source)
    }

    /// True if the instruction must not be duplicated, re-executed, or
    /// removed while its output is live-range dead: it observes or changes
    /// machine state beyond its operands.
    pub fn is_volatile(self) -> bool {
        use Opcode::*;
        if !self.writes().is_empty() {
            return true;
        }
        matches!(
            self,
            Param | Log | Assert | Selfdestruct | Call | Staticcall | Delegatecall | Create
                | Create2 | Invoke
        )
    }

    /// Instructions that may not be deduplicated even when their operands
    /// match, excluded from available-expression analysis.
    pub fn is_nonidempotent(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Log | Call | Staticcall | Delegatecall | Create | Create2 | Invoke | Selfdestruct
        )
    }

    /// Instructions not worth tracking as available expressions: cheap
    /// environment reads and pseudo-ops.
    pub fn is_uninteresting_for_cse(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Calldatasize | Gaslimit | Address | Codesize | Assign | Phi | Param | Source | Nop
                | Returndatasize | Gas | Gasprice | Origin | Coinbase | Timestamp | Number
                | Prevrandao | Chainid | Basefee | Blobbasefee | Pc | Msize
        )
    }

    /// True if instructions with this opcode produce an output variable.
    pub fn has_output(self) -> bool {
        use Opcode::*;
        !matches!(
            self,
            Mstore | Sstore | Tstore | Mcopy | Calldatacopy | Codecopy | Returndatacopy
                | Dloadbytes | Log | Nop | Assert | Jmp | Jnz | Djmp | Ret | Stop | Return
                | Revert | Invalid | Exit | Selfdestruct | Source
        )
    }

    /// The effects this opcode reads.
    pub fn reads(self) -> Effects {
        use Opcode::*;
        match self {
            Mload | Mcopy | Sha3 | Log | Return | Revert => Effects::MEMORY,
            Sload => Effects::STORAGE,
            Tload => Effects::TRANSIENT,
            Balance | Selfbalance => Effects::BALANCE,
            Extcodesize | Extcodehash | Extcodecopy => Effects::EXTCODE,
            Returndatasize | Returndatacopy => Effects::RETURNDATA,
            Gas => Effects::GAS,
            Msize => Effects::MSIZE,
            Dload | Dloadbytes => Effects::IMMUTABLES,
            Create | Create2 => Effects::MEMORY | Effects::BALANCE,
            Call | Delegatecall => {
                Effects::MEMORY
                    | Effects::STORAGE
                    | Effects::TRANSIENT
                    | Effects::BALANCE
                    | Effects::EXTCODE
                    | Effects::GAS
            }
            Staticcall => Effects::MEMORY | Effects::STORAGE | Effects::TRANSIENT | Effects::GAS,
            Invoke => Effects::ALL,
            _ => Effects::EMPTY,
        }
    }

    /// The effects this opcode writes. Every opcode that touches memory
    /// also writes `MSIZE`, since accessing a word extends the memory.
    pub fn writes(self) -> Effects {
        use Opcode::*;
        let w = match self {
            Mstore | Mcopy | Calldatacopy | Codecopy | Dload | Dloadbytes => Effects::MEMORY,
            Returndatacopy => Effects::MEMORY,
            Sstore => Effects::STORAGE,
            Tstore => Effects::TRANSIENT,
            Call | Delegatecall => {
                Effects::MEMORY
                    | Effects::STORAGE
                    | Effects::TRANSIENT
                    | Effects::BALANCE
                    | Effects::EXTCODE
                    | Effects::RETURNDATA
                    | Effects::GAS
            }
            Staticcall => Effects::MEMORY | Effects::RETURNDATA | Effects::GAS,
            Create | Create2 => {
                Effects::STORAGE
                    | Effects::TRANSIENT
                    | Effects::BALANCE
                    | Effects::EXTCODE
                    | Effects::RETURNDATA
                    | Effects::GAS
            }
            Invoke => Effects::ALL,
            Selfdestruct => Effects::BALANCE,
            _ => Effects::EMPTY,
        };
        if self.touches_memory() {
            w | Effects::MSIZE
        } else {
            w
        }
    }

    fn touches_memory(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Mload | Mstore | Mcopy | Calldatacopy | Codecopy | Returndatacopy | Sha3 | Log
                | Return | Revert | Call | Staticcall | Delegatecall | Create | Create2 | Dload
                | Dloadbytes
        )
    }

    pub fn from_str(name: &str) -> Option<Opcode> {
        use Opcode::*;
        Some(match name {
            "add" => Add,
            "sub" => Sub,
            "mul" => Mul,
            "div" => Div,
            "sdiv" => Sdiv,
            "mod" => Mod,
            "smod" => Smod,
            "exp" => Exp,
            "lt" => Lt,
            "gt" => Gt,
            "slt" => Slt,
            "sgt" => Sgt,
            "eq" => Eq,
            "iszero" => Iszero,
            "and" => And,
            "or" => Or,
            "xor" => Xor,
            "not" => Not,
            "shl" => Shl,
            "shr" => Shr,
            "sar" => Sar,
            "sha3" => Sha3,
            "mload" => Mload,
            "mstore" => Mstore,
            "mcopy" => Mcopy,
            "msize" => Msize,
            "calldatacopy" => Calldatacopy,
            "codecopy" => Codecopy,
            "returndatacopy" => Returndatacopy,
            "sload" => Sload,
            "sstore" => Sstore,
            "tload" => Tload,
            "tstore" => Tstore,
            "address" => Address,
            "balance" => Balance,
            "selfbalance" => Selfbalance,
            "origin" => Origin,
            "caller" => Caller,
            "callvalue" => Callvalue,
            "calldataload" => Calldataload,
            "calldatasize" => Calldatasize,
            "codesize" => Codesize,
            "gasprice" => Gasprice,
            "extcodesize" => Extcodesize,
            "extcodehash" => Extcodehash,
            "extcodecopy" => Extcodecopy,
            "returndatasize" => Returndatasize,
            "coinbase" => Coinbase,
            "timestamp" => Timestamp,
            "number" => Number,
            "prevrandao" => Prevrandao,
            "gaslimit" => Gaslimit,
            "chainid" => Chainid,
            "basefee" => Basefee,
            "blobbasefee" => Blobbasefee,
            "gas" => Gas,
            "pc" => Pc,
            "call" => Call,
            "staticcall" => Staticcall,
            "delegatecall" => Delegatecall,
            "create" => Create,
            "create2" => Create2,
            "log" => Log,
            "jmp" => Jmp,
            "jnz" => Jnz,
            "djmp" => Djmp,
            "invoke" => Invoke,
            "ret" => Ret,
            "stop" => Stop,
            "return" => Return,
            "revert" => Revert,
            "invalid" => Invalid,
            "exit" => Exit,
            "selfdestruct" => Selfdestruct,
            "assert" => Assert,
            "phi" => Phi,
            "assign" | "store" => Assign,
            "param" => Param,
            "alloca" => Alloca,
            "palloca" => Palloca,
            "calloca" => Calloca,
            "source" => Source,
            "offset" => Offset,
            "nop" => Nop,
            "dload" => Dload,
            "dloadbytes" => Dloadbytes,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_names() {
        for op in [
            Opcode::Add,
            Opcode::Mstore,
            Opcode::Jnz,
            Opcode::Phi,
            Opcode::Assign,
            Opcode::Dloadbytes,
        ] {
            assert_eq!(Opcode::from_str(op.as_str()), Some(op));
        }
        // The historical alias.
        assert_eq!(Opcode::from_str("store"), Some(Opcode::Assign));
        assert_eq!(Opcode::from_str("bogus"), None);
    }

    #[test]
    fn classification() {
        assert!(Opcode::Jnz.is_terminator());
        assert!(Opcode::Jnz.is_cfg_altering());
        assert!(!Opcode::Invoke.is_cfg_altering());
        assert!(Opcode::Mstore.is_volatile());
        assert!(!Opcode::Mload.is_volatile());
        assert!(Opcode::Add.is_commutative());
        assert!(!Opcode::Sub.is_commutative());
        assert!(!Opcode::Mstore.has_output());
        assert!(Opcode::Invoke.has_output());
    }

    #[test]
    fn memory_ops_extend_msize() {
        assert!(Opcode::Mload.writes().contains(Effects::MSIZE));
        assert!(Opcode::Mstore.writes().contains(Effects::MEMORY));
        assert!(Opcode::Msize.reads().contains(Effects::MSIZE));
        assert!(!Opcode::Sload.writes().intersects(Effects::MEMORY));
    }
}
