//! Abstract side-effect categories.
//!
//! Each opcode declares the subset of effects it reads and the subset it
//! writes; ordering constraints between instructions are derived from effect
//! overlap plus data dependency. The set is represented as bits in a `u16`.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

enum EffectBit {
    Memory,
    Storage,
    Transient,
    Balance,
    Extcode,
    Returndata,
    Immutables,
    Gas,
    Msize,
    ControlFlow,
}

const NAMES: [&str; 10] = [
    "memory",
    "storage",
    "transient",
    "balance",
    "extcode",
    "returndata",
    "immutables",
    "gas",
    "msize",
    "control_flow",
];

/// A set of abstract effects.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Effects {
    bits: u16,
}

impl Effects {
    pub const EMPTY: Effects = Effects { bits: 0 };
    pub const MEMORY: Effects = Effects::single(EffectBit::Memory);
    pub const STORAGE: Effects = Effects::single(EffectBit::Storage);
    pub const TRANSIENT: Effects = Effects::single(EffectBit::Transient);
    pub const BALANCE: Effects = Effects::single(EffectBit::Balance);
    pub const EXTCODE: Effects = Effects::single(EffectBit::Extcode);
    pub const RETURNDATA: Effects = Effects::single(EffectBit::Returndata);
    pub const IMMUTABLES: Effects = Effects::single(EffectBit::Immutables);
    pub const GAS: Effects = Effects::single(EffectBit::Gas);
    pub const MSIZE: Effects = Effects::single(EffectBit::Msize);
    pub const CONTROL_FLOW: Effects = Effects::single(EffectBit::ControlFlow);
    pub const ALL: Effects = Effects { bits: (1 << 10) - 1 };

    const fn single(bit: EffectBit) -> Effects {
        Effects { bits: 1 << bit as u16 }
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn contains(self, other: Effects) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn intersects(self, other: Effects) -> bool {
        self.bits & other.bits != 0
    }

    /// Iterate over the individual effects in the set.
    pub fn iter(self) -> impl Iterator<Item = Effects> {
        (0..NAMES.len() as u16).filter_map(move |i| {
            let e = Effects { bits: 1 << i };
            if self.intersects(e) {
                Some(e)
            } else {
                None
            }
        })
    }
}

impl BitOr for Effects {
    type Output = Effects;
    fn bitor(self, rhs: Effects) -> Effects {
        Effects {
            bits: self.bits | rhs.bits,
        }
    }
}

impl BitOrAssign for Effects {
    fn bitor_assign(&mut self, rhs: Effects) {
        self.bits |= rhs.bits;
    }
}

impl fmt::Debug for Effects {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (i, name) in NAMES.iter().enumerate() {
            if self.bits & (1 << i) != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "empty")?;
        }
        Ok(())
    }
}
