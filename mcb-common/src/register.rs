//! Register id space
//!
//! Every register the backend talks about is a plain 32-bit id. The id space
//! is split into four disjoint ranges:
//!
//! - `0`              no register (sentinel)
//! - `[1, 2^30)`      physical registers, numbered by the target
//! - `[2^30, 2^31)`   stack slots, `index = id - 2^30`
//! - `[2^31, 2^32)`   virtual registers, `index = id & !2^31`
//!
//! Classification is purely range-based, so every id belongs to exactly one
//! class and none of the helpers here allocate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The class an id falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegClass {
    None,
    Physical,
    StackSlot,
    Virtual,
}

/// A register id: physical, stack slot, virtual or none
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Register(u32);

impl Register {
    pub const NONE: Register = Register(0);

    pub const FIRST_PHYSICAL: u32 = 1;
    pub const FIRST_STACK_SLOT: u32 = 1 << 30;
    pub const VIRTUAL_FLAG: u32 = 1 << 31;

    /// Wrap a raw id without checking its class
    pub const fn from_raw(raw: u32) -> Self {
        Register(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Physical register number `n` as defined by a target table.
    ///
    /// Panics if `n` is outside `[1, 2^30)`.
    pub const fn physical(n: u32) -> Self {
        assert!(
            n >= Self::FIRST_PHYSICAL && n < Self::FIRST_STACK_SLOT,
            "physical register number out of range"
        );
        Register(n)
    }

    /// Stack slot with the given 0-based index.
    ///
    /// Panics if the index does not fit in the stack-slot range.
    pub const fn stack_slot(index: u32) -> Self {
        assert!(index < Self::VIRTUAL_FLAG - Self::FIRST_STACK_SLOT, "stack slot index too large");
        Register(Self::FIRST_STACK_SLOT + index)
    }

    /// Virtual register with the given 0-based index.
    ///
    /// Panics if the index does not fit in 31 bits.
    pub const fn virtual_reg(index: u32) -> Self {
        assert!(index < Self::VIRTUAL_FLAG, "virtual register index too large");
        Register(index | Self::VIRTUAL_FLAG)
    }

    /// Virtual register with the given index, if it fits in 31 bits
    pub const fn try_virtual_reg(index: u32) -> Option<Self> {
        if index < Self::VIRTUAL_FLAG {
            Some(Register(index | Self::VIRTUAL_FLAG))
        } else {
            None
        }
    }

    pub const fn class(self) -> RegClass {
        if self.0 == 0 {
            RegClass::None
        } else if self.0 < Self::FIRST_STACK_SLOT {
            RegClass::Physical
        } else if self.0 < Self::VIRTUAL_FLAG {
            RegClass::StackSlot
        } else {
            RegClass::Virtual
        }
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn is_physical(self) -> bool {
        Self::FIRST_PHYSICAL <= self.0 && self.0 < Self::FIRST_STACK_SLOT
    }

    pub const fn is_stack_slot(self) -> bool {
        Self::FIRST_STACK_SLOT <= self.0 && self.0 < Self::VIRTUAL_FLAG
    }

    pub const fn is_virtual(self) -> bool {
        self.0 & Self::VIRTUAL_FLAG != 0
    }

    /// Index of a stack slot, `None` for any other class
    pub const fn stack_slot_index(self) -> Option<u32> {
        if self.is_stack_slot() {
            Some(self.0 - Self::FIRST_STACK_SLOT)
        } else {
            None
        }
    }

    /// Index of a virtual register, `None` for any other class
    pub const fn virtual_index(self) -> Option<u32> {
        if self.is_virtual() {
            Some(self.0 & !Self::VIRTUAL_FLAG)
        } else {
            None
        }
    }
}

impl Default for Register {
    fn default() -> Self {
        Register::NONE
    }
}

/// Target-independent rendering. Targets print physical registers by name.
impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class() {
            RegClass::None => write!(f, "%noreg"),
            RegClass::Physical => write!(f, "%phys{}", self.0),
            RegClass::StackSlot => write!(f, "%stackslot{}", self.0 - Self::FIRST_STACK_SLOT),
            RegClass::Virtual => write!(f, "%vreg{}", self.0 & !Self::VIRTUAL_FLAG),
        }
    }
}

/// Hands out virtual registers for one compilation session.
///
/// The counter only moves forward; ids stay unique across every function
/// compiled with the same counter.
#[derive(Debug, Default)]
pub struct VirtRegCounter {
    next: u32,
}

impl VirtRegCounter {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocate the next virtual register
    pub fn fresh(&mut self) -> Register {
        let reg = Register::virtual_reg(self.next);
        self.next += 1;
        reg
    }

    /// Number of virtual registers handed out so far
    pub fn issued(&self) -> u32 {
        self.next
    }
}
