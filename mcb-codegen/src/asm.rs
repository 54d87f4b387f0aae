//! Assembly Operand and Instruction Definitions
//!
//! Instructions are target-neutral containers: an opcode chosen by the
//! target plus an ordered list of operands. Operand order follows the
//! target's assembly syntax (source first for x86 AT&T, destination first
//! for RISC-V).

use mcb_common::Register;
use std::fmt;

/// Memory reference `disp(base, index, scale)`
///
/// `base` and `index` may be [`Register::NONE`] when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemOperand {
    pub disp: i64,
    pub base: Register,
    pub index: Register,
    pub scale: u32,
}

/// Where a register sits inside an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPosition {
    /// The operand itself is a register
    Direct,
    /// Base register of a memory operand
    Base,
    /// Index register of a memory operand
    Index,
}

/// An instruction operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Register),
    Mem(MemOperand),
    Imm(i64),
    Label(String),
}

impl Operand {
    pub fn reg(reg: Register) -> Self {
        Operand::Reg(reg)
    }

    pub fn imm(value: i64) -> Self {
        Operand::Imm(value)
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }

    /// `disp(base)`
    pub fn mem(disp: i64, base: Register) -> Self {
        Operand::Mem(MemOperand {
            disp,
            base,
            index: Register::NONE,
            scale: 1,
        })
    }

    /// `disp(base, index, scale)`
    pub fn mem_indexed(disp: i64, base: Register, index: Register, scale: u32) -> Self {
        Operand::Mem(MemOperand {
            disp,
            base,
            index,
            scale,
        })
    }

    pub fn as_reg(&self) -> Option<Register> {
        match self {
            Operand::Reg(reg) => Some(*reg),
            _ => None,
        }
    }

    pub fn as_imm(&self) -> Option<i64> {
        match self {
            Operand::Imm(value) => Some(*value),
            _ => None,
        }
    }

    /// Every register referenced by this operand, memory base/index included.
    /// Absent (`NONE`) registers are skipped.
    pub fn register_positions(&self) -> impl Iterator<Item = (RegPosition, Register)> {
        let (first, second) = match self {
            Operand::Reg(reg) => (Some((RegPosition::Direct, *reg)), None),
            Operand::Mem(mem) => (
                Some((RegPosition::Base, mem.base)),
                Some((RegPosition::Index, mem.index)),
            ),
            Operand::Imm(_) | Operand::Label(_) => (None, None),
        };
        first
            .into_iter()
            .chain(second)
            .filter(|(_, reg)| !reg.is_none())
    }

    pub fn registers(&self) -> impl Iterator<Item = Register> {
        self.register_positions().map(|(_, reg)| reg)
    }

    /// Mutable access to the register at `position`, if the operand has one there
    pub fn register_at_mut(&mut self, position: RegPosition) -> Option<&mut Register> {
        match (self, position) {
            (Operand::Reg(reg), RegPosition::Direct) => Some(reg),
            (Operand::Mem(mem), RegPosition::Base) => Some(&mut mem.base),
            (Operand::Mem(mem), RegPosition::Index) => Some(&mut mem.index),
            _ => None,
        }
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::Reg(reg)
    }
}

/// Target-neutral rendering, used in logs. Targets have their own printers.
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Imm(value) => write!(f, "${}", value),
            Operand::Label(name) => write!(f, "{}", name),
            Operand::Mem(mem) => {
                write!(f, "{}(", mem.disp)?;
                if !mem.base.is_none() {
                    write!(f, "{}", mem.base)?;
                }
                if !mem.index.is_none() {
                    write!(f, ", {}, {}", mem.index, mem.scale)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A machine instruction: opcode plus ordered operands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<O> {
    pub opcode: O,
    pub operands: Vec<Operand>,
}

impl<O> Instruction<O> {
    pub fn new(opcode: O, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }

    /// Instruction without operands (`ret`, `cqto`, ...)
    pub fn bare(opcode: O) -> Self {
        Self {
            opcode,
            operands: Vec::new(),
        }
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    /// All registers referenced by the operands, in operand order
    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        self.operands.iter().flat_map(|op| op.registers())
    }

    /// `(operand index, position, register)` for every referenced register
    pub fn register_slots(&self) -> Vec<(usize, RegPosition, Register)> {
        self.operands
            .iter()
            .enumerate()
            .flat_map(|(i, op)| op.register_positions().map(move |(pos, reg)| (i, pos, reg)))
            .collect()
    }

    pub fn has_virtual_registers(&self) -> bool {
        self.registers().any(|reg| reg.is_virtual())
    }
}

impl<O: fmt::Display> fmt::Display for Instruction<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}
