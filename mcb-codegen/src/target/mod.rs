//! Target descriptions
//!
//! A [`Target`] bundles everything the allocator and rewriter need to know
//! about a machine: its register file and calling convention, the registers
//! an instruction touches without naming them, how to move a register to
//! and from the frame, prologue/epilogue shapes, and assembly syntax.

pub mod riscv;
pub mod x86;

use crate::asm::{Instruction, Operand};
use crate::frame::FrameLayout;
use mcb_common::Register;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

pub use riscv::{RiscVOpcode, RiscVTarget};
pub use x86::{X86Opcode, X86Target};

/// Supported targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "riscv64")]
    RiscV64,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::X86_64 => write!(f, "x86_64"),
            TargetKind::RiscV64 => write!(f, "riscv64"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86_64" | "x86-64" | "x86" | "amd64" => Ok(TargetKind::X86_64),
            "riscv64" | "riscv" | "rv64" => Ok(TargetKind::RiscV64),
            other => Err(format!("unknown target `{other}` (expected x86_64 or riscv64)")),
        }
    }
}

pub trait Target {
    type Opcode: Copy
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + FromStr<Err = String>
        + Serialize
        + DeserializeOwned;

    fn kind(&self) -> TargetKind;

    fn register_size(&self) -> u32 {
        8
    }

    fn stack_alignment(&self) -> u32 {
        16
    }

    fn caller_saved(&self) -> &[Register];

    fn callee_saved(&self) -> &[Register];

    fn arg_registers(&self) -> &[Register];

    /// Registers the allocator may hand out, in preference order. Also the
    /// scan order for spill scratch registers.
    fn allocatable(&self) -> &[Register];

    fn stack_pointer(&self) -> Register;

    fn frame_pointer(&self) -> Register;

    fn return_register(&self) -> Register;

    fn register_name(&self, reg: Register) -> Option<&'static str>;

    fn register_by_name(&self, name: &str) -> Option<Register>;

    /// Physical registers `inst` reads or clobbers without naming them.
    /// The error string describes a malformed instruction.
    fn implicit_uses(&self, inst: &Instruction<Self::Opcode>) -> Result<Vec<Register>, String>;

    /// `inst` calls another function and clobbers every caller-saved register
    fn is_call(&self, inst: &Instruction<Self::Opcode>) -> bool;

    /// Store `reg` to `offset(fp)`
    fn store_to_frame(&self, reg: Register, offset: i64) -> Instruction<Self::Opcode>;

    /// Load `offset(fp)` into `reg`
    fn load_from_frame(&self, offset: i64, reg: Register) -> Instruction<Self::Opcode>;

    fn prologue(&self, frame: &FrameLayout) -> Vec<Instruction<Self::Opcode>>;

    fn epilogue(&self, frame: &FrameLayout) -> Vec<Instruction<Self::Opcode>>;

    fn format_operand(&self, op: &Operand) -> String;

    /// One line of assembly, indentation included
    fn format_instruction(&self, inst: &Instruction<Self::Opcode>) -> String;

    fn is_caller_saved(&self, reg: Register) -> bool {
        self.caller_saved().contains(&reg)
    }

    fn is_callee_saved(&self, reg: Register) -> bool {
        self.callee_saved().contains(&reg)
    }

    fn is_argument_register(&self, reg: Register) -> bool {
        self.arg_registers().contains(&reg)
    }

    /// Target name for physical registers, class-tagged id otherwise
    fn display_register(&self, reg: Register) -> String {
        match self.register_name(reg) {
            Some(name) => name.to_string(),
            None => reg.to_string(),
        }
    }

    fn function_header(&self, name: &str) -> Vec<String> {
        vec![
            format!("\t.globl {name}"),
            format!("\t.type {name}, @function"),
            format!("{name}:"),
        ]
    }

    fn frame_layout(
        &self,
        local_bytes: u32,
        spill_slots: u32,
        reserved_slots: u32,
        saved_regs: Vec<Register>,
    ) -> FrameLayout {
        FrameLayout::new(
            local_bytes,
            spill_slots,
            reserved_slots,
            saved_regs,
            self.register_size(),
            self.stack_alignment(),
        )
    }
}

/// Argument count of a call instruction, carried as an immediate in
/// operand 1
pub(crate) fn call_argument_count<O>(inst: &Instruction<O>) -> Result<usize, String> {
    match inst.operand(1) {
        Some(Operand::Imm(count)) if *count >= 0 => Ok(*count as usize),
        Some(Operand::Imm(count)) => Err(format!("negative call argument count {count}")),
        Some(_) => Err("call argument count must be an immediate".to_string()),
        None => Err("call is missing its argument count operand".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_target_kind_parse() {
        assert_eq!("x86_64".parse::<TargetKind>(), Ok(TargetKind::X86_64));
        assert_eq!("RV64".parse::<TargetKind>(), Ok(TargetKind::RiscV64));
        assert!("arm".parse::<TargetKind>().is_err());
        assert_eq!(TargetKind::RiscV64.to_string(), "riscv64");
    }

    #[test]
    fn test_target_kind_serde_names() {
        let json = serde_json::to_string(&TargetKind::X86_64).unwrap();
        assert_eq!(json, "\"x86_64\"");
        let kind: TargetKind = serde_json::from_str("\"riscv64\"").unwrap();
        assert_eq!(kind, TargetKind::RiscV64);
    }

    #[test]
    fn test_call_argument_count() {
        let ok = Instruction::new("call", vec![Operand::label("f"), Operand::imm(3)]);
        assert_eq!(call_argument_count(&ok), Ok(3));

        let missing = Instruction::new("call", vec![Operand::label("f")]);
        assert!(call_argument_count(&missing).is_err());

        let not_imm = Instruction::new("call", vec![Operand::label("f"), Operand::label("g")]);
        assert!(call_argument_count(&not_imm).is_err());
    }
}
