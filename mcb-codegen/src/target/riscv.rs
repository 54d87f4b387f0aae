//! RISC-V 64 target (LP64 calling convention)
//!
//! Register Usage:
//! - ZERO: hardwired zero
//! - RA: return address
//! - SP, FP (s0): stack and frame pointer
//! - A0-A7: arguments, A0 also carries the return value
//! - T0-T6: temporaries, caller-saved
//! - S1-S11: callee-saved
//!
//! ZERO, RA, SP, GP, TP and FP are never allocated.

use super::{call_argument_count, Target, TargetKind};
use crate::asm::{Instruction, Operand};
use crate::frame::{align_up, FrameLayout};
use mcb_common::Register;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ZERO: Register = Register::physical(1);
pub const RA: Register = Register::physical(2);
pub const SP: Register = Register::physical(3);
pub const GP: Register = Register::physical(4);
pub const TP: Register = Register::physical(5);
pub const T0: Register = Register::physical(6);
pub const T1: Register = Register::physical(7);
pub const T2: Register = Register::physical(8);
pub const FP: Register = Register::physical(9);
pub const S1: Register = Register::physical(10);
pub const A0: Register = Register::physical(11);
pub const A1: Register = Register::physical(12);
pub const A2: Register = Register::physical(13);
pub const A3: Register = Register::physical(14);
pub const A4: Register = Register::physical(15);
pub const A5: Register = Register::physical(16);
pub const A6: Register = Register::physical(17);
pub const A7: Register = Register::physical(18);
pub const S2: Register = Register::physical(19);
pub const S3: Register = Register::physical(20);
pub const S4: Register = Register::physical(21);
pub const S5: Register = Register::physical(22);
pub const S6: Register = Register::physical(23);
pub const S7: Register = Register::physical(24);
pub const S8: Register = Register::physical(25);
pub const S9: Register = Register::physical(26);
pub const S10: Register = Register::physical(27);
pub const S11: Register = Register::physical(28);
pub const T3: Register = Register::physical(29);
pub const T4: Register = Register::physical(30);
pub const T5: Register = Register::physical(31);
pub const T6: Register = Register::physical(32);

const NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "fp", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

pub const CALLER_SAVED: [Register; 16] = [
    RA, T0, T1, T2, A0, A1, A2, A3, A4, A5, A6, A7, T3, T4, T5, T6,
];

pub const CALLEE_SAVED: [Register; 13] = [SP, FP, S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11];

pub const ARG_REGISTERS: [Register; 8] = [A0, A1, A2, A3, A4, A5, A6, A7];

pub const ALLOCATABLE: [Register; 26] = [
    T0, T1, T2, S1, A0, A1, A2, A3, A4, A5, A6, A7, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11, T3,
    T4, T5, T6,
];

/// Largest frame that a single `addi sp, sp, -N` can allocate
const MAX_ADDI_FRAME: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiscVOpcode {
    Ld,
    Sd,
    Mv,
    Li,
    La,
    Beq,
    Bne,
    Bgt,
    Ble,
    J,
    Add,
    Addi,
    Sub,
    Mul,
    Div,
    Call,
    Jalr,
    Ret,
    Label,
}

impl RiscVOpcode {
    pub const ALL: [RiscVOpcode; 19] = [
        RiscVOpcode::Ld,
        RiscVOpcode::Sd,
        RiscVOpcode::Mv,
        RiscVOpcode::Li,
        RiscVOpcode::La,
        RiscVOpcode::Beq,
        RiscVOpcode::Bne,
        RiscVOpcode::Bgt,
        RiscVOpcode::Ble,
        RiscVOpcode::J,
        RiscVOpcode::Add,
        RiscVOpcode::Addi,
        RiscVOpcode::Sub,
        RiscVOpcode::Mul,
        RiscVOpcode::Div,
        RiscVOpcode::Call,
        RiscVOpcode::Jalr,
        RiscVOpcode::Ret,
        RiscVOpcode::Label,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            RiscVOpcode::Ld => "ld",
            RiscVOpcode::Sd => "sd",
            RiscVOpcode::Mv => "mv",
            RiscVOpcode::Li => "li",
            RiscVOpcode::La => "la",
            RiscVOpcode::Beq => "beq",
            RiscVOpcode::Bne => "bne",
            RiscVOpcode::Bgt => "bgt",
            RiscVOpcode::Ble => "ble",
            RiscVOpcode::J => "j",
            RiscVOpcode::Add => "add",
            RiscVOpcode::Addi => "addi",
            RiscVOpcode::Sub => "sub",
            RiscVOpcode::Mul => "mul",
            RiscVOpcode::Div => "div",
            RiscVOpcode::Call => "call",
            RiscVOpcode::Jalr => "jalr",
            RiscVOpcode::Ret => "ret",
            RiscVOpcode::Label => "label",
        }
    }
}

impl fmt::Display for RiscVOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl FromStr for RiscVOpcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiscVOpcode::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic() == s)
            .ok_or_else(|| format!("unknown riscv64 opcode `{s}`"))
    }
}

/// RISC-V 64 target description
#[derive(Debug, Clone)]
pub struct RiscVTarget {
    allocatable: Vec<Register>,
}

impl Default for RiscVTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RiscVTarget {
    pub fn new() -> Self {
        Self {
            allocatable: ALLOCATABLE.to_vec(),
        }
    }

    /// Restrict allocation (and scratch selection) to `regs`
    pub fn with_allocatable(regs: Vec<Register>) -> Self {
        Self { allocatable: regs }
    }

    fn inst(opcode: RiscVOpcode, operands: Vec<Operand>) -> Instruction<RiscVOpcode> {
        Instruction::new(opcode, operands)
    }

    fn sd(reg: Register, offset: u32, base: Register) -> Instruction<RiscVOpcode> {
        Self::inst(
            RiscVOpcode::Sd,
            vec![Operand::reg(reg), Operand::mem(i64::from(offset), base)],
        )
    }

    fn ld(reg: Register, offset: u32, base: Register) -> Instruction<RiscVOpcode> {
        Self::inst(
            RiscVOpcode::Ld,
            vec![Operand::reg(reg), Operand::mem(i64::from(offset), base)],
        )
    }

    fn addi(dst: Register, src: Register, imm: i64) -> Instruction<RiscVOpcode> {
        Self::inst(
            RiscVOpcode::Addi,
            vec![Operand::reg(dst), Operand::reg(src), Operand::imm(imm)],
        )
    }

    /// Save area (ra, fp, saved registers) rounded to the stack alignment,
    /// for frames too large for an `addi` immediate.
    fn split_save_area(frame: &FrameLayout) -> u32 {
        align_up(frame.save_area_bytes(), frame.alignment)
    }
}

impl Target for RiscVTarget {
    type Opcode = RiscVOpcode;

    fn kind(&self) -> TargetKind {
        TargetKind::RiscV64
    }

    fn caller_saved(&self) -> &[Register] {
        &CALLER_SAVED
    }

    fn callee_saved(&self) -> &[Register] {
        &CALLEE_SAVED
    }

    fn arg_registers(&self) -> &[Register] {
        &ARG_REGISTERS
    }

    fn allocatable(&self) -> &[Register] {
        &self.allocatable
    }

    fn stack_pointer(&self) -> Register {
        SP
    }

    fn frame_pointer(&self) -> Register {
        FP
    }

    fn return_register(&self) -> Register {
        A0
    }

    fn register_name(&self, reg: Register) -> Option<&'static str> {
        if !reg.is_physical() {
            return None;
        }
        NAMES.get(reg.raw() as usize - 1).copied()
    }

    fn register_by_name(&self, name: &str) -> Option<Register> {
        let name = match name {
            "s0" => "fp",
            other => other,
        };
        NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| Register::physical(i as u32 + 1))
    }

    fn implicit_uses(&self, inst: &Instruction<RiscVOpcode>) -> Result<Vec<Register>, String> {
        match inst.opcode {
            RiscVOpcode::Call => {
                let count = call_argument_count(inst)?.min(ARG_REGISTERS.len());
                let mut uses = vec![self.return_register()];
                uses.extend_from_slice(&ARG_REGISTERS[..count]);
                uses.dedup();
                Ok(uses)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn is_call(&self, inst: &Instruction<RiscVOpcode>) -> bool {
        inst.opcode == RiscVOpcode::Call
    }

    fn store_to_frame(&self, reg: Register, offset: i64) -> Instruction<RiscVOpcode> {
        Self::inst(
            RiscVOpcode::Sd,
            vec![Operand::reg(reg), Operand::mem(offset, self.frame_pointer())],
        )
    }

    fn load_from_frame(&self, offset: i64, reg: Register) -> Instruction<RiscVOpcode> {
        Self::inst(
            RiscVOpcode::Ld,
            vec![Operand::reg(reg), Operand::mem(offset, self.frame_pointer())],
        )
    }

    /// Small frames: one `addi` allocates everything, the save area sits on
    /// top of the body and FP points at its bottom.
    ///
    /// Frames past the `addi` range allocate the save area first, point FP
    /// at it, then drop SP by the body size through `t0`.
    fn prologue(&self, frame: &FrameLayout) -> Vec<Instruction<RiscVOpcode>> {
        let (sp, fp) = (self.stack_pointer(), self.frame_pointer());
        let total = frame.total_bytes();
        let mut code = Vec::new();

        if total <= MAX_ADDI_FRAME {
            let body = frame.body_bytes();
            code.push(Self::addi(sp, sp, -i64::from(total)));
            code.push(Self::sd(RA, body, sp));
            code.push(Self::sd(fp, body + 8, sp));
            for (i, &reg) in frame.saved_regs.iter().enumerate() {
                code.push(Self::sd(reg, body + 16 + 8 * i as u32, sp));
            }
            code.push(Self::addi(fp, sp, i64::from(body)));
        } else {
            let save_area = Self::split_save_area(frame);
            code.push(Self::addi(sp, sp, -i64::from(save_area)));
            code.push(Self::sd(RA, 0, sp));
            code.push(Self::sd(fp, 8, sp));
            for (i, &reg) in frame.saved_regs.iter().enumerate() {
                code.push(Self::sd(reg, 16 + 8 * i as u32, sp));
            }
            code.push(Self::addi(fp, sp, 0));
            let body = align_up(frame.body_bytes(), frame.alignment);
            code.push(Self::inst(
                RiscVOpcode::Li,
                vec![Operand::reg(T0), Operand::imm(i64::from(body))],
            ));
            code.push(Self::inst(
                RiscVOpcode::Sub,
                vec![Operand::reg(sp), Operand::reg(sp), Operand::reg(T0)],
            ));
        }
        code
    }

    fn epilogue(&self, frame: &FrameLayout) -> Vec<Instruction<RiscVOpcode>> {
        let (sp, fp) = (self.stack_pointer(), self.frame_pointer());
        let total = frame.total_bytes();
        let mut code = Vec::new();

        if total <= MAX_ADDI_FRAME {
            let body = frame.body_bytes();
            code.push(Self::ld(RA, body, sp));
            code.push(Self::ld(fp, body + 8, sp));
            for (i, &reg) in frame.saved_regs.iter().enumerate() {
                code.push(Self::ld(reg, body + 16 + 8 * i as u32, sp));
            }
            code.push(Self::addi(sp, sp, i64::from(total)));
        } else {
            let save_area = Self::split_save_area(frame);
            code.push(Self::addi(sp, fp, 0));
            code.push(Self::ld(RA, 0, sp));
            code.push(Self::ld(fp, 8, sp));
            for (i, &reg) in frame.saved_regs.iter().enumerate() {
                code.push(Self::ld(reg, 16 + 8 * i as u32, sp));
            }
            code.push(Self::addi(sp, sp, i64::from(save_area)));
        }
        code.push(Instruction::bare(RiscVOpcode::Ret));
        code
    }

    fn format_operand(&self, op: &Operand) -> String {
        match op {
            Operand::Reg(reg) => self.display_register(*reg),
            Operand::Imm(value) => value.to_string(),
            Operand::Label(name) => name.clone(),
            Operand::Mem(mem) => {
                if mem.base.is_none() {
                    mem.disp.to_string()
                } else {
                    format!("{}({})", mem.disp, self.display_register(mem.base))
                }
            }
        }
    }

    fn format_instruction(&self, inst: &Instruction<RiscVOpcode>) -> String {
        match (inst.opcode, inst.operands.as_slice()) {
            (RiscVOpcode::Label, [Operand::Label(name), ..]) => format!("{name}:"),
            (RiscVOpcode::Call, [Operand::Label(name), ..]) => format!("\tcall {name}"),
            (RiscVOpcode::Call, [target, ..]) => format!("\tjalr {}", self.format_operand(target)),
            (_, []) => format!("\t{}", inst.opcode),
            (_, operands) => {
                let operands: Vec<String> =
                    operands.iter().map(|op| self.format_operand(op)).collect();
                format!("\t{} {}", inst.opcode, operands.join(", "))
            }
        }
    }
}
