//! x86-64 target (System V calling convention, AT&T syntax)
//!
//! Register Usage:
//! - RAX: return value
//! - RDI, RSI, RDX, RCX, R8, R9: arguments 1-6
//! - RAX..R11: caller-saved
//! - RBX, R12-R15: callee-saved
//! - RSP, RBP: stack and frame pointer, never allocated

use super::{call_argument_count, Target, TargetKind};
use crate::asm::{Instruction, Operand};
use crate::frame::FrameLayout;
use mcb_common::Register;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const RAX: Register = Register::physical(1);
pub const RDI: Register = Register::physical(2);
pub const RSI: Register = Register::physical(3);
pub const RDX: Register = Register::physical(4);
pub const RCX: Register = Register::physical(5);
pub const R8: Register = Register::physical(6);
pub const R9: Register = Register::physical(7);
pub const R10: Register = Register::physical(8);
pub const R11: Register = Register::physical(9);
pub const RSP: Register = Register::physical(10);
pub const RBP: Register = Register::physical(11);
pub const RBX: Register = Register::physical(12);
pub const R12: Register = Register::physical(13);
pub const R13: Register = Register::physical(14);
pub const R14: Register = Register::physical(15);
pub const R15: Register = Register::physical(16);

const NAMES: [&str; 16] = [
    "rax", "rdi", "rsi", "rdx", "rcx", "r8", "r9", "r10", "r11", "rsp", "rbp", "rbx", "r12", "r13",
    "r14", "r15",
];

pub const CALLER_SAVED: [Register; 9] = [RAX, RDI, RSI, RDX, RCX, R8, R9, R10, R11];

pub const CALLEE_SAVED: [Register; 7] = [RSP, RBP, RBX, R12, R13, R14, R15];

pub const ARG_REGISTERS: [Register; 6] = [RDI, RSI, RDX, RCX, R8, R9];

/// Every general purpose register except RSP and RBP
pub const ALLOCATABLE: [Register; 14] = [
    RAX, RDI, RSI, RDX, RCX, R8, R9, R10, R11, RBX, R12, R13, R14, R15,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum X86Opcode {
    Mov,
    Lea,
    Cmp,
    Jmp,
    Je,
    Jne,
    Jg,
    Jle,
    Add,
    Sub,
    Imul,
    Idiv,
    Cqto,
    Call,
    Xor,
    Push,
    Pop,
    Ret,
    Label,
}

impl X86Opcode {
    pub const ALL: [X86Opcode; 19] = [
        X86Opcode::Mov,
        X86Opcode::Lea,
        X86Opcode::Cmp,
        X86Opcode::Jmp,
        X86Opcode::Je,
        X86Opcode::Jne,
        X86Opcode::Jg,
        X86Opcode::Jle,
        X86Opcode::Add,
        X86Opcode::Sub,
        X86Opcode::Imul,
        X86Opcode::Idiv,
        X86Opcode::Cqto,
        X86Opcode::Call,
        X86Opcode::Xor,
        X86Opcode::Push,
        X86Opcode::Pop,
        X86Opcode::Ret,
        X86Opcode::Label,
    ];

    /// Short name, as used in serialized traces
    pub fn name(self) -> &'static str {
        match self {
            X86Opcode::Mov => "mov",
            X86Opcode::Lea => "lea",
            X86Opcode::Cmp => "cmp",
            X86Opcode::Jmp => "jmp",
            X86Opcode::Je => "je",
            X86Opcode::Jne => "jne",
            X86Opcode::Jg => "jg",
            X86Opcode::Jle => "jle",
            X86Opcode::Add => "add",
            X86Opcode::Sub => "sub",
            X86Opcode::Imul => "imul",
            X86Opcode::Idiv => "idiv",
            X86Opcode::Cqto => "cqto",
            X86Opcode::Call => "call",
            X86Opcode::Xor => "xor",
            X86Opcode::Push => "push",
            X86Opcode::Pop => "pop",
            X86Opcode::Ret => "ret",
            X86Opcode::Label => "label",
        }
    }

    /// Assembly mnemonic with the 64-bit operand suffix
    pub fn mnemonic(self) -> &'static str {
        match self {
            X86Opcode::Mov => "movq",
            X86Opcode::Lea => "leaq",
            X86Opcode::Cmp => "cmpq",
            X86Opcode::Add => "addq",
            X86Opcode::Sub => "subq",
            X86Opcode::Imul => "imulq",
            X86Opcode::Idiv => "idivq",
            X86Opcode::Call => "callq",
            X86Opcode::Xor => "xorq",
            X86Opcode::Push => "pushq",
            X86Opcode::Pop => "popq",
            X86Opcode::Ret => "retq",
            other => other.name(),
        }
    }
}

impl fmt::Display for X86Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl FromStr for X86Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        X86Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s || op.mnemonic() == s)
            .ok_or_else(|| format!("unknown x86-64 opcode `{s}`"))
    }
}

/// x86-64 target description
#[derive(Debug, Clone)]
pub struct X86Target {
    allocatable: Vec<Register>,
}

impl Default for X86Target {
    fn default() -> Self {
        Self::new()
    }
}

impl X86Target {
    pub fn new() -> Self {
        Self {
            allocatable: ALLOCATABLE.to_vec(),
        }
    }

    /// Restrict allocation (and scratch selection) to `regs`
    pub fn with_allocatable(regs: Vec<Register>) -> Self {
        Self { allocatable: regs }
    }

    fn reg_name(&self, reg: Register) -> String {
        format!("%{}", self.display_register(reg).trim_start_matches('%'))
    }

    fn format_memory(&self, op: &Operand) -> String {
        let Operand::Mem(mem) = op else {
            return self.format_operand(op);
        };
        if mem.base.is_none() && mem.index.is_none() {
            return mem.disp.to_string();
        }
        let mut out = String::new();
        if mem.disp != 0 {
            out.push_str(&mem.disp.to_string());
        }
        out.push('(');
        if !mem.base.is_none() {
            out.push_str(&self.reg_name(mem.base));
        }
        if !mem.index.is_none() {
            out.push_str(&format!(",{},{}", self.reg_name(mem.index), mem.scale));
        }
        out.push(')');
        out
    }
}

impl Target for X86Target {
    type Opcode = X86Opcode;

    fn kind(&self) -> TargetKind {
        TargetKind::X86_64
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
        RSP
    }

    fn frame_pointer(&self) -> Register {
        RBP
    }

    fn return_register(&self) -> Register {
        RAX
    }

    fn register_name(&self, reg: Register) -> Option<&'static str> {
        if !reg.is_physical() {
            return None;
        }
        NAMES.get(reg.raw() as usize - 1).copied()
    }

    fn register_by_name(&self, name: &str) -> Option<Register> {
        let name = name.trim_start_matches('%');
        NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| Register::physical(i as u32 + 1))
    }

    fn implicit_uses(&self, inst: &Instruction<X86Opcode>) -> Result<Vec<Register>, String> {
        match inst.opcode {
            X86Opcode::Idiv | X86Opcode::Cqto => Ok(vec![RAX, RDX]),
            X86Opcode::Call => {
                let count = call_argument_count(inst)?.min(ARG_REGISTERS.len());
                let mut uses = vec![self.return_register()];
                uses.extend_from_slice(&ARG_REGISTERS[..count]);
                Ok(uses)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn is_call(&self, inst: &Instruction<X86Opcode>) -> bool {
        inst.opcode == X86Opcode::Call
    }

    fn store_to_frame(&self, reg: Register, offset: i64) -> Instruction<X86Opcode> {
        Instruction::new(
            X86Opcode::Mov,
            vec![Operand::reg(reg), Operand::mem(offset, self.frame_pointer())],
        )
    }

    fn load_from_frame(&self, offset: i64, reg: Register) -> Instruction<X86Opcode> {
        Instruction::new(
            X86Opcode::Mov,
            vec![Operand::mem(offset, self.frame_pointer()), Operand::reg(reg)],
        )
    }

    /// `push` saved registers, `push %rbp; movq %rsp, %rbp`, then reserve
    /// the padded body.
    fn prologue(&self, frame: &FrameLayout) -> Vec<Instruction<X86Opcode>> {
        let (sp, fp) = (self.stack_pointer(), self.frame_pointer());
        let mut code: Vec<_> = frame
            .saved_regs
            .iter()
            .map(|&reg| Instruction::new(X86Opcode::Push, vec![Operand::reg(reg)]))
            .collect();
        code.push(Instruction::new(X86Opcode::Push, vec![Operand::reg(fp)]));
        code.push(Instruction::new(X86Opcode::Mov, vec![Operand::reg(sp), Operand::reg(fp)]));
        let body = frame.padded_body_bytes();
        if body > 0 {
            code.push(Instruction::new(
                X86Opcode::Sub,
                vec![Operand::imm(i64::from(body)), Operand::reg(sp)],
            ));
        }
        code
    }

    fn epilogue(&self, frame: &FrameLayout) -> Vec<Instruction<X86Opcode>> {
        let (sp, fp) = (self.stack_pointer(), self.frame_pointer());
        let mut code = Vec::new();
        let body = frame.padded_body_bytes();
        if body > 0 {
            code.push(Instruction::new(
                X86Opcode::Add,
                vec![Operand::imm(i64::from(body)), Operand::reg(sp)],
            ));
        }
        code.push(Instruction::new(X86Opcode::Pop, vec![Operand::reg(fp)]));
        code.extend(
            frame
                .saved_regs
                .iter()
                .rev()
                .map(|&reg| Instruction::new(X86Opcode::Pop, vec![Operand::reg(reg)])),
        );
        code.push(Instruction::bare(X86Opcode::Ret));
        code
    }

    fn format_operand(&self, op: &Operand) -> String {
        match op {
            Operand::Reg(reg) => self.reg_name(*reg),
            Operand::Imm(value) => format!("${value}"),
            Operand::Label(name) => name.clone(),
            Operand::Mem(_) => self.format_memory(op),
        }
    }

    fn format_instruction(&self, inst: &Instruction<X86Opcode>) -> String {
        match (inst.opcode, inst.operands.as_slice()) {
            (X86Opcode::Label, [Operand::Label(name), ..]) => format!("{name}:"),
            (X86Opcode::Call, [target, ..]) => {
                let target = match target {
                    Operand::Label(name) => name.clone(),
                    other => format!("*{}", self.format_operand(other)),
                };
                format!("\t{} {}", inst.opcode, target)
            }
            (X86Opcode::Lea, [Operand::Label(name), dst]) => {
                format!("\t{} {}(%rip), {}", inst.opcode, name, self.format_operand(dst))
            }
            (_, []) => format!("\t{}", inst.opcode),
            (_, operands) => {
                let operands: Vec<String> =
                    operands.iter().map(|op| self.format_operand(op)).collect();
                format!("\t{} {}", inst.opcode, operands.join(", "))
            }
        }
    }
}
