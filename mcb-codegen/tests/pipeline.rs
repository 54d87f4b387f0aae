//! End-to-end tests: build functions through a session, compile, print

use mcb_codegen::target::riscv::{self, RiscVOpcode};
use mcb_codegen::target::x86::{self, X86Opcode};
use mcb_codegen::{Backend, BackendConfig, Operand, RiscVTarget, Target, X86Target};
use mcb_common::Register;
use pretty_assertions::assert_eq;

fn body_lines(asm: &str) -> Vec<&str> {
    asm.lines().skip(3).collect()
}

/// Displacements of every `N(%rbp)` reference in x86 output
fn rbp_offsets(asm: &str) -> Vec<i64> {
    asm.lines()
        .flat_map(|line| line.split(|c| c == ' ' || c == ','))
        .filter_map(|tok| tok.strip_suffix("(%rbp)"))
        .filter_map(|disp| disp.parse().ok())
        .collect()
}

#[test]
fn test_sequential_values_reuse_one_register() {
    let mut backend = Backend::new(X86Target::with_allocatable(vec![x86::RCX]));
    let func = {
        let mut b = backend.begin_function("seq", 0);
        let a = b.new_vreg();
        let c = b.new_vreg();
        b.emit(X86Opcode::Mov, vec![Operand::imm(1), Operand::reg(a)]);
        b.emit(X86Opcode::Add, vec![Operand::imm(2), Operand::reg(a)]);
        b.emit(X86Opcode::Push, vec![Operand::reg(a)]);
        b.emit(X86Opcode::Mov, vec![Operand::imm(3), Operand::reg(c)]);
        b.emit(X86Opcode::Add, vec![Operand::imm(4), Operand::reg(c)]);
        b.emit(X86Opcode::Push, vec![Operand::reg(c)]);
        b.finish()
    };
    let compiled = backend.compile(func).unwrap();
    assert_eq!(compiled.allocation.spill_count(), 0);
    assert_eq!(compiled.allocation.get(Register::virtual_reg(0)), Some(x86::RCX));
    assert_eq!(compiled.allocation.get(Register::virtual_reg(1)), Some(x86::RCX));
}

#[test]
fn test_overlapping_values_spill_with_one_register() {
    let mut backend = Backend::new(X86Target::with_allocatable(vec![x86::RCX, x86::RDX]));
    let (a, c, func) = {
        let mut b = backend.begin_function("overlap", 0);
        let a = b.new_vreg();
        let c = b.new_vreg();
        b.emit(X86Opcode::Mov, vec![Operand::imm(1), Operand::reg(a)]);
        b.emit(X86Opcode::Mov, vec![Operand::imm(2), Operand::reg(x86::RDX)]);
        b.emit(X86Opcode::Mov, vec![Operand::imm(3), Operand::reg(c)]);
        b.emit(X86Opcode::Push, vec![Operand::reg(x86::RDX)]);
        b.emit(X86Opcode::Add, vec![Operand::reg(a), Operand::reg(c)]);
        b.emit(X86Opcode::Push, vec![Operand::reg(c)]);
        (a, c, b.finish())
    };
    let compiled = backend.compile(func).unwrap();

    // RDX is pinned at points 1 and 3, so a [0, 5) and c [2, 6) compete for RCX
    assert_eq!(compiled.allocation.get(a), Some(x86::RCX));
    assert!(compiled.allocation.is_spilled(c));
    assert_eq!(compiled.allocation.spill_count(), 1);
    assert_eq!(compiled.frame.spill_slots, 1);
    assert_eq!(compiled.frame.reserved_slots, 1);

    let asm = backend.print(&compiled);
    assert!(!asm.contains("vreg"));
    assert_eq!(
        body_lines(&asm),
        vec![
            "\tpushq %rbp",
            "\tmovq %rsp, %rbp",
            "\tsubq $16, %rsp",
            "\tmovq $1, %rcx",
            "\tmovq $2, %rdx",
            "\tmovq %rcx, -16(%rbp)",
            "\tmovq -8(%rbp), %rcx",
            "\tmovq $3, %rcx",
            "\tmovq %rcx, -8(%rbp)",
            "\tmovq -16(%rbp), %rcx",
            "\tpushq %rdx",
            "\tmovq %rdx, -16(%rbp)",
            "\tmovq -8(%rbp), %rdx",
            "\taddq %rcx, %rdx",
            "\tmovq %rdx, -8(%rbp)",
            "\tmovq -16(%rbp), %rdx",
            "\tmovq %rcx, -16(%rbp)",
            "\tmovq -8(%rbp), %rcx",
            "\tpushq %rcx",
            "\tmovq %rcx, -8(%rbp)",
            "\tmovq -16(%rbp), %rcx",
            "\taddq $16, %rsp",
            "\tpopq %rbp",
            "\tretq",
        ]
    );
}

#[test]
fn test_value_across_call_lands_in_callee_saved_register() {
    let mut backend = Backend::new(RiscVTarget::new());
    let func = {
        let mut b = backend.begin_function("f", 0);
        let x = b.new_vreg();
        b.emit(RiscVOpcode::Li, vec![Operand::reg(x), Operand::imm(5)]);
        b.emit(RiscVOpcode::Mv, vec![Operand::reg(riscv::A0), Operand::reg(x)]);
        b.emit_call(RiscVOpcode::Call, Operand::label("g"), 1);
        b.emit(
            RiscVOpcode::Add,
            vec![Operand::reg(riscv::A0), Operand::reg(riscv::A0), Operand::reg(x)],
        );
        b.finish()
    };
    let compiled = backend.compile(func).unwrap();
    assert_eq!(compiled.frame.saved_regs, vec![riscv::S1]);

    assert_eq!(
        backend.print(&compiled),
        [
            "\t.globl f",
            "\t.type f, @function",
            "f:",
            "\taddi sp, sp, -32",
            "\tsd ra, 0(sp)",
            "\tsd fp, 8(sp)",
            "\tsd s1, 16(sp)",
            "\taddi fp, sp, 0",
            "\tli s1, 5",
            "\tmv a0, s1",
            "\tcall g",
            "\tadd a0, a0, s1",
            "\tld ra, 0(sp)",
            "\tld fp, 8(sp)",
            "\tld s1, 16(sp)",
            "\taddi sp, sp, 32",
            "\tret",
            "",
        ]
        .join("\n")
    );
}

#[test]
fn test_entry_function_skips_callee_saved_preservation() {
    let build = |backend: &mut Backend<RiscVTarget>| {
        let mut b = backend.begin_function("main", 0);
        let x = b.new_vreg();
        b.emit(RiscVOpcode::Li, vec![Operand::reg(x), Operand::imm(1)]);
        b.emit_call(RiscVOpcode::Call, Operand::label("g"), 0);
        b.emit(RiscVOpcode::Mv, vec![Operand::reg(riscv::A0), Operand::reg(x)]);
        b.finish()
    };

    let mut backend = Backend::new(RiscVTarget::new());
    let func = build(&mut backend);
    let compiled = backend.compile(func).unwrap();
    assert!(compiled.frame.saved_regs.is_empty());
    assert_eq!(compiled.frame.total_bytes(), 16);
    assert!(!backend.print(&compiled).contains("sd s1"));

    let config = BackendConfig {
        entry_function: None,
        ..BackendConfig::default()
    };
    let mut backend = Backend::with_config(RiscVTarget::new(), config);
    let func = build(&mut backend);
    let compiled = backend.compile(func).unwrap();
    assert_eq!(compiled.frame.saved_regs, vec![riscv::S1]);
}

#[test]
fn test_register_pressure_spills_cleanly() {
    let target = X86Target::with_allocatable(vec![x86::RAX, x86::RCX, x86::RDX]);
    let mut backend = Backend::new(target);
    let func = {
        let mut b = backend.begin_function("sum", 16);
        let values: Vec<Register> = (0..6).map(|_| b.new_vreg()).collect();
        for (i, &v) in values.iter().enumerate() {
            b.emit(X86Opcode::Mov, vec![Operand::imm(i as i64), Operand::reg(v)]);
        }
        for &v in &values[1..] {
            b.emit(X86Opcode::Add, vec![Operand::reg(v), Operand::reg(values[0])]);
        }
        b.emit(X86Opcode::Mov, vec![Operand::reg(values[0]), Operand::reg(x86::RAX)]);
        b.finish()
    };
    let compiled = backend.compile(func).unwrap();
    let asm = backend.print(&compiled);

    assert!(compiled.allocation.spill_count() > 0);
    assert!(!asm.contains("vreg"));
    assert_eq!(compiled.frame.total_bytes() % 16, 0);

    // Every frame reference lands below the locals and inside the frame
    let lowest = -i64::from(compiled.frame.padded_body_bytes());
    let offsets = rbp_offsets(&asm);
    assert!(!offsets.is_empty());
    for offset in offsets {
        assert!(offset < -16 && offset >= lowest, "offset {offset} outside frame");
    }
    assert!(asm.contains(&format!("subq ${}, %rsp", compiled.frame.padded_body_bytes())));
}

#[test]
fn test_virtual_registers_unique_across_session() {
    let mut backend = Backend::new(X86Target::new());
    let first = backend.begin_function("a", 0).new_vreg();
    let second = backend.begin_function("b", 0).new_vreg();
    assert_ne!(first, second);
}

#[test]
fn test_program_printing() {
    let mut backend = Backend::new(X86Target::new());
    let mut compiled = Vec::new();
    for name in ["one", "two"] {
        let func = {
            let mut b = backend.begin_function(name, 0);
            let v = b.new_vreg();
            b.emit(X86Opcode::Xor, vec![Operand::reg(v), Operand::reg(v)]);
            b.emit(X86Opcode::Mov, vec![Operand::reg(v), Operand::reg(x86::RAX)]);
            b.finish()
        };
        compiled.push(backend.compile(func).unwrap());
    }
    let asm = backend.print_program(&compiled);
    assert!(asm.starts_with("\t.text\n"));
    let one = asm.find("one:").unwrap();
    let two = asm.find("two:").unwrap();
    assert!(one < two);
    assert_eq!(asm.matches("retq").count(), 2);
    assert_eq!(backend.target().kind().to_string(), "x86_64");
}
