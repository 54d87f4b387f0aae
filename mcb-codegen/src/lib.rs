//! Machine Code Backend - Code Generation
//!
//! This crate takes instruction streams produced by an instruction selector
//! and turns them into final assembly:
//!
//! - Live range tracking while instructions are emitted
//! - Linear scan register allocation
//! - Spill code, prologue and epilogue insertion
//! - x86-64 and RISC-V 64 target descriptions and printers

pub mod asm;
pub mod backend;
pub mod config;
pub mod emit;
pub mod frame;
pub mod function;
pub mod list;
pub mod liveness;
pub mod regalloc;
pub mod rewrite;
pub mod target;

pub use asm::{Instruction, MemOperand, Operand, RegPosition};
pub use backend::{Backend, CompiledFunction};
pub use config::BackendConfig;
pub use emit::{emit_function, emit_program};
pub use frame::FrameLayout;
pub use function::{Function, FunctionBuilder};
pub use list::{InstId, InstList};
pub use liveness::{LiveRange, LiveRanges, Liveness};
pub use regalloc::{Allocation, LinearScanAllocator, LiveInterval};
pub use rewrite::Rewriter;
pub use target::{RiscVOpcode, RiscVTarget, Target, TargetKind, X86Opcode, X86Target};
