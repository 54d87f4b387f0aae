//! Selector trace format
//!
//! A trace is the recorded output of an instruction selector: for each
//! function, the ordered stream of `emit` and `call_boundary` callbacks it
//! made. Virtual registers in a trace are numbered per function and are
//! mapped onto fresh session-wide virtual registers when replayed.
//!
//! ```json
//! {
//!   "target": "x86_64",
//!   "functions": [{
//!     "name": "main",
//!     "local_frame_bytes": 0,
//!     "ops": [
//!       {"emit": {"opcode": "mov", "operands": [{"imm": 1}, {"vreg": 0}]}},
//!       "call_boundary",
//!       {"emit": {"opcode": "call", "operands": [{"label": "f"}, {"imm": 0}]}}
//!     ]
//!   }]
//! }
//! ```

use mcb_codegen::{Backend, Function, Instruction, Operand, Target, TargetKind};
use mcb_common::{BackendError, Register, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Target the trace was selected for, if recorded
    #[serde(default)]
    pub target: Option<TargetKind>,
    pub functions: Vec<TraceFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFunction {
    pub name: String,
    #[serde(default)]
    pub local_frame_bytes: u32,
    pub ops: Vec<TraceOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOp {
    Emit {
        opcode: String,
        #[serde(default)]
        operands: Vec<TraceOperand>,
    },
    CallBoundary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceReg {
    Reg(String),
    Vreg(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOperand {
    Reg(String),
    Vreg(u32),
    Imm(i64),
    Label(String),
    Mem(TraceMem),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMem {
    #[serde(default)]
    pub disp: i64,
    #[serde(default)]
    pub base: Option<TraceReg>,
    #[serde(default)]
    pub index: Option<TraceReg>,
    #[serde(default = "default_scale")]
    pub scale: u32,
}

fn default_scale() -> u32 {
    1
}

impl Trace {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// A decoded op. Virtual registers still carry their trace-local index.
enum Decoded<O> {
    Emit(Instruction<O>),
    CallBoundary,
}

/// Replay one traced function through the session's builder
pub fn build_function<T: Target>(backend: &mut Backend<T>, func: &TraceFunction) -> Result<Function<T::Opcode>> {
    let decoded = decode_ops(backend.target(), func)?;

    let mut builder = backend.begin_function(func.name.clone(), func.local_frame_bytes);
    let mut vregs: HashMap<u32, Register> = HashMap::new();
    for op in decoded {
        match op {
            Decoded::CallBoundary => builder.record_call_boundary(),
            Decoded::Emit(mut inst) => {
                for (index, position, reg) in inst.register_slots() {
                    let Some(local) = reg.virtual_index() else {
                        continue;
                    };
                    let fresh = *vregs.entry(local).or_insert_with(|| builder.new_vreg());
                    if let Some(slot) = inst.operands[index].register_at_mut(position) {
                        *slot = fresh;
                    }
                }
                builder.emit_inst(inst);
            }
        }
    }
    Ok(builder.finish())
}

fn decode_ops<T: Target>(target: &T, func: &TraceFunction) -> Result<Vec<Decoded<T::Opcode>>> {
    func.ops
        .iter()
        .map(|op| match op {
            TraceOp::CallBoundary => Ok(Decoded::CallBoundary),
            TraceOp::Emit { opcode, operands } => {
                let opcode = opcode.parse::<T::Opcode>().map_err(|_| BackendError::UnknownOpcode {
                    target: target.kind().to_string(),
                    name: opcode.clone(),
                })?;
                let operands = operands
                    .iter()
                    .map(|operand| decode_operand(target, operand))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Decoded::Emit(Instruction::new(opcode, operands)))
            }
        })
        .collect()
}

fn decode_operand<T: Target>(target: &T, operand: &TraceOperand) -> Result<Operand> {
    Ok(match operand {
        TraceOperand::Reg(name) => Operand::reg(physical(target, name)?),
        TraceOperand::Vreg(index) => Operand::reg(virtual_reg(*index)?),
        TraceOperand::Imm(value) => Operand::imm(*value),
        TraceOperand::Label(name) => Operand::label(name.clone()),
        TraceOperand::Mem(mem) => Operand::mem_indexed(
            mem.disp,
            decode_reg(target, mem.base.as_ref())?,
            decode_reg(target, mem.index.as_ref())?,
            mem.scale,
        ),
    })
}

fn decode_reg<T: Target>(target: &T, reg: Option<&TraceReg>) -> Result<Register> {
    match reg {
        None => Ok(Register::NONE),
        Some(TraceReg::Reg(name)) => physical(target, name),
        Some(TraceReg::Vreg(index)) => virtual_reg(*index),
    }
}

fn virtual_reg(index: u32) -> Result<Register> {
    Register::try_virtual_reg(index).ok_or(BackendError::VirtualRegisterOutOfRange { index })
}

fn physical<T: Target>(target: &T, name: &str) -> Result<Register> {
    target
        .register_by_name(name)
        .ok_or_else(|| BackendError::UnknownRegister {
            target: target.kind().to_string(),
            name: name.to_string(),
        })
}
