//! Machine functions and the builder used by instruction selectors

use crate::asm::{Instruction, Operand};
use crate::list::{InstId, InstList};
use crate::liveness::Liveness;
use log::debug;
use mcb_common::{Register, VirtRegCounter};

/// A function in machine form: instructions plus the liveness recorded
/// while they were emitted
#[derive(Debug, Clone)]
pub struct Function<O> {
    pub name: String,
    /// Bytes of locals the instruction selector reserved below the frame
    /// pointer. Spill slots are laid out after them.
    pub local_frame_bytes: u32,
    pub insts: InstList<O>,
    pub liveness: Liveness,
}

impl<O> Function<O> {
    pub fn new(name: impl Into<String>, local_frame_bytes: u32) -> Self {
        Self {
            name: name.into(),
            local_frame_bytes,
            insts: InstList::new(),
            liveness: Liveness::new(),
        }
    }

    /// Program point the next appended instruction will occupy
    pub fn current_point(&self) -> u32 {
        self.insts.len() as u32
    }

    /// Append an instruction, recording every register it references at the
    /// instruction's program point.
    pub fn append(&mut self, inst: Instruction<O>) -> InstId {
        let point = self.current_point();
        for reg in inst.registers() {
            self.liveness.record_use(reg, point);
        }
        self.insts.push_back(inst)
    }

    /// Mark the current program point as a call boundary
    pub fn record_call_boundary(&mut self) {
        let point = self.current_point();
        self.liveness.record_call(point);
    }
}

/// Builds one function on behalf of an instruction selector.
///
/// Virtual registers come from the session-wide counter, so ids never
/// collide between functions of the same session.
pub struct FunctionBuilder<'a, O> {
    func: Function<O>,
    vregs: &'a mut VirtRegCounter,
}

impl<'a, O> FunctionBuilder<'a, O> {
    pub fn new(name: impl Into<String>, local_frame_bytes: u32, vregs: &'a mut VirtRegCounter) -> Self {
        Self {
            func: Function::new(name, local_frame_bytes),
            vregs,
        }
    }

    pub fn name(&self) -> &str {
        &self.func.name
    }

    pub fn new_vreg(&mut self) -> Register {
        self.vregs.fresh()
    }

    pub fn emit(&mut self, opcode: O, operands: Vec<Operand>) -> InstId {
        self.func.append(Instruction::new(opcode, operands))
    }

    pub fn emit_inst(&mut self, inst: Instruction<O>) -> InstId {
        self.func.append(inst)
    }

    pub fn record_call_boundary(&mut self) {
        self.func.record_call_boundary();
    }

    /// Emit a call whose operands are `[callee, num_args]`. The call's own
    /// program point is recorded as the call boundary.
    pub fn emit_call(&mut self, opcode: O, callee: Operand, num_args: usize) -> InstId {
        self.record_call_boundary();
        self.emit(opcode, vec![callee, Operand::imm(num_args as i64)])
    }

    pub fn finish(self) -> Function<O> {
        debug!(
            "Finished function '{}': {} instructions, {} call boundaries",
            self.func.name,
            self.func.insts.len(),
            self.func.liveness.call_points().len()
        );
        self.func
    }
}
