//! Post-allocation rewriting
//!
//! Turns an allocated function into final machine code in three steps:
//!
//! 1. Replace every virtual register assigned a physical register.
//! 2. Wrap each instruction that still names spilled virtual registers in
//!    spill code. Each spilled operand borrows a scratch register that the
//!    instruction does not touch; the scratch's previous value is parked in
//!    a reserved slot and restored afterwards, so no allocated value is
//!    disturbed.
//! 3. Insert the prologue and epilogue for the resulting frame.

use crate::asm::Instruction;
use crate::frame::{reserved_slot_offset, spill_slot_offset, FrameLayout};
use crate::function::Function;
use crate::list::InstId;
use crate::regalloc::Allocation;
use crate::target::Target;
use log::{debug, trace};
use mcb_common::{BackendError, Register, Result};

pub struct Rewriter<'t, T: Target> {
    target: &'t T,
}

impl<'t, T: Target> Rewriter<'t, T> {
    pub fn new(target: &'t T) -> Self {
        Self { target }
    }

    /// Rewrite `func` in place and return its final frame.
    ///
    /// When `preserve_callee_saved` is false, callee-saved registers used by
    /// the allocation are neither saved nor restored.
    pub fn rewrite(
        &self,
        func: &mut Function<T::Opcode>,
        alloc: &Allocation,
        preserve_callee_saved: bool,
    ) -> Result<FrameLayout> {
        self.replace_assigned_registers(func, alloc)?;
        let reserved_slots = self.insert_spill_code(func, alloc)?;

        let saved_regs = if preserve_callee_saved {
            alloc.used_callee_saved(self.target)
        } else {
            Vec::new()
        };
        let frame = self.target.frame_layout(
            func.local_frame_bytes,
            alloc.spill_count(),
            reserved_slots,
            saved_regs,
        );
        debug!(
            "Frame for '{}': {} local bytes, {} spill slots, {} reserved slots, {} saved registers, {} bytes total",
            func.name,
            frame.local_bytes,
            frame.spill_slots,
            frame.reserved_slots,
            frame.saved_regs.len(),
            frame.total_bytes()
        );

        self.insert_prologue_epilogue(func, &frame);
        Ok(frame)
    }

    /// Replace virtual registers that were assigned a physical register.
    /// Spilled ones are left for [`Self::insert_spill_code`].
    fn replace_assigned_registers(&self, func: &mut Function<T::Opcode>, alloc: &Allocation) -> Result<()> {
        for id in func.insts.ids() {
            for (index, position, reg) in func.insts[id].register_slots() {
                if !reg.is_virtual() {
                    continue;
                }
                let assigned = alloc
                    .get(reg)
                    .ok_or_else(|| self.unmapped(func, id, reg))?;
                if assigned.is_physical() {
                    if let Some(slot) = func.insts[id].operands[index].register_at_mut(position) {
                        *slot = assigned;
                    }
                } else if !assigned.is_stack_slot() {
                    return Err(BackendError::InvalidAssignment {
                        function: func.name.clone(),
                        reg,
                        assigned,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the peak number of reserved slots any single instruction needed
    fn insert_spill_code(&self, func: &mut Function<T::Opcode>, alloc: &Allocation) -> Result<u32> {
        let register_size = self.target.register_size();
        let mut max_reserved = 0;

        for id in func.insts.ids() {
            let slots = func.insts[id].register_slots();
            let mut spilled: Vec<Register> = Vec::new();
            for &(_, _, reg) in &slots {
                if reg.is_virtual() && !spilled.contains(&reg) {
                    spilled.push(reg);
                }
            }
            if spilled.is_empty() {
                continue;
            }

            let mut in_use = self
                .target
                .implicit_uses(&func.insts[id])
                .map_err(|message| BackendError::MalformedOperand {
                    function: func.name.clone(),
                    instruction: self.describe(&func.insts[id]),
                    message,
                })?;
            in_use.extend(func.insts[id].registers().filter(|r| r.is_physical()));
            // A call clobbers caller-saved registers, so their value after
            // the call is not the spilled register's.
            let is_call = self.target.is_call(&func.insts[id]);

            // Reload/restore code goes in front of whatever followed the
            // instruction originally.
            let anchor = func.insts.next(id);
            let mut reserved = 0;

            // One scratch per distinct register, so a register read and
            // written by the same instruction is stored back exactly once.
            for vreg in spilled {
                let slot = alloc
                    .get(vreg)
                    .and_then(|assigned| assigned.stack_slot_index())
                    .ok_or_else(|| self.unmapped(func, id, vreg))?;

                let scratch = self
                    .target
                    .allocatable()
                    .iter()
                    .copied()
                    .find(|&reg| !in_use.contains(&reg) && !(is_call && self.target.is_caller_saved(reg)))
                    .ok_or_else(|| self.no_scratch(func, id, vreg, &in_use))?;
                in_use.push(scratch);
                reserved += 1;

                let slot_offset = spill_slot_offset(func.local_frame_bytes, register_size, slot);
                let reserved_offset =
                    reserved_slot_offset(func.local_frame_bytes, register_size, alloc.spill_count(), reserved);
                trace!(
                    "  {} in '{}': scratch {} (slot {} at {}, saved at {})",
                    vreg,
                    func.name,
                    self.target.display_register(scratch),
                    slot,
                    slot_offset,
                    reserved_offset
                );

                func.insts.insert_before(id, self.target.store_to_frame(scratch, reserved_offset));
                func.insts.insert_before(id, self.target.load_from_frame(slot_offset, scratch));
                for &(index, position, reg) in &slots {
                    if reg != vreg {
                        continue;
                    }
                    if let Some(operand) = func.insts[id].operands[index].register_at_mut(position) {
                        *operand = scratch;
                    }
                }

                let after = [
                    self.target.store_to_frame(scratch, slot_offset),
                    self.target.load_from_frame(reserved_offset, scratch),
                ];
                for inst in after {
                    match anchor {
                        Some(next) => func.insts.insert_before(next, inst),
                        None => func.insts.push_back(inst),
                    };
                }
            }

            max_reserved = max_reserved.max(reserved);
        }

        Ok(max_reserved)
    }

    fn insert_prologue_epilogue(&self, func: &mut Function<T::Opcode>, frame: &FrameLayout) {
        let prologue = self.target.prologue(frame);
        match func.insts.front() {
            Some(first) => {
                for inst in prologue {
                    func.insts.insert_before(first, inst);
                }
            }
            None => {
                for inst in prologue {
                    func.insts.push_back(inst);
                }
            }
        }
        for inst in self.target.epilogue(frame) {
            func.insts.push_back(inst);
        }
    }

    fn describe(&self, inst: &Instruction<T::Opcode>) -> String {
        self.target.format_instruction(inst).trim().to_string()
    }

    fn unmapped(&self, func: &Function<T::Opcode>, id: InstId, reg: Register) -> BackendError {
        BackendError::UnmappedVirtualRegister {
            function: func.name.clone(),
            reg,
            instruction: self.describe(&func.insts[id]),
        }
    }

    fn no_scratch(&self, func: &Function<T::Opcode>, id: InstId, reg: Register, in_use: &[Register]) -> BackendError {
        let in_use: Vec<String> = in_use.iter().map(|&r| self.target.display_register(r)).collect();
        BackendError::NoScratchRegister {
            function: func.name.clone(),
            reg,
            instruction: self.describe(&func.insts[id]),
            in_use: in_use.join(", "),
        }
    }
}
