//! Stack Frame Layout
//!
//! Everything below the frame pointer belongs to the function body:
//!
//! ```text
//! Higher addresses
//! +------------------+
//! | return address   |  (x86: pushed by call, RISC-V: saved ra)
//! | saved regs       |  callee-saved registers the function clobbers
//! | saved fp         |
//! +------------------+ <- FP
//! | locals           |  local_bytes, owned by the instruction selector
//! | spill slot 0     |  FP - (local + rs * 1)
//! | spill slot 1     |  FP - (local + rs * 2)
//! | ...              |
//! | reserved slot 1  |  FP - (local + rs * spills + rs * 1)
//! | reserved slot 2  |  scratch register saves around spill code
//! | padding          |
//! +------------------+ <- SP
//! Lower addresses
//! ```
//!
//! The exact placement of the save area relative to FP is target specific;
//! the body offsets above are shared by every target.

use mcb_common::Register;

/// Round `value` up to the next multiple of `align` (a power of two)
pub fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Frame-pointer relative offset of spill slot `index` (0-based)
pub fn spill_slot_offset(local_bytes: u32, register_size: u32, index: u32) -> i64 {
    -(i64::from(local_bytes) + i64::from(register_size) * (i64::from(index) + 1))
}

/// Frame-pointer relative offset of the `nth` (1-based) reserved slot, used
/// to preserve a scratch register's previous contents around spill code.
/// Reserved slots sit after all `spill_count` spill slots.
pub fn reserved_slot_offset(local_bytes: u32, register_size: u32, spill_count: u32, nth: u32) -> i64 {
    debug_assert!(nth >= 1, "reserved slots are numbered from 1");
    let rs = i64::from(register_size);
    -(i64::from(local_bytes) + rs * i64::from(spill_count) + rs * i64::from(nth))
}

/// Final layout of a function's stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub local_bytes: u32,
    pub spill_slots: u32,
    /// Peak number of scratch registers live at once around spill code
    pub reserved_slots: u32,
    /// Callee-saved registers to preserve, in save order
    pub saved_regs: Vec<Register>,
    pub register_size: u32,
    pub alignment: u32,
}

impl FrameLayout {
    pub fn new(
        local_bytes: u32,
        spill_slots: u32,
        reserved_slots: u32,
        saved_regs: Vec<Register>,
        register_size: u32,
        alignment: u32,
    ) -> Self {
        Self {
            local_bytes,
            spill_slots,
            reserved_slots,
            saved_regs,
            register_size,
            alignment,
        }
    }

    /// Bytes needed below the frame pointer: locals, spills, reserved slots
    pub fn body_bytes(&self) -> u32 {
        self.local_bytes + self.register_size * (self.spill_slots + self.reserved_slots)
    }

    /// Return address, saved frame pointer and saved callee registers
    pub fn save_area_bytes(&self) -> u32 {
        self.register_size * (2 + self.saved_regs.len() as u32)
    }

    /// Whole frame, rounded up to the stack alignment
    pub fn total_bytes(&self) -> u32 {
        align_up(self.body_bytes() + self.save_area_bytes(), self.alignment)
    }

    /// Body size including the alignment padding
    pub fn padded_body_bytes(&self) -> u32 {
        self.total_bytes() - self.save_area_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn layout(local: u32, spills: u32, reserved: u32, saved: usize) -> FrameLayout {
        let saved_regs = (0..saved as u32).map(|n| Register::physical(n + 12)).collect();
        FrameLayout::new(local, spills, reserved, saved_regs, 8, 16)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn test_spill_offsets_strictly_decrease() {
        let offsets: Vec<i64> = (0..6).map(|i| spill_slot_offset(12, 8, i)).collect();
        assert_eq!(offsets[0], -20);
        assert!(offsets.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_reserved_slots_follow_spill_slots() {
        let last_spill = spill_slot_offset(16, 8, 2);
        let first_reserved = reserved_slot_offset(16, 8, 3, 1);
        assert_eq!(last_spill, -40);
        assert_eq!(first_reserved, -48);
        assert_eq!(reserved_slot_offset(16, 8, 3, 2), -56);
    }

    #[test]
    fn test_slot_offsets_are_distinct() {
        let (local, spills, reserved) = (24, 5, 3);
        let mut offsets: Vec<i64> = (0..spills).map(|i| spill_slot_offset(local, 8, i)).collect();
        offsets.extend((1..=reserved).map(|j| reserved_slot_offset(local, 8, spills, j)));
        let mut deduped = offsets.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), offsets.len());
        assert!(offsets.iter().all(|&o| o < -i64::from(local)));
    }

    #[test]
    fn test_total_is_aligned() {
        for local in [0, 4, 8, 13, 40] {
            for spills in 0..4 {
                for saved in 0..4 {
                    let frame = layout(local, spills, 1, saved);
                    assert_eq!(frame.total_bytes() % 16, 0);
                    assert!(frame.total_bytes() >= frame.body_bytes() + frame.save_area_bytes());
                    assert!(frame.padded_body_bytes() >= frame.body_bytes());
                }
            }
        }
    }

    #[test]
    fn test_x86_style_frame_size() {
        // 16 locals + 1 spill + 1 reserved = 32, +16 for ret/rbp, +8 for one saved reg = 56 -> 64
        let frame = layout(16, 1, 1, 1);
        assert_eq!(frame.body_bytes(), 32);
        assert_eq!(frame.total_bytes(), 64);
        assert_eq!(frame.padded_body_bytes(), 40);
    }
}
