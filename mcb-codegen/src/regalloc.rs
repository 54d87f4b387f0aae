//! Register Allocation
//!
//! Linear scan over the intervals recorded while the function was emitted.
//! Virtual intervals are handled in start order; physical register intervals
//! are "fixed" and only constrain which registers a virtual interval may
//! take. When no register is free, the active interval that lives longest
//! is evicted to a stack slot if that frees a usable register, otherwise the
//! current interval is spilled.
//!
//! Register classes follow the calling convention: an interval that crosses
//! a call must live in a callee-saved register, every other interval in a
//! caller-saved one.

use crate::liveness::{LiveRange, Liveness};
use crate::target::Target;
use log::{debug, trace};
use mcb_common::Register;
use std::collections::BTreeMap;

/// An interval of one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub reg: Register,
    pub start: u32,
    pub end: u32,
    pub used_across_call: bool,
}

impl LiveInterval {
    pub fn new(reg: Register, range: &LiveRange) -> Self {
        Self {
            reg,
            start: range.start,
            end: range.end,
            used_across_call: range.used_across_call,
        }
    }

    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Result of allocating one function: where every virtual register lives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    assignments: BTreeMap<Register, Register>,
    spill_count: u32,
}

impl Allocation {
    pub fn new(assignments: BTreeMap<Register, Register>, spill_count: u32) -> Self {
        Self {
            assignments,
            spill_count,
        }
    }

    /// Physical register or stack slot assigned to `vreg`
    pub fn get(&self, vreg: Register) -> Option<Register> {
        self.assignments.get(&vreg).copied()
    }

    pub fn assignments(&self) -> &BTreeMap<Register, Register> {
        &self.assignments
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, Register)> + '_ {
        self.assignments.iter().map(|(v, a)| (*v, *a))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of stack slots handed out
    pub fn spill_count(&self) -> u32 {
        self.spill_count
    }

    pub fn is_spilled(&self, vreg: Register) -> bool {
        self.get(vreg).is_some_and(|a| a.is_stack_slot())
    }

    /// Callee-saved registers holding a virtual register, deduplicated, in
    /// virtual register order
    pub fn used_callee_saved<T: Target>(&self, target: &T) -> Vec<Register> {
        let mut used = Vec::new();
        for (_, assigned) in self.iter() {
            if assigned.is_physical() && target.is_callee_saved(assigned) && !used.contains(&assigned) {
                used.push(assigned);
            }
        }
        used
    }

    /// Human readable `vreg -> location` lines
    pub fn describe<T: Target>(&self, target: &T) -> Vec<String> {
        self.iter()
            .map(|(vreg, assigned)| match assigned.stack_slot_index() {
                Some(slot) => format!("{vreg} -> [slot {slot}]"),
                None => format!("{vreg} -> {}", target.display_register(assigned)),
            })
            .collect()
    }
}

/// Linear scan register allocator
pub struct LinearScanAllocator<'t, T: Target> {
    target: &'t T,
    /// Physical register intervals, fixed in place
    fixed: Vec<LiveInterval>,
    /// Intervals currently holding a register
    active: Vec<(LiveInterval, Register)>,
    assignments: BTreeMap<Register, Register>,
    next_slot: u32,
}

impl<'t, T: Target> LinearScanAllocator<'t, T> {
    pub fn new(target: &'t T) -> Self {
        Self {
            target,
            fixed: Vec::new(),
            active: Vec::new(),
            assignments: BTreeMap::new(),
            next_slot: 0,
        }
    }

    /// Reset the allocator for a new function
    pub fn reset(&mut self) {
        self.fixed.clear();
        self.active.clear();
        self.assignments.clear();
        self.next_slot = 0;
    }

    pub fn allocate(&mut self, liveness: &Liveness) -> Allocation {
        self.reset();

        let mut unhandled = Vec::new();
        for (reg, ranges) in liveness.iter() {
            let intervals = ranges.iter().map(|range| LiveInterval::new(reg, range));
            if reg.is_virtual() {
                unhandled.extend(intervals);
            } else {
                self.fixed.extend(intervals);
            }
        }
        unhandled.sort_by_key(|li| (li.start, li.end, li.reg));

        debug!(
            "Allocating {} virtual intervals against {} fixed intervals",
            unhandled.len(),
            self.fixed.len()
        );

        for li in unhandled {
            self.expire_old_intervals(li.start);
            match self.find_free_register(&li) {
                Some(reg) => {
                    trace!("  {} [{}, {}) -> {}", li.reg, li.start, li.end, self.target.display_register(reg));
                    self.assignments.insert(li.reg, reg);
                    self.activate(li, reg);
                }
                None => self.spill_at_interval(li),
            }
        }

        debug!(
            "Allocation done: {} virtual registers, {} spill slots",
            self.assignments.len(),
            self.next_slot
        );
        Allocation::new(std::mem::take(&mut self.assignments), self.next_slot)
    }

    /// Drop every active interval that ends at or before `point`
    fn expire_old_intervals(&mut self, point: u32) {
        self.active.retain(|(active, reg)| {
            let keep = active.end > point;
            if !keep {
                trace!("  expire {} (frees {})", active.reg, reg);
            }
            keep
        });
    }

    fn find_free_register(&self, li: &LiveInterval) -> Option<Register> {
        self.target
            .allocatable()
            .iter()
            .copied()
            .find(|&reg| !self.is_active(reg) && self.is_eligible(reg, li))
    }

    fn is_active(&self, reg: Register) -> bool {
        self.active.iter().any(|(_, r)| *r == reg)
    }

    /// `reg` has the right saving class for `li` and no fixed use of it
    /// overlaps `li`
    fn is_eligible(&self, reg: Register, li: &LiveInterval) -> bool {
        let class_ok = if li.used_across_call {
            self.target.is_callee_saved(reg)
        } else {
            self.target.is_caller_saved(reg)
        };
        class_ok
            && !self
                .fixed
                .iter()
                .any(|fixed| fixed.reg == reg && fixed.overlaps(li))
    }

    /// No register is free for `li`. Evict the longest-living active
    /// interval whose register `li` could use, if it outlives `li`;
    /// otherwise spill `li` itself.
    fn spill_at_interval(&mut self, li: LiveInterval) {
        let victim = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, (active, reg))| active.end > li.end && self.is_eligible(*reg, &li))
            .max_by_key(|(_, (active, _))| (active.end, active.reg))
            .map(|(index, _)| index);

        match victim {
            Some(index) => {
                let (evicted, reg) = self.active.remove(index);
                let slot = self.new_slot();
                debug!(
                    "  evict {} [{}, {}) to {} in favour of {}",
                    evicted.reg, evicted.start, evicted.end, slot, li.reg
                );
                self.assignments.insert(evicted.reg, slot);
                self.assignments.insert(li.reg, reg);
                self.activate(li, reg);
            }
            None => {
                let slot = self.new_slot();
                debug!("  spill {} [{}, {}) to {}", li.reg, li.start, li.end, slot);
                self.assignments.insert(li.reg, slot);
            }
        }
    }

    fn activate(&mut self, li: LiveInterval, reg: Register) {
        debug_assert!(!self.is_active(reg), "two active intervals share {reg}");
        self.active.push((li, reg));
    }

    fn new_slot(&mut self) -> Register {
        let slot = Register::stack_slot(self.next_slot);
        self.next_slot += 1;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::x86::{self, X86Target, RAX, RBX, RCX, RDI, RDX, RSI};
    use crate::target::RiscVTarget;
    use pretty_assertions::assert_eq;

    fn v(n: u32) -> Register {
        Register::virtual_reg(n)
    }

    fn live(uses: &[(Register, u32)]) -> Liveness {
        let mut liveness = Liveness::new();
        for &(reg, point) in uses {
            liveness.record_use(reg, point);
        }
        liveness
    }

    #[test]
    fn test_sequential_intervals_share_a_register() {
        let target = X86Target::with_allocatable(vec![RAX]);
        let liveness = live(&[(v(0), 0), (v(0), 2), (v(1), 3), (v(1), 5)]);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RAX));
        assert_eq!(alloc.get(v(1)), Some(RAX));
        assert_eq!(alloc.spill_count(), 0);
    }

    #[test]
    fn test_overlapping_intervals_spill_the_later_one() {
        let target = X86Target::with_allocatable(vec![RAX]);
        // v0 [0, 5), v1 [2, 6)
        let liveness = live(&[(v(0), 0), (v(0), 4), (v(1), 2), (v(1), 5)]);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RAX));
        assert_eq!(alloc.get(v(1)), Some(Register::stack_slot(0)));
        assert_eq!(alloc.spill_count(), 1);
    }

    #[test]
    fn test_longer_active_interval_is_evicted() {
        let target = X86Target::with_allocatable(vec![RAX]);
        // v0 [0, 10), v1 [2, 4)
        let liveness = live(&[(v(0), 0), (v(0), 9), (v(1), 2), (v(1), 3)]);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(Register::stack_slot(0)));
        assert_eq!(alloc.get(v(1)), Some(RAX));
        assert_eq!(alloc.spill_count(), 1);
    }

    #[test]
    fn test_call_crossing_interval_gets_callee_saved() {
        let target = X86Target::with_allocatable(vec![RAX, RBX]);
        let mut liveness = Liveness::new();
        liveness.record_use(v(0), 0);
        liveness.record_call(1);
        liveness.record_use(v(0), 2);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RBX));
        assert_eq!(alloc.used_callee_saved(&target), vec![RBX]);
    }

    #[test]
    fn test_call_crossing_interval_spills_without_callee_saved() {
        let target = X86Target::with_allocatable(vec![RAX, RCX]);
        let mut liveness = Liveness::new();
        liveness.record_use(v(0), 0);
        liveness.record_call(1);
        liveness.record_use(v(0), 2);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert!(alloc.is_spilled(v(0)));
    }

    #[test]
    fn test_eviction_respects_register_class() {
        // v0 crosses a call and holds RBX for a long time; v1 does not cross
        // and may not take RBX, so it is spilled instead of evicting v0.
        let target = X86Target::with_allocatable(vec![RBX]);
        let mut liveness = Liveness::new();
        liveness.record_use(v(0), 0);
        liveness.record_call(1);
        liveness.record_use(v(1), 2);
        liveness.record_use(v(1), 3);
        liveness.record_use(v(0), 9);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RBX));
        assert!(alloc.is_spilled(v(1)));
    }

    #[test]
    fn test_fixed_interval_blocks_register() {
        let target = X86Target::with_allocatable(vec![RDI, RSI]);
        // RDI is pinned over [1, 3) for an argument
        let liveness = live(&[(v(0), 0), (v(0), 4), (RDI, 1), (RDI, 2)]);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RSI));
    }

    #[test]
    fn test_fixed_interval_outside_range_does_not_block() {
        let target = X86Target::with_allocatable(vec![RDI]);
        let liveness = live(&[(v(0), 0), (v(0), 2), (RDI, 3), (RDI, 4)]);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RDI));
    }

    #[test]
    fn test_fixed_interval_touching_end_does_not_block() {
        // v0 [0, 3), RDX pinned at [3, 4): adjacent, not overlapping
        let target = X86Target::with_allocatable(vec![RDX]);
        let liveness = live(&[(v(0), 0), (v(0), 2), (RDX, 3)]);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(alloc.get(v(0)), Some(RDX));
    }

    #[test]
    fn test_every_virtual_register_is_mapped() {
        let target = X86Target::with_allocatable(vec![RAX, RCX]);
        let uses: Vec<(Register, u32)> = (0..8).flat_map(|n| [(v(n), n), (v(n), n + 5)]).collect();
        let alloc = LinearScanAllocator::new(&target).allocate(&live(&uses));
        assert_eq!(alloc.len(), 8);
        for n in 0..8 {
            let assigned = alloc.get(v(n)).unwrap();
            assert!(assigned.is_physical() || assigned.is_stack_slot());
        }
    }

    #[test]
    fn test_overlapping_intervals_never_share_a_register() {
        let target = RiscVTarget::with_allocatable(vec![
            crate::target::riscv::T0,
            crate::target::riscv::T1,
            crate::target::riscv::T2,
        ]);
        let shapes = [(0, 9), (1, 3), (2, 7), (3, 4), (4, 12), (5, 6), (6, 11), (8, 9), (10, 13)];
        let uses: Vec<(Register, u32)> = shapes
            .iter()
            .enumerate()
            .flat_map(|(n, &(s, e))| [(v(n as u32), s), (v(n as u32), e)])
            .collect();
        let liveness = live(&uses);
        let alloc = LinearScanAllocator::new(&target).allocate(&liveness);

        let intervals: Vec<(LiveInterval, Register)> = liveness
            .virtual_registers()
            .map(|(reg, ranges)| (LiveInterval::new(reg, ranges.first().unwrap()), alloc.get(reg).unwrap()))
            .collect();
        for (i, (a, ra)) in intervals.iter().enumerate() {
            for (b, rb) in &intervals[i + 1..] {
                if ra.is_physical() && ra == rb {
                    assert!(!a.overlaps(b), "{} and {} overlap in {}", a.reg, b.reg, ra);
                }
            }
        }

        let mut slots: Vec<u32> = alloc.iter().filter_map(|(_, a)| a.stack_slot_index()).collect();
        slots.sort_unstable();
        assert_eq!(slots, (0..alloc.spill_count()).collect::<Vec<_>>());
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let target = X86Target::new();
        let uses: Vec<(Register, u32)> = (0..30).flat_map(|n| [(v(n), n % 7), (v(n), 20 + n)]).collect();
        let liveness = live(&uses);
        let first = LinearScanAllocator::new(&target).allocate(&liveness);
        let second = LinearScanAllocator::new(&target).allocate(&liveness);
        assert_eq!(first, second);
    }

    #[test]
    fn test_describe() {
        let target = X86Target::new();
        let mut assignments = BTreeMap::new();
        assignments.insert(v(0), x86::RAX);
        assignments.insert(v(1), Register::stack_slot(0));
        let alloc = Allocation::new(assignments, 1);
        assert_eq!(
            alloc.describe(&target),
            vec!["%vreg0 -> rax".to_string(), "%vreg1 -> [slot 0]".to_string()]
        );
    }
}
