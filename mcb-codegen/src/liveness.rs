//! Live range tracking
//!
//! Live ranges are built incrementally while the instruction selector emits
//! code: every register reference at program point `p` extends the
//! register's ranges to cover `p`. Program points are instruction indices in
//! emission order and ranges are half-open `[start, end)`.
//!
//! Virtual registers get a single hole-free interval covering their first to
//! last reference. Physical registers are pinned by calling conventions, so
//! they keep a list of disjoint intervals and gaps are preserved.

use log::trace;
use mcb_common::Register;
use std::collections::BTreeMap;

/// A half-open interval `[start, end)` of program points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: u32,
    pub end: u32,
    /// Set once any recorded call point falls inside the interval. Never
    /// cleared.
    pub used_across_call: bool,
}

impl LiveRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            used_across_call: false,
        }
    }

    /// Single-point range `[point, point + 1)`
    pub fn at(point: u32) -> Self {
        Self::new(point, point + 1)
    }

    pub fn contains(&self, point: u32) -> bool {
        self.start <= point && point < self.end
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn mark_calls(&mut self, call_points: &[u32]) {
        if !self.used_across_call && call_points.iter().any(|&c| self.contains(c)) {
            self.used_across_call = true;
        }
    }
}

/// The ranges of one register, in ascending order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveRanges {
    ranges: Vec<LiveRange>,
}

impl LiveRanges {
    pub fn as_slice(&self) -> &[LiveRange] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn first(&self) -> Option<&LiveRange> {
        self.ranges.first()
    }

    pub fn last(&self) -> Option<&LiveRange> {
        self.ranges.last()
    }

    pub fn covers(&self, point: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(point))
    }

    pub fn used_across_call(&self) -> bool {
        self.ranges.iter().any(|r| r.used_across_call)
    }

    /// Virtual registers: stretch the single interval to `[first, point + 1)`.
    fn extend_virtual(&mut self, point: u32, call_points: &[u32]) {
        match self.ranges.first_mut() {
            Some(range) => {
                range.start = range.start.min(point);
                range.end = range.end.max(point + 1);
                range.mark_calls(call_points);
            }
            None => {
                let mut range = LiveRange::at(point);
                range.mark_calls(call_points);
                self.ranges.push(range);
            }
        }
    }

    /// Physical registers: extend the last interval when `point` is adjacent
    /// to it, otherwise open a new one. Points already covered are no-ops.
    fn extend_physical(&mut self, point: u32, call_points: &[u32]) {
        if self.covers(point) {
            return;
        }
        match self.ranges.last_mut() {
            Some(last) if last.end == point => {
                last.end = point + 1;
                last.mark_calls(call_points);
            }
            _ => {
                let mut range = LiveRange::at(point);
                range.mark_calls(call_points);
                self.ranges.push(range);
            }
        }
    }
}

/// Live ranges of every register referenced in a function, plus the
/// recorded call points
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    table: BTreeMap<Register, LiveRanges>,
    call_points: Vec<u32>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `reg` is referenced at program point `point`.
    ///
    /// Stack slots and `NONE` are not tracked.
    pub fn record_use(&mut self, reg: Register, point: u32) {
        if !reg.is_virtual() && !reg.is_physical() {
            return;
        }
        let ranges = self.table.entry(reg).or_default();
        if reg.is_virtual() {
            ranges.extend_virtual(point, &self.call_points);
        } else {
            ranges.extend_physical(point, &self.call_points);
        }
        trace!("liveness: {reg} used at {point} -> {:?}", ranges.as_slice());
    }

    /// Mark `point` as a call boundary. Only intervals updated afterwards
    /// see the new point, which matches emission order: a value live across
    /// the call is necessarily referenced again after it.
    pub fn record_call(&mut self, point: u32) {
        trace!("liveness: call boundary at {point}");
        self.call_points.push(point);
    }

    pub fn get(&self, reg: Register) -> Option<&LiveRanges> {
        self.table.get(&reg)
    }

    pub fn call_points(&self) -> &[u32] {
        &self.call_points
    }

    /// Registers in id order with their ranges
    pub fn iter(&self) -> impl Iterator<Item = (Register, &LiveRanges)> {
        self.table.iter().map(|(reg, ranges)| (*reg, ranges))
    }

    pub fn virtual_registers(&self) -> impl Iterator<Item = (Register, &LiveRanges)> {
        self.iter().filter(|(reg, _)| reg.is_virtual())
    }

    pub fn physical_registers(&self) -> impl Iterator<Item = (Register, &LiveRanges)> {
        self.iter().filter(|(reg, _)| reg.is_physical())
    }
}
