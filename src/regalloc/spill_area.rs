//! Scratch memory layout for spilled values.
//!
//! Every spilled temporary owns one 4-byte slot for the rest of the
//! allocation. Slots are handed out lazily in the order nodes are first
//! spilled, so the area only ever grows and a slot's offset never changes.
//!
//! Scratch instructions address their slot through an offset operand. While
//! the whole area fits the instruction's immediate offset field the offset is
//! an immediate. Past that point offsets are held in secondary attributes the
//! driver preloads, and once those run out each access loads its offset into
//! a temporary with `ldc`. Growing past the immediate limit invalidates the
//! immediates already emitted, so the area remembers every instruction it
//! handed an immediate to.

use crate::ir::{Operand, ProgramPoint};
use crate::settings::Config;
use crate::trace;
use rustc_hash::FxHashMap;

/// Size of one spill slot in bytes.
pub const SLOT_SIZE: u32 = 4;

/// How a scratch instruction should address a slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OffsetPlan {
    /// Use this operand directly: an immediate or a secondary attribute.
    Operand(Operand),
    /// Load the offset into a temporary first.
    LoadConst(u32),
}

/// The scratch area of one program.
#[derive(Clone, Debug)]
pub struct SpillArea {
    size: u32,
    slots: FxHashMap<u32, u32>,
    immediate_limit: u32,
    sec_attr_base: u32,
    sec_attr_budget: u32,
    offset_regs: FxHashMap<u32, u32>,
    emitted: Vec<ProgramPoint>,
}

impl SpillArea {
    /// An empty area with limits from `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            size: 0,
            slots: FxHashMap::default(),
            immediate_limit: config.max_immediate_offset,
            sec_attr_base: config.spill_sec_attr_base,
            sec_attr_budget: config.spill_sec_attrs,
            offset_regs: FxHashMap::default(),
            emitted: Vec::new(),
        }
    }

    /// Bytes of scratch memory in use.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of slots handed out.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Do slot offsets still fit in an instruction immediate?
    pub fn fits_immediate(&self) -> bool {
        self.size <= self.immediate_limit
    }

    /// The slot of virtual temporary `temp`, if it has one.
    pub fn slot(&self, temp: u32) -> Option<u32> {
        self.slots.get(&temp).copied()
    }

    /// The byte offset of `temp`'s slot, allocating one on first use.
    pub fn allocate_spill_space(&mut self, temp: u32) -> u32 {
        if let Some(&offset) = self.slots.get(&temp) {
            return offset;
        }
        let offset = self.size;
        self.size += SLOT_SIZE;
        self.slots.insert(temp, offset);
        trace!("spill area: r{} at +{} (size {})", temp, offset, self.size);
        offset
    }

    /// Choose how to address `offset`.
    pub fn offset_plan(&mut self, offset: u32) -> OffsetPlan {
        if self.fits_immediate() {
            return OffsetPlan::Operand(Operand::imm(offset));
        }
        if let Some(&sa) = self.offset_regs.get(&offset) {
            return OffsetPlan::Operand(Operand::sec_attr(sa));
        }
        let used = self.offset_regs.len() as u32;
        if used < self.sec_attr_budget {
            let sa = self.sec_attr_base + used;
            self.offset_regs.insert(offset, sa);
            return OffsetPlan::Operand(Operand::sec_attr(sa));
        }
        OffsetPlan::LoadConst(offset)
    }

    /// Remember an instruction that addresses its slot with an immediate.
    pub fn record_immediate(&mut self, point: ProgramPoint) {
        self.emitted.push(point);
    }

    /// Instructions whose immediate offsets are no longer valid. They are
    /// forgotten; the caller must re-encode them.
    pub fn take_stale(&mut self) -> Vec<ProgramPoint> {
        if self.fits_immediate() {
            Vec::new()
        } else {
            core::mem::take(&mut self.emitted)
        }
    }

    /// `(secondary attribute, value)` pairs the driver must preload.
    pub fn sec_attr_constants(&self) -> Vec<(u32, u32)> {
        let mut out: Vec<(u32, u32)> = self
            .offset_regs
            .iter()
            .map(|(&offset, &sa)| (sa, offset))
            .collect();
        out.sort_unstable();
        out
    }
}
