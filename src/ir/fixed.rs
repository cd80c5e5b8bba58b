//! Fixed register bindings for shader inputs and outputs.
//!
//! A binding ties a run of virtual temporaries to hardware registers chosen by
//! the driver interface: inputs arrive in primary attributes, results leave in
//! output registers. The allocator precolours bound temporaries and, when a
//! binding cannot be honoured, relocates it behind a copy.

use super::registers::HwBank;
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One fixed binding.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FixedReg {
    /// First bound virtual temporary. Updated when the binding is relocated.
    pub vreg: u32,
    /// Number of consecutive temporaries bound.
    pub count: u32,
    /// Hardware bank.
    pub bank: HwBank,
    /// First hardware register, or `None` when any register of `bank` will do.
    pub index: Option<u32>,
    /// Extra output registers the USP may patch the result into. The bound
    /// temporaries own these colours as well.
    pub alternates: SmallVec<[u32; 2]>,
    /// The binding is a shader result rather than an input.
    pub is_output: bool,
    /// The original temporaries, once relocated behind a copy.
    pub relocated_from: Option<u32>,
}

impl FixedReg {
    /// An input arriving in `bank`, starting at `index`.
    pub fn input(vreg: u32, count: u32, bank: HwBank, index: u32) -> Self {
        Self {
            vreg,
            count,
            bank,
            index: Some(index),
            alternates: SmallVec::new(),
            is_output: false,
            relocated_from: None,
        }
    }

    /// A result leaving in `bank`, starting at `index`.
    pub fn output(vreg: u32, count: u32, bank: HwBank, index: u32) -> Self {
        Self {
            is_output: true,
            ..Self::input(vreg, count, bank, index)
        }
    }

    /// Does this binding cover virtual temporary `temp`? Returns the offset.
    pub fn offset_of(&self, temp: u32) -> Option<u32> {
        if temp >= self.vreg && temp < self.vreg + self.count {
            Some(temp - self.vreg)
        } else {
            None
        }
    }

    /// Has the binding been relocated?
    pub fn is_relocated(&self) -> bool {
        self.relocated_from.is_some()
    }
}

/// All fixed bindings of a program, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FixedRegTable {
    entries: Vec<FixedReg>,
}

impl FixedRegTable {
    /// Add a binding, returning its index.
    pub fn push(&mut self, entry: FixedReg) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Are there no bindings?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over bindings.
    pub fn iter(&self) -> impl Iterator<Item = &FixedReg> {
        self.entries.iter()
    }

    /// Get a binding by index.
    pub fn get(&self, index: usize) -> Option<&FixedReg> {
        self.entries.get(index)
    }

    /// Get a binding mutably by index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut FixedReg> {
        self.entries.get_mut(index)
    }

    /// Find the binding covering `temp`: its index and `temp`'s offset in it.
    pub fn lookup(&self, temp: u32) -> Option<(usize, u32)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(i, e)| e.offset_of(temp).map(|off| (i, off)))
    }
}
