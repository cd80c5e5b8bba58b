//! Program entities.
//!
//! Instructions and blocks live in per-function arenas and are referred to by
//! these `u32` handles. Functions live in the program's arena.

use cranelift_entity::entity_impl;
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// An opaque reference to a basic block in a [`Function`](super::Function).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an instruction in a [`Function`](super::Function).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a function in a [`Program`](super::Program).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// A program point: an instruction together with the function that owns it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ProgramPoint {
    /// The owning function.
    pub func: FuncRef,
    /// The instruction.
    pub inst: Inst,
}

impl ProgramPoint {
    /// Create a new program point.
    pub fn new(func: FuncRef, inst: Inst) -> Self {
        Self { func, inst }
    }
}
