//! Representation of shader programs as seen by the register allocator.

mod builder;
mod entities;
mod fixed;
mod function;
mod instructions;
mod registers;
mod usedef;

pub use self::builder::ProgramBuilder;
pub use self::entities::{Block, FuncRef, Inst, ProgramPoint};
pub use self::fixed::{FixedReg, FixedRegTable};
pub use self::function::{
    ArrayDecl, BlockData, Function, Program, ProgramCounters, ProgramKind, RegisterFile,
};
pub use self::instructions::{InstData, Opcode, OpcodeInfo, Operand, Predicate};
pub use self::registers::{
    channel_suffix, Alignment, BankFlags, ChannelMask, Format, HwBank, Reg, RegBank,
    ALL_CHANNELS, W_CHANNEL,
};
pub use self::usedef::{AccessKind, UseDef, UseDefChains};
