//! Instruction formats and opcodes.
//!
//! The allocator does not care about instruction semantics beyond the fixed
//! shape each opcode declares in its [`OpcodeInfo`]: which register banks each
//! argument may use, which sources must sit in consecutive registers, and how
//! many internal registers the instruction can address.

use super::entities::FuncRef;
use super::registers::{
    channel_suffix, Alignment, BankFlags, ChannelMask, Format, Reg, RegBank, ALL_CHANNELS,
};
use core::fmt;
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Instruction opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Opcode {
    /// Register to register copy.
    Mov,
    /// Format converting copy.
    Pack,
    /// `dst = a + b`.
    Add,
    /// `dst = a * b`.
    Mul,
    /// `dst = a * b + c`.
    Mad,
    /// Four component dot product.
    Dp4,
    /// Texture sample. The two coordinate sources are consecutive.
    Sample,
    /// Texture sample returning several consecutive destination registers.
    SampleMulti,
    /// Load an immediate constant into a register.
    LoadConst,
    /// Load from the scratch area: `dst = scratch[offset]`.
    ScratchLoad,
    /// Store to the scratch area: `scratch[offset] = value`.
    ScratchStore,
    /// Call a subroutine.
    Call(FuncRef),
    /// No operation.
    Nop,
}

/// The fixed operand shape of an opcode.
#[derive(Debug)]
pub struct OpcodeInfo {
    /// Mnemonic.
    pub name: &'static str,
    /// Banks the destinations may be coloured into.
    pub dest_banks: BankFlags,
    /// Banks each source may be coloured into. Sources past the end of the
    /// slice use the last entry.
    pub src_banks: &'static [BankFlags],
    /// `(first, count)` of a source bundle that must occupy consecutive
    /// registers.
    pub consecutive_srcs: Option<(u8, u8)>,
    /// All destinations must occupy consecutive registers.
    pub consecutive_dests: bool,
    /// Alignment of the first register of a consecutive bundle.
    pub group_align: Alignment,
    /// Internal registers `i0..internal_limit` are addressable by this
    /// opcode's MOE encoding.
    pub internal_limit: u32,
    /// The opcode converts between data formats.
    pub converts: bool,
    /// The opcode accesses scratch memory.
    pub memory: bool,
}

const ANY: BankFlags = BankFlags::all();

macro_rules! info {
    ($name:expr, dests: $d:expr, srcs: $s:expr $(, $field:ident: $value:expr)* $(,)?) => {
        OpcodeInfo {
            name: $name,
            dest_banks: $d,
            src_banks: $s,
            $($field: $value,)*
            ..DEFAULT_INFO
        }
    };
}

const DEFAULT_INFO: OpcodeInfo = OpcodeInfo {
    name: "",
    dest_banks: ANY,
    src_banks: &[ANY],
    consecutive_srcs: None,
    consecutive_dests: false,
    group_align: Alignment::None,
    internal_limit: 3,
    converts: false,
    memory: false,
};

static MOV: OpcodeInfo = info!("mov", dests: ANY, srcs: &[ANY]);
static PACK: OpcodeInfo = info!("pack", dests: ANY, srcs: &[ANY], converts: true);
static ADD: OpcodeInfo = info!("add", dests: ANY, srcs: &[ANY]);
static MUL: OpcodeInfo = info!("mul", dests: ANY, srcs: &[ANY]);
static MAD: OpcodeInfo = info!(
    "mad",
    dests: ANY,
    srcs: &[ANY, ANY, BankFlags::NO_OUTPUT],
);
static DP4: OpcodeInfo = info!("dp4", dests: ANY, srcs: &[ANY], internal_limit: 1);
static SAMPLE: OpcodeInfo = info!(
    "smp",
    dests: BankFlags::NO_OUTPUT,
    srcs: &[BankFlags::TEMP_OR_PA],
    consecutive_srcs: Some((0, 2)),
    group_align: Alignment::Even,
    internal_limit: 0,
);
static SAMPLE_MULTI: OpcodeInfo = info!(
    "smpm",
    dests: BankFlags::TEMP_OR_PA,
    srcs: &[BankFlags::TEMP_OR_PA],
    consecutive_srcs: Some((0, 2)),
    consecutive_dests: true,
    group_align: Alignment::Even,
    internal_limit: 0,
);
static LOAD_CONST: OpcodeInfo = info!("ldc", dests: BankFlags::NO_OUTPUT, srcs: &[ANY]);
static SCRATCH_LOAD: OpcodeInfo = info!(
    "ldscr",
    dests: BankFlags::TEMP_OR_PA,
    srcs: &[BankFlags::TEMP_OR_PA],
    internal_limit: 0,
    memory: true,
);
static SCRATCH_STORE: OpcodeInfo = info!(
    "stscr",
    dests: BankFlags::empty(),
    srcs: &[BankFlags::TEMP_OR_PA],
    internal_limit: 0,
    memory: true,
);
static CALL: OpcodeInfo = info!("call", dests: BankFlags::empty(), srcs: &[]);
static NOP: OpcodeInfo = info!("nop", dests: BankFlags::empty(), srcs: &[]);

impl Opcode {
    /// Get the fixed operand shape of this opcode.
    pub fn info(self) -> &'static OpcodeInfo {
        match self {
            Opcode::Mov => &MOV,
            Opcode::Pack => &PACK,
            Opcode::Add => &ADD,
            Opcode::Mul => &MUL,
            Opcode::Mad => &MAD,
            Opcode::Dp4 => &DP4,
            Opcode::Sample => &SAMPLE,
            Opcode::SampleMulti => &SAMPLE_MULTI,
            Opcode::LoadConst => &LOAD_CONST,
            Opcode::ScratchLoad => &SCRATCH_LOAD,
            Opcode::ScratchStore => &SCRATCH_STORE,
            Opcode::Call(_) => &CALL,
            Opcode::Nop => &NOP,
        }
    }
}

impl OpcodeInfo {
    /// Banks permitted for source `index`.
    pub fn src_bank(&self, index: usize) -> BankFlags {
        match self.src_banks.get(index).or_else(|| self.src_banks.last()) {
            Some(flags) => *flags,
            None => BankFlags::empty(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opcode::Call(func) => write!(f, "call {}", func),
            op => f.write_str(op.info().name),
        }
    }
}

/// A register operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Operand {
    /// The register. For dynamically indexed arrays, the first element.
    pub reg: Reg,
    /// Channels read or written.
    pub mask: ChannelMask,
    /// Data format.
    pub format: Format,
    /// When set, the operand dynamically indexes an array of this many
    /// consecutive registers starting at `reg`.
    pub dyn_len: Option<u32>,
}

impl Operand {
    /// A full-mask 32-bit operand naming `reg`.
    pub const fn new(reg: Reg) -> Self {
        Self {
            reg,
            mask: ALL_CHANNELS,
            format: Format::F32,
            dyn_len: None,
        }
    }

    /// A temporary register operand.
    pub const fn temp(num: u32) -> Self {
        Self::new(Reg::new(RegBank::Temp, num))
    }

    /// A primary attribute operand.
    pub const fn prim_attr(num: u32) -> Self {
        Self::new(Reg::new(RegBank::PrimAttr, num))
    }

    /// An output register operand.
    pub const fn output(num: u32) -> Self {
        Self::new(Reg::new(RegBank::Output, num))
    }

    /// An internal register operand.
    pub const fn internal(num: u32) -> Self {
        Self::new(Reg::new(RegBank::Internal, num))
    }

    /// A secondary attribute operand.
    pub const fn sec_attr(num: u32) -> Self {
        Self::new(Reg::new(RegBank::SecAttr, num))
    }

    /// An immediate operand.
    pub const fn imm(value: u32) -> Self {
        Self::new(Reg::new(RegBank::Immediate, value))
    }

    /// Restrict the operand to the channels in `mask`.
    pub const fn with_mask(mut self, mask: ChannelMask) -> Self {
        self.mask = mask;
        self
    }

    /// Change the data format.
    pub const fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Dynamically index an array of `len` registers starting at this one.
    pub const fn dyn_array(mut self, len: u32) -> Self {
        self.dyn_len = Some(len);
        self
    }

    /// Is this operand in C10 format?
    pub fn is_c10(&self) -> bool {
        self.format == Format::C10
    }

    /// Every register this operand may touch.
    pub fn regs(&self) -> impl Iterator<Item = Reg> + '_ {
        let len = self.dyn_len.unwrap_or(1);
        (0..len).map(move |k| Reg::new(self.reg.bank, self.reg.num + k))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reg.bank == RegBank::Immediate {
            return write!(f, "#{}", self.reg.num);
        }
        match self.dyn_len {
            Some(len) => write!(f, "{}[idx;{}]", self.reg, len)?,
            None => write!(f, "{}", self.reg)?,
        }
        f.write_str(&channel_suffix(self.mask))?;
        if self.is_c10() {
            f.write_str(":c10")?;
        }
        Ok(())
    }
}

/// An instruction predicate. Predicated instructions write conditionally.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Predicate {
    /// Predicate register number.
    pub num: u32,
    /// Execute when the predicate is false.
    pub negate: bool,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negate {
            f.write_str("!")?;
        }
        write!(f, "p{}", self.num)
    }
}

/// The contents of an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct InstData {
    /// The opcode.
    pub opcode: Opcode,
    /// Destination operands.
    pub dests: SmallVec<[Operand; 2]>,
    /// Source operands.
    pub srcs: SmallVec<[Operand; 3]>,
    /// Optional predicate.
    pub pred: Option<Predicate>,
}

impl InstData {
    /// An instruction without operands.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            dests: SmallVec::new(),
            srcs: SmallVec::new(),
            pred: None,
        }
    }

    /// Append a destination operand.
    pub fn dest(mut self, op: Operand) -> Self {
        self.dests.push(op);
        self
    }

    /// Append a source operand.
    pub fn src(mut self, op: Operand) -> Self {
        self.srcs.push(op);
        self
    }

    /// Predicate the instruction.
    pub fn predicated(mut self, pred: Predicate) -> Self {
        self.pred = Some(pred);
        self
    }

    /// `mov dst, src`.
    pub fn mov(dst: Operand, src: Operand) -> Self {
        Self::new(Opcode::Mov).dest(dst).src(src)
    }

    /// `pack dst, src`.
    pub fn pack(dst: Operand, src: Operand) -> Self {
        Self::new(Opcode::Pack).dest(dst).src(src)
    }

    /// A two-source arithmetic instruction.
    pub fn binary(opcode: Opcode, dst: Operand, a: Operand, b: Operand) -> Self {
        Self::new(opcode).dest(dst).src(a).src(b)
    }

    /// `ldc dst, #value`.
    pub fn load_const(dst: Operand, value: u32) -> Self {
        Self::new(Opcode::LoadConst).dest(dst).src(Operand::imm(value))
    }

    /// `ldscr dst, [offset]`.
    pub fn scratch_load(dst: Operand, offset: Operand) -> Self {
        Self::new(Opcode::ScratchLoad).dest(dst).src(offset)
    }

    /// `stscr [offset], value`.
    pub fn scratch_store(value: Operand, offset: Operand) -> Self {
        Self::new(Opcode::ScratchStore).src(value).src(offset)
    }

    /// `call func`.
    pub fn call(func: FuncRef) -> Self {
        Self::new(Opcode::Call(func))
    }

    /// Get the opcode's operand shape.
    pub fn info(&self) -> &'static OpcodeInfo {
        self.opcode.info()
    }

    /// Does this instruction write its destinations conditionally?
    pub fn is_conditional(&self) -> bool {
        self.pred.is_some()
    }

    /// The callee, for calls.
    pub fn callee(&self) -> Option<FuncRef> {
        match self.opcode {
            Opcode::Call(func) => Some(func),
            _ => None,
        }
    }

    /// Is this an unconditional, non-converting, full copy of one register to
    /// another?
    pub fn is_plain_move(&self) -> bool {
        if self.opcode != Opcode::Mov || self.pred.is_some() {
            return false;
        }
        match (self.dests.as_slice(), self.srcs.as_slice()) {
            ([d], [s]) => {
                d.dyn_len.is_none()
                    && s.dyn_len.is_none()
                    && d.format == s.format
                    && d.mask == s.mask
                    && s.reg.bank != RegBank::Immediate
            }
            _ => false,
        }
    }

    /// Is this a move whose destination and source are the same register?
    pub fn is_noop_move(&self) -> bool {
        self.is_plain_move() && self.dests[0].reg == self.srcs[0].reg
    }
}

impl fmt::Display for InstData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(pred) = &self.pred {
            write!(f, "({}) ", pred)?;
        }
        write!(f, "{}", self.opcode)?;
        let mut sep = " ";
        for op in self.dests.iter().chain(self.srcs.iter()) {
            write!(f, "{}{}", sep, op)?;
            sep = ", ";
        }
        Ok(())
    }
}
