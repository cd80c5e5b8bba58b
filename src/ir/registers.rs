//! Register banks and register references.

use bitflags::bitflags;
use core::fmt;
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// A mask of the four channels (`x`, `y`, `z`, `w`) of a register.
pub type ChannelMask = u8;

/// Every channel of a register.
pub const ALL_CHANNELS: ChannelMask = 0b1111;

/// The `w` channel. C10 format keeps its alpha here.
pub const W_CHANNEL: ChannelMask = 0b1000;

/// Render a channel mask as a swizzle suffix such as `.xyw`.
pub fn channel_suffix(mask: ChannelMask) -> String {
    if mask & ALL_CHANNELS == ALL_CHANNELS {
        return String::new();
    }
    let mut s = String::from(".");
    for (bit, ch) in ['x', 'y', 'z', 'w'].iter().enumerate() {
        if mask & (1 << bit) != 0 {
            s.push(*ch);
        }
    }
    s
}

/// Every register bank an operand can name.
///
/// Only the first four are allocatable; the rest are referenced by
/// instructions but never coloured.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum RegBank {
    /// Primary attributes: per-vertex or per-pixel shader inputs.
    PrimAttr,
    /// Shader output registers.
    Output,
    /// Internal (GPI) registers. Few, never spilled.
    Internal,
    /// Temporary registers, virtual before allocation.
    Temp,
    /// Secondary attributes: per-draw constants loaded by the driver.
    SecAttr,
    /// An immediate value rather than a register.
    Immediate,
    /// Special read-only registers.
    Special,
    /// Index registers used for dynamic addressing.
    Index,
}

impl RegBank {
    /// The hardware bank this register bank is coloured into, if any.
    pub fn hw(self) -> Option<HwBank> {
        match self {
            RegBank::PrimAttr => Some(HwBank::PrimAttr),
            RegBank::Output => Some(HwBank::Output),
            RegBank::Internal => Some(HwBank::Internal),
            RegBank::Temp => Some(HwBank::Temp),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            RegBank::PrimAttr => "pa",
            RegBank::Output => "o",
            RegBank::Internal => "i",
            RegBank::Temp => "r",
            RegBank::SecAttr => "sa",
            RegBank::Immediate => "#",
            RegBank::Special => "sr",
            RegBank::Index => "idx",
        }
    }
}

/// The four allocatable hardware banks, in node-numbering order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum HwBank {
    /// Primary attributes.
    PrimAttr,
    /// Outputs.
    Output,
    /// Internal registers.
    Internal,
    /// Temporaries.
    Temp,
}

impl HwBank {
    /// All hardware banks in node-numbering order.
    pub const ALL: [HwBank; 4] = [
        HwBank::PrimAttr,
        HwBank::Output,
        HwBank::Internal,
        HwBank::Temp,
    ];

    /// The operand bank naming registers of this hardware bank.
    pub fn reg_bank(self) -> RegBank {
        match self {
            HwBank::PrimAttr => RegBank::PrimAttr,
            HwBank::Output => RegBank::Output,
            HwBank::Internal => RegBank::Internal,
            HwBank::Temp => RegBank::Temp,
        }
    }

    /// The bank flag for this bank.
    pub fn flag(self) -> BankFlags {
        match self {
            HwBank::PrimAttr => BankFlags::PRIM_ATTR,
            HwBank::Output => BankFlags::OUTPUT,
            HwBank::Internal => BankFlags::INTERNAL,
            HwBank::Temp => BankFlags::TEMP,
        }
    }
}

impl fmt::Display for HwBank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.reg_bank().prefix())
    }
}

bitflags! {
    /// The set of hardware banks a node or operand may use.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BankFlags: u8 {
        /// Primary attribute bank.
        const PRIM_ATTR = 1 << 0;
        /// Output bank.
        const OUTPUT = 1 << 1;
        /// Internal register bank.
        const INTERNAL = 1 << 2;
        /// Temporary bank.
        const TEMP = 1 << 3;
    }
}

impl BankFlags {
    /// Any bank except outputs.
    pub const NO_OUTPUT: BankFlags = BankFlags::PRIM_ATTR
        .union(BankFlags::INTERNAL)
        .union(BankFlags::TEMP);

    /// Temporaries and primary attributes only.
    pub const TEMP_OR_PA: BankFlags = BankFlags::PRIM_ATTR.union(BankFlags::TEMP);
}

/// Required alignment of the first register of a group.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Alignment {
    /// Any register index.
    #[default]
    None,
    /// An even register index.
    Even,
    /// An odd register index.
    Odd,
}

impl Alignment {
    /// Does `index` satisfy this alignment?
    pub fn accepts(self, index: u32) -> bool {
        match self {
            Alignment::None => true,
            Alignment::Even => index % 2 == 0,
            Alignment::Odd => index % 2 == 1,
        }
    }

    /// The alignment required `offset` registers later in a group.
    pub fn shifted(self, offset: u32) -> Alignment {
        if offset % 2 == 0 {
            return self;
        }
        match self {
            Alignment::None => Alignment::None,
            Alignment::Even => Alignment::Odd,
            Alignment::Odd => Alignment::Even,
        }
    }

    /// Combine two requirements, returning `None` if they contradict.
    pub fn merge(self, other: Alignment) -> Option<Alignment> {
        match (self, other) {
            (Alignment::None, x) | (x, Alignment::None) => Some(x),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }
}

/// The data format held in a register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Format {
    /// 32-bit float per channel.
    #[default]
    F32,
    /// 16-bit float per channel.
    F16,
    /// 10-bit fixed point colour format.
    ///
    /// A C10 value occupies the register differently from the 32-bit formats,
    /// so a C10 value and a non-C10 value never share a register even on
    /// disjoint channels.
    C10,
}

/// A register reference: a bank and a register number within it.
///
/// Before allocation, `Temp` numbers are virtual and unbounded. For the
/// `Immediate` bank, `num` is the immediate value itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Reg {
    /// The bank.
    pub bank: RegBank,
    /// Index within the bank.
    pub num: u32,
}

impl Reg {
    /// Create a register reference.
    pub const fn new(bank: RegBank, num: u32) -> Self {
        Self { bank, num }
    }

    /// A temporary register.
    pub const fn temp(num: u32) -> Self {
        Self::new(RegBank::Temp, num)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.bank.prefix(), self.num)
    }
}
