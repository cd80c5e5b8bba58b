//! Colours and colour assignments.

use super::node::{Node, NodeFlags};
use crate::ir::{HwBank, Program, Reg};
use crate::settings::Config;
use core::fmt;
use core::ops::Range;
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// What kind of register a colour names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColourKind {
    /// A primary attribute.
    PrimAttr,
    /// An output register.
    Output,
    /// An internal register.
    Internal,
    /// A hardware temporary.
    Temp,
    /// Deliberately no register: the value is never observed.
    Dummy,
    /// Not coloured yet.
    Undefined,
}

/// A hardware register assigned to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Colour {
    /// The kind of register.
    pub kind: ColourKind,
    /// Index within the bank.
    pub index: u32,
}

impl Colour {
    /// Not coloured.
    pub const UNDEFINED: Colour = Colour {
        kind: ColourKind::Undefined,
        index: 0,
    };

    /// No register.
    pub const DUMMY: Colour = Colour {
        kind: ColourKind::Dummy,
        index: 0,
    };

    /// Register `index` of `bank`.
    pub const fn new(bank: HwBank, index: u32) -> Self {
        let kind = match bank {
            HwBank::PrimAttr => ColourKind::PrimAttr,
            HwBank::Output => ColourKind::Output,
            HwBank::Internal => ColourKind::Internal,
            HwBank::Temp => ColourKind::Temp,
        };
        Self { kind, index }
    }

    /// The hardware bank, for real registers.
    pub fn bank(self) -> Option<HwBank> {
        match self.kind {
            ColourKind::PrimAttr => Some(HwBank::PrimAttr),
            ColourKind::Output => Some(HwBank::Output),
            ColourKind::Internal => Some(HwBank::Internal),
            ColourKind::Temp => Some(HwBank::Temp),
            ColourKind::Dummy | ColourKind::Undefined => None,
        }
    }

    /// Has a colour been chosen?
    pub fn is_defined(self) -> bool {
        self.kind != ColourKind::Undefined
    }

    /// The colour `offset` registers later in the same bank.
    pub fn offset(self, offset: u32) -> Colour {
        Colour {
            kind: self.kind,
            index: self.index + offset,
        }
    }

    /// The register this colour names.
    pub fn reg(self) -> Option<Reg> {
        self.bank()
            .map(|bank| Reg::new(bank.reg_bank(), self.index))
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.reg() {
            Some(reg) => write!(f, "{}", reg),
            None if self.kind == ColourKind::Dummy => f.write_str("dummy"),
            None => f.write_str("-"),
        }
    }
}

/// Colours available to non-precoloured nodes, per bank.
#[derive(Clone, Debug)]
pub struct ColourBudget {
    temps: u32,
    post_split_temps: u32,
    spare_prim_attrs: (u32, u32),
    internals: u32,
    outputs: u32,
}

impl ColourBudget {
    /// Banks in the order colours are tried.
    pub const PREFERENCE: [HwBank; 4] = [
        HwBank::Temp,
        HwBank::PrimAttr,
        HwBank::Internal,
        HwBank::Output,
    ];

    /// Build the budget for `program` on `config`'s hardware.
    pub fn new(program: &Program, config: &Config) -> Self {
        Self {
            temps: config.temps,
            post_split_temps: config.post_split_limit(),
            spare_prim_attrs: super::node::spare_prim_attrs(program, config),
            internals: config.internals,
            outputs: config.outputs,
        }
    }

    /// Register indices of `bank` a node with `flags` may be coloured into.
    pub fn range(&self, bank: HwBank, flags: NodeFlags) -> Range<u32> {
        match bank {
            HwBank::Temp if flags.contains(NodeFlags::POST_SPLIT) => 0..self.post_split_temps,
            HwBank::Temp => 0..self.temps,
            HwBank::PrimAttr => self.spare_prim_attrs.0..self.spare_prim_attrs.1,
            HwBank::Internal => 0..self.internals,
            HwBank::Output => 0..self.outputs,
        }
    }

    /// Total hardware registers in `bank`.
    pub fn bank_size(&self, bank: HwBank) -> u32 {
        match bank {
            HwBank::Temp => self.temps,
            HwBank::PrimAttr => self.spare_prim_attrs.1,
            HwBank::Internal => self.internals,
            HwBank::Output => self.outputs,
        }
    }
}

/// The result of colouring: a colour for every node.
///
/// Shader outputs with USP-patchable alternate locations also own their
/// alternate colours.
#[derive(Clone, Debug)]
pub struct Assignment {
    colours: SecondaryMap<Node, Colour>,
    alternates: FxHashMap<Node, SmallVec<[Colour; 2]>>,
}

impl Default for Assignment {
    fn default() -> Self {
        Self::new()
    }
}

impl Assignment {
    /// An assignment with every node uncoloured.
    pub fn new() -> Self {
        Self {
            colours: SecondaryMap::with_default(Colour::UNDEFINED),
            alternates: FxHashMap::default(),
        }
    }

    /// The colour of `node`.
    pub fn get(&self, node: Node) -> Colour {
        self.colours[node]
    }

    /// Colour `node`.
    pub fn set(&mut self, node: Node, colour: Colour) {
        self.colours[node] = colour;
    }

    /// Remove `node`'s colours.
    pub fn clear(&mut self, node: Node) {
        self.colours[node] = Colour::UNDEFINED;
        self.alternates.remove(&node);
    }

    /// Has `node` been coloured?
    pub fn is_coloured(&self, node: Node) -> bool {
        self.colours[node].is_defined()
    }

    /// Give `node` an extra colour.
    pub fn add_alternate(&mut self, node: Node, colour: Colour) {
        self.alternates.entry(node).or_default().push(colour);
    }

    /// The alternate colours of `node`.
    pub fn alternates(&self, node: Node) -> &[Colour] {
        self.alternates.get(&node).map_or(&[], |v| v.as_slice())
    }

    /// Every colour `node` owns.
    pub fn colours_of(&self, node: Node) -> impl Iterator<Item = Colour> + '_ {
        let primary = self.get(node);
        core::iter::once(primary)
            .filter(|c| c.is_defined())
            .chain(self.alternates(node).iter().copied())
    }

    /// Does `node` own `colour`?
    pub fn owns(&self, node: Node, colour: Colour) -> bool {
        self.colours_of(node).any(|c| c == colour)
    }

    /// Iterate over coloured nodes.
    pub fn iter(&self) -> impl Iterator<Item = (Node, Colour)> + '_ {
        self.colours
            .iter()
            .filter(|(_, c)| c.is_defined())
            .map(|(n, c)| (n, *c))
    }
}
