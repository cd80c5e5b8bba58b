//! The node model.
//!
//! Every register the allocator may colour is a *node*. Nodes are numbered
//! densely over four contiguous ranges, in order: primary attributes, outputs,
//! internal registers and temporaries. The boundaries come from the program's
//! declared register counts and are recomputed whenever the program grows new
//! temporaries.

use crate::ir::{BankFlags, HwBank, Operand, Program, ProgramKind, Reg};
use crate::settings::Config;
use bitflags::bitflags;
use cranelift_entity::{entity_impl, SecondaryMap};
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// An allocation node: one virtual or precoloured register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Node(u32);
entity_impl!(Node, "n");

/// Boundaries of the four node ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    outputs_base: u32,
    internals_base: u32,
    temps_base: u32,
    count: u32,
    /// First primary attribute reserved for the secondary program, when
    /// allocating a main program.
    reserved_prim_attr: Option<u32>,
}

impl NodeLayout {
    /// Compute the layout for `program` on the hardware described by `config`.
    pub fn new(program: &Program, config: &Config) -> Self {
        let regs = &program.regs;
        let outputs_base = regs.prim_attrs;
        let internals_base = outputs_base + regs.outputs;
        let temps_base = internals_base + regs.internals;
        let reserved_prim_attr = match program.kind {
            ProgramKind::Main if program.reserved_prim_attrs > 0 => {
                Some(config.prim_attrs.saturating_sub(program.reserved_prim_attrs))
            }
            _ => None,
        };
        Self {
            outputs_base,
            internals_base,
            temps_base,
            count: temps_base + regs.temps,
            reserved_prim_attr,
        }
    }

    /// Total number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.count as usize
    }

    /// Iterate over every node.
    pub fn nodes(&self) -> impl Iterator<Item = Node> {
        (0..self.count).map(Node::from_u32)
    }

    /// Iterate over temporary nodes.
    pub fn temps(&self) -> impl Iterator<Item = Node> {
        (self.temps_base..self.count).map(Node::from_u32)
    }

    /// First node and node count of `bank`.
    fn range(&self, bank: HwBank) -> (u32, u32) {
        match bank {
            HwBank::PrimAttr => (0, self.outputs_base),
            HwBank::Output => (self.outputs_base, self.internals_base - self.outputs_base),
            HwBank::Internal => (self.internals_base, self.temps_base - self.internals_base),
            HwBank::Temp => (self.temps_base, self.count - self.temps_base),
        }
    }

    /// The node for register `index` of `bank`, if it is one.
    pub fn register_to_node(&self, bank: HwBank, index: u32) -> Option<Node> {
        if bank == HwBank::PrimAttr {
            if let Some(reserved) = self.reserved_prim_attr {
                if index >= reserved {
                    return None;
                }
            }
        }
        let (base, len) = self.range(bank);
        if index < len {
            Some(Node::from_u32(base + index))
        } else {
            None
        }
    }

    /// The register a node stands for. Inverse of `register_to_node`.
    pub fn node_to_register(&self, node: Node) -> (HwBank, u32) {
        let n = node.as_u32();
        debug_assert!(n < self.count, "{} out of range", node);
        if n >= self.temps_base {
            (HwBank::Temp, n - self.temps_base)
        } else if n >= self.internals_base {
            (HwBank::Internal, n - self.internals_base)
        } else if n >= self.outputs_base {
            (HwBank::Output, n - self.outputs_base)
        } else {
            (HwBank::PrimAttr, n)
        }
    }

    /// The bank a node belongs to.
    pub fn bank(&self, node: Node) -> HwBank {
        self.node_to_register(node).0
    }

    /// Is `node` a temporary?
    pub fn is_temp(&self, node: Node) -> bool {
        node.as_u32() >= self.temps_base
    }

    /// The node of a register reference.
    pub fn reg_node(&self, reg: Reg) -> Option<Node> {
        self.register_to_node(reg.bank.hw()?, reg.num)
    }

    /// The node of a temporary.
    pub fn temp_node(&self, temp: u32) -> Option<Node> {
        self.register_to_node(HwBank::Temp, temp)
    }

    /// Does `op` name allocation nodes?
    pub fn is_node(&self, op: &Operand) -> bool {
        self.reg_node(op.reg).is_some()
    }

    /// Every node `op` may touch.
    pub fn operand_nodes<'a>(&'a self, op: &'a Operand) -> impl Iterator<Item = Node> + 'a {
        op.regs().filter_map(move |reg| self.reg_node(reg))
    }

    /// The register reference of a node, before colouring.
    pub fn node_reg(&self, node: Node) -> Reg {
        let (bank, index) = self.node_to_register(node);
        Reg::new(bank.reg_bank(), index)
    }
}

bitflags! {
    /// Per-node state.
    ///
    /// `NO_SPILL`, `USED_IN_SPILL` and `SPILLED` persist across colouring
    /// attempts; the rest are recomputed from the program each attempt.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// The node's colour is fixed before colouring starts.
        const PRECOLOURED = 1 << 0;
        /// The node was created by spill synthesis.
        const USED_IN_SPILL = 1 << 1;
        /// Live across the feedback point.
        const CROSSES_FEEDBACK = 1 << 2;
        /// Live across the split point.
        const CROSSES_SPLIT = 1 << 3;
        /// Referenced after the split point.
        const POST_SPLIT = 1 << 4;
        /// A temporary the USP may patch.
        const USP_TEMP = 1 << 5;
        /// Holds C10 data somewhere.
        const C10 = 1 << 6;
        /// Must not be spilled.
        const NO_SPILL = 1 << 7;
        /// Element of a dynamically indexed array.
        const ARRAY = 1 << 8;
        /// Has been spilled to the scratch area.
        const SPILLED = 1 << 9;
    }
}

impl NodeFlags {
    /// Flags that survive from one colouring attempt to the next.
    pub const PERSISTENT: NodeFlags = NodeFlags::NO_SPILL
        .union(NodeFlags::USED_IN_SPILL)
        .union(NodeFlags::SPILLED);
}

/// Properties of every node derived from how the program uses it.
///
/// Bank legality is node-local: every operand a node appears in narrows the
/// banks it may ever be coloured into, independently of interference.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    /// Banks each node may be coloured into.
    pub banks: SecondaryMap<Node, BankFlags>,
    /// Banks the node's operands accept, whatever the colour budget.
    pub legal: SecondaryMap<Node, BankFlags>,
    /// Node flags.
    pub flags: SecondaryMap<Node, NodeFlags>,
    /// Internal nodes: colours must be below this limit.
    pub internal_limit: SecondaryMap<Node, u32>,
    /// Number of operand references.
    pub refs: SecondaryMap<Node, u32>,
}

impl NodeInfo {
    /// Collect node properties. `persistent` carries flags from earlier
    /// attempts.
    pub fn collect(
        program: &Program,
        layout: &NodeLayout,
        config: &Config,
        persistent: &SecondaryMap<Node, NodeFlags>,
    ) -> Self {
        let mut banks = SecondaryMap::with_capacity(layout.num_nodes());
        let mut legal = SecondaryMap::with_capacity(layout.num_nodes());
        let mut flags = SecondaryMap::with_capacity(layout.num_nodes());
        let mut internal_limit = SecondaryMap::with_default(config.internals);
        let mut refs = SecondaryMap::with_capacity(layout.num_nodes());

        let spare_prim_attrs = spare_prim_attrs(program, config);
        for node in layout.nodes() {
            let bank = layout.bank(node);
            banks[node] = match bank {
                HwBank::Temp if spare_prim_attrs.0 < spare_prim_attrs.1 => {
                    BankFlags::TEMP | BankFlags::PRIM_ATTR
                }
                _ => bank.flag(),
            };
            legal[node] = match bank {
                HwBank::Temp => BankFlags::all(),
                _ => bank.flag(),
            };
            flags[node] = persistent[node] & NodeFlags::PERSISTENT;
            if matches!(bank, HwBank::PrimAttr | HwBank::Output) {
                flags[node] |= NodeFlags::PRECOLOURED;
            }
        }

        for func in program.functions.values() {
            for (_, inst) in func.layout() {
                let data = &func.insts[inst];
                let info = data.info();
                let mut restrict = |op: &Operand, allowed: BankFlags, is_dest: bool| {
                    for node in layout.operand_nodes(op) {
                        refs[node] += 1;
                        if op.is_c10() {
                            flags[node] |= NodeFlags::C10;
                        }
                        match layout.bank(node) {
                            HwBank::Temp => {
                                let mut allowed = allowed;
                                if is_dest && !config.prim_attrs_writable {
                                    allowed.remove(BankFlags::PRIM_ATTR);
                                }
                                banks[node] &= allowed;
                                legal[node] &= allowed;
                            }
                            HwBank::Internal => {
                                let limit = &mut internal_limit[node];
                                *limit = (*limit).min(info.internal_limit);
                            }
                            _ => {}
                        }
                    }
                };
                for op in &data.dests {
                    restrict(op, info.dest_banks, true);
                }
                for (i, op) in data.srcs.iter().enumerate() {
                    restrict(op, info.src_bank(i), false);
                }
            }
        }

        for array in &program.arrays {
            for k in 0..array.len {
                if let Some(node) = layout.temp_node(array.base + k) {
                    flags[node] |= NodeFlags::ARRAY | NodeFlags::NO_SPILL;
                }
            }
        }
        for &temp in &program.usp_temps {
            if let Some(node) = layout.temp_node(temp) {
                flags[node] |= NodeFlags::USP_TEMP;
            }
        }
        for entry in program.fixed.iter() {
            for k in 0..entry.count {
                let Some(node) = layout.temp_node(entry.vreg + k) else {
                    continue;
                };
                flags[node] |= NodeFlags::NO_SPILL;
                match entry.index {
                    Some(_) => flags[node] |= NodeFlags::PRECOLOURED,
                    None => banks[node] = entry.bank.flag(),
                }
            }
        }

        Self {
            banks,
            legal,
            flags,
            internal_limit,
            refs,
        }
    }

    /// Can `node` be chosen for spilling?
    pub fn is_spillable(&self, layout: &NodeLayout, node: Node) -> bool {
        layout.is_temp(node)
            && !self.flags[node]
                .intersects(NodeFlags::PRECOLOURED | NodeFlags::NO_SPILL | NodeFlags::ARRAY)
    }
}

/// The range of primary attributes temporaries may be coloured into: above
/// the declared inputs and below any reserved region.
pub fn spare_prim_attrs(program: &Program, config: &Config) -> (u32, u32) {
    let top = match program.kind {
        ProgramKind::Main => config.prim_attrs.saturating_sub(program.reserved_prim_attrs),
        ProgramKind::Secondary => config.prim_attrs,
    };
    (program.regs.prim_attrs.min(top), top)
}
