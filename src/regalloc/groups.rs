//! Register groups.
//!
//! Some operands must occupy consecutive hardware registers: texture sample
//! coordinates, multi-register results and dynamically indexed arrays. Such
//! nodes are chained into a *group*, a doubly linked list threaded through a
//! `SecondaryMap` indexed by node. Each node may carry an alignment
//! requirement; the strictest requirement wins and is propagated through the
//! whole chain, so every member knows the parity its colour must have.
//!
//! Once colours are assigned, the distance of every member from the group
//! head equals the distance between their colour indices.

use super::colour::Colour;
use super::node::{Node, NodeLayout};
use crate::ir::{Alignment, Block, FuncRef, HwBank, InstData, Operand, Program, RegBank};
use crate::result::{RegallocError, RegallocResult};
use crate::settings::Config;
use crate::trace;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Group chain links of one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupLink {
    /// The node immediately before this one.
    pub prev: PackedOption<Node>,
    /// The node immediately after this one.
    pub next: PackedOption<Node>,
    /// The link to `next` may be dropped to make colouring easier.
    pub optional: bool,
    /// The link to `next` was created by an instruction's operand shape.
    pub linked_by_inst: bool,
    /// Required alignment of this node's colour.
    pub align: Alignment,
}

/// Members of one group, head first.
pub type GroupMembers = SmallVec<[Node; 4]>;

/// All register groups of a program.
#[derive(Clone, Debug, Default)]
pub struct RegisterGroups {
    links: SecondaryMap<Node, GroupLink>,
    fixed: FxHashMap<Node, Colour>,
    journal: Option<Vec<(Node, GroupLink)>>,
}

impl RegisterGroups {
    /// No groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node` must receive `colour`. Joins contradicting a fixed
    /// colour are rejected.
    pub fn set_fixed(&mut self, node: Node, colour: Colour) {
        self.fixed.insert(node, colour);
    }

    /// The links of `node`.
    pub fn link(&self, node: Node) -> GroupLink {
        self.links[node]
    }

    fn set_link(&mut self, node: Node, link: GroupLink) {
        if let Some(journal) = &mut self.journal {
            journal.push((node, self.links[node]));
        }
        self.links[node] = link;
    }

    /// Is `node` part of a group of two or more?
    pub fn is_grouped(&self, node: Node) -> bool {
        let link = self.links[node];
        link.prev.is_some() || link.next.is_some()
    }

    /// The first node of `node`'s group.
    pub fn head(&self, node: Node) -> Node {
        let mut n = node;
        while let Some(prev) = self.links[n].prev.expand() {
            n = prev;
        }
        n
    }

    /// Distance of `node` from its group head.
    pub fn offset(&self, node: Node) -> u32 {
        let mut n = node;
        let mut off = 0;
        while let Some(prev) = self.links[n].prev.expand() {
            n = prev;
            off += 1;
        }
        off
    }

    /// Every member of `node`'s group, head first.
    pub fn members(&self, node: Node) -> GroupMembers {
        let mut out = GroupMembers::new();
        let mut n = Some(self.head(node));
        while let Some(m) = n {
            out.push(m);
            n = self.links[m].next.expand();
        }
        out
    }

    /// Required alignment of `node`'s colour.
    pub fn get_node_alignment(&self, node: Node) -> Alignment {
        self.links[node].align
    }

    /// Required alignment of the head of `node`'s group.
    pub fn head_alignment(&self, node: Node) -> Alignment {
        self.links[self.head(node)].align
    }

    /// Start a group from `nodes`, in order. The first node must satisfy
    /// `align`. On failure nothing changes.
    pub fn make_group(&mut self, nodes: &[Node], align: Alignment) -> bool {
        self.transaction(|groups| {
            let Some(&first) = nodes.first() else {
                return true;
            };
            if !groups.require_alignment(first, align) {
                return false;
            }
            nodes
                .windows(2)
                .all(|pair| groups.add_to_group(pair[0], pair[1], false))
        })
    }

    /// Run `f`, undoing every link change it made if it returns `false`.
    pub fn transaction(&mut self, f: impl FnOnce(&mut Self) -> bool) -> bool {
        let outer = self.journal.replace(Vec::new());
        let ok = f(self);
        let journal = core::mem::replace(&mut self.journal, outer);
        let journal = journal.unwrap_or_default();
        if ok {
            if let Some(outer) = &mut self.journal {
                outer.extend(journal);
            }
        } else {
            for (node, link) in journal.into_iter().rev() {
                self.links[node] = link;
            }
        }
        ok
    }

    /// Combined head alignment of the chain starting at `head`, or `None` on
    /// contradiction.
    fn chain_alignment(&self, head: Node, base_offset: u32) -> Option<Alignment> {
        let mut align = Alignment::None;
        let mut n = Some(head);
        let mut off = base_offset;
        while let Some(m) = n {
            align = align.merge(self.links[m].align.shifted(off))?;
            if let Some(colour) = self.fixed.get(&m) {
                align = align.merge(fixed_head_alignment(colour.index, off))?;
            }
            n = self.links[m].next.expand();
            off += 1;
        }
        Some(align)
    }

    /// The head colour implied by fixed members of the chain at `head`.
    fn chain_fixed_base(&self, head: Node, base_offset: u32) -> Result<Option<Colour>, ()> {
        let mut base: Option<Colour> = None;
        let mut n = Some(head);
        let mut off = base_offset;
        while let Some(m) = n {
            if let Some(colour) = self.fixed.get(&m) {
                if colour.index < off {
                    return Err(());
                }
                let implied = Colour {
                    kind: colour.kind,
                    index: colour.index - off,
                };
                match base {
                    Some(b) if b != implied => return Err(()),
                    _ => base = Some(implied),
                }
            }
            n = self.links[m].next.expand();
            off += 1;
        }
        Ok(base)
    }

    /// Make `b` immediately follow `a`. Returns `false` if the join would
    /// create an inconsistent group: a cycle, a node with two successors or
    /// predecessors, contradictory alignment or contradictory fixed colours.
    pub fn add_to_group(&mut self, a: Node, b: Node, optional: bool) -> bool {
        if a == b {
            return false;
        }
        let la = self.links[a];
        let lb = self.links[b];
        if la.next.expand() == Some(b) {
            if !optional && la.optional {
                self.set_link(
                    a,
                    GroupLink {
                        optional: false,
                        ..la
                    },
                );
            }
            return true;
        }
        if la.next.is_some() || lb.prev.is_some() {
            return false;
        }
        let head_a = self.head(a);
        if head_a == self.head(b) {
            return false;
        }

        // `b` lands at this offset from `head_a`.
        let off_b = self.offset(a) + 1;
        let Some(align_a) = self.chain_alignment(head_a, 0) else {
            return false;
        };
        let Some(align_b) = self.chain_alignment(b, off_b) else {
            return false;
        };
        let Some(align) = align_a.merge(align_b) else {
            return false;
        };
        match (
            self.chain_fixed_base(head_a, 0),
            self.chain_fixed_base(b, off_b),
        ) {
            (Ok(Some(x)), Ok(Some(y))) if x != y => return false,
            (Ok(_), Ok(_)) => {}
            _ => return false,
        }

        self.set_link(
            a,
            GroupLink {
                next: b.into(),
                optional,
                linked_by_inst: !optional,
                ..la
            },
        );
        self.set_link(b, GroupLink { prev: a.into(), ..lb });
        self.propagate_alignment(head_a, align);
        trace!("group: {} -> {} (head {}, {:?})", a, b, head_a, align);
        true
    }

    /// Require `node`'s colour to satisfy `align`, propagating the
    /// requirement through its group.
    pub fn require_alignment(&mut self, node: Node, align: Alignment) -> bool {
        if align == Alignment::None {
            return true;
        }
        let head = self.head(node);
        let off = self.offset(node);
        let Some(current) = self.chain_alignment(head, 0) else {
            return false;
        };
        match current.merge(align.shifted(off)) {
            Some(merged) => {
                self.propagate_alignment(head, merged);
                true
            }
            None => false,
        }
    }

    fn propagate_alignment(&mut self, head: Node, align: Alignment) {
        let mut n = Some(head);
        let mut off = 0;
        while let Some(m) = n {
            let link = self.links[m];
            self.set_link(
                m,
                GroupLink {
                    align: align.shifted(off),
                    ..link
                },
            );
            n = link.next.expand();
            off += 1;
        }
    }

    /// Take `node` out of its group, splitting the chain around it.
    pub fn remove_from_group(&mut self, node: Node) {
        let link = self.links[node];
        if let Some(prev) = link.prev.expand() {
            self.drop_link_after(prev);
        }
        if link.next.is_some() {
            self.drop_link_after(node);
        }
    }

    /// Cut the chain between `node` and its successor.
    pub fn drop_link_after(&mut self, node: Node) {
        let link = self.links[node];
        if let Some(next) = link.next.expand() {
            self.set_link(
                node,
                GroupLink {
                    next: None.into(),
                    optional: false,
                    linked_by_inst: false,
                    ..link
                },
            );
            let next_link = self.links[next];
            self.set_link(
                next,
                GroupLink {
                    prev: None.into(),
                    ..next_link
                },
            );
        }
    }
}

/// Alignment a head must have so that offset `off` lands on `index`.
fn fixed_head_alignment(index: u32, off: u32) -> Alignment {
    if index < off {
        return Alignment::None;
    }
    if (index - off) % 2 == 0 {
        Alignment::Even
    } else {
        Alignment::Odd
    }
}

/// Build groups for `program`, inserting copies where an instruction's
/// operands cannot be grouped as they stand.
///
/// Dynamically indexed arrays become groups first. Then, for every
/// instruction with a consecutive source bundle or consecutive destinations,
/// the operands are chained. If the chain cannot be formed, the partial work
/// for that instruction is rolled back and the operands are replaced by fresh
/// temporaries: sources are copied in before the instruction, destinations
/// copied out after it. Fresh nodes carry no links, so they only fail to
/// group when the instruction's own alignment is contradictory.
pub fn build_groups(
    program: &mut Program,
    config: &Config,
    fixed: &FxHashMap<Node, Colour>,
) -> RegallocResult<RegisterGroups> {
    let mut groups = RegisterGroups::new();
    for (&node, &colour) in fixed {
        groups.set_fixed(node, colour);
    }
    let mut layout = NodeLayout::new(program, config);
    // Primary attributes and outputs are their own colour. New temporaries
    // are numbered after them, so these nodes stay put as the layout grows.
    for bank in [HwBank::PrimAttr, HwBank::Output] {
        let mut index = 0;
        while let Some(node) = layout.register_to_node(bank, index) {
            groups.set_fixed(node, Colour::new(bank, index));
            index += 1;
        }
    }

    for array in program.arrays.clone() {
        let nodes: SmallVec<[Node; 8]> = (0..array.len)
            .filter_map(|k| layout.temp_node(array.base + k))
            .collect();
        if !groups.make_group(&nodes, Alignment::None) {
            let node = nodes.first().copied().unwrap_or(Node::from_u32(0));
            return Err(RegallocError::group_inconsistent(node));
        }
    }

    let funcs: Vec<FuncRef> = program.functions.keys().collect();
    let mut copies = 0;
    for func_ref in funcs {
        let blocks: Vec<Block> = program.functions[func_ref].blocks.keys().collect();
        for block in blocks {
            let mut pos = 0;
            while pos < program.functions[func_ref].blocks[block].insts.len() {
                let inst = program.functions[func_ref].blocks[block].insts[pos];
                let data = program.functions[func_ref].insts[inst].clone();
                let info = data.info();

                let mut src_bundle = None;
                if let Some((first, count)) = info.consecutive_srcs {
                    let range = first as usize..(first + count) as usize;
                    if range.end <= data.srcs.len() {
                        src_bundle = Some(range);
                    }
                }
                let dest_bundle = if info.consecutive_dests && data.dests.len() > 1 {
                    Some(0..data.dests.len())
                } else {
                    None
                };
                if src_bundle.is_none() && dest_bundle.is_none() {
                    pos += 1;
                    continue;
                }

                let mut new_data = data.clone();
                let mut before: Vec<InstData> = Vec::new();
                let mut after: Vec<InstData> = Vec::new();

                if let Some(range) = src_bundle {
                    let bundle = &data.srcs[range.clone()];
                    let ok = try_chain(&mut groups, &layout, bundle, info.group_align);
                    if !ok {
                        let base = program.new_temps(range.len() as u32);
                        layout = NodeLayout::new(program, config);
                        for (k, idx) in range.enumerate() {
                            let old = data.srcs[idx];
                            let fresh = copy_operand(old, base + k as u32);
                            before.push(InstData::mov(fresh, old));
                            new_data.srcs[idx] = fresh;
                        }
                        copies += 1;
                        let fresh_ops: SmallVec<[Operand; 4]> =
                            new_data.srcs[src_range(info)].iter().copied().collect();
                        if !try_chain(&mut groups, &layout, &fresh_ops, info.group_align) {
                            return Err(RegallocError::alignment_conflict(
                                layout.temp_node(base).unwrap_or(Node::from_u32(0)),
                            ));
                        }
                    }
                }

                if let Some(range) = dest_bundle {
                    let bundle = &data.dests[range.clone()];
                    let ok = try_chain(&mut groups, &layout, bundle, info.group_align);
                    if !ok {
                        let base = program.new_temps(range.len() as u32);
                        layout = NodeLayout::new(program, config);
                        for (k, idx) in range.enumerate() {
                            let old = data.dests[idx];
                            let fresh = copy_operand(old, base + k as u32);
                            after.push(InstData::mov(old, fresh));
                            new_data.dests[idx] = fresh;
                        }
                        copies += 1;
                        let fresh_ops: SmallVec<[Operand; 4]> =
                            new_data.dests.iter().copied().collect();
                        if !try_chain(&mut groups, &layout, &fresh_ops, info.group_align) {
                            return Err(RegallocError::alignment_conflict(
                                layout.temp_node(base).unwrap_or(Node::from_u32(0)),
                            ));
                        }
                    }
                }

                let func = &mut program.functions[func_ref];
                if let Some(pred) = data.pred {
                    for copy in after.iter_mut() {
                        copy.pred = Some(pred);
                    }
                }
                func.insts[inst] = new_data;
                let n_before = before.len();
                for (k, copy) in before.into_iter().enumerate() {
                    func.insert_inst(block, pos + k, copy);
                }
                let inst_pos = pos + n_before;
                for (k, copy) in after.into_iter().enumerate() {
                    func.insert_inst(block, inst_pos + 1 + k, copy);
                }
                pos = inst_pos + 1;
            }
        }
    }
    if copies > 0 {
        log::debug!("groups: inserted copies for {} operand bundles", copies);
    }
    Ok(groups)
}

fn src_range(info: &crate::ir::OpcodeInfo) -> core::ops::Range<usize> {
    match info.consecutive_srcs {
        Some((first, count)) => first as usize..(first + count) as usize,
        None => 0..0,
    }
}

/// A fresh temporary operand standing in for `op`.
fn copy_operand(op: Operand, temp: u32) -> Operand {
    let mut fresh = Operand::temp(temp)
        .with_mask(op.mask)
        .with_format(op.format);
    if op.reg.bank == RegBank::Immediate {
        fresh.mask = crate::ir::ALL_CHANNELS;
    }
    fresh
}

/// Chain the nodes of `ops` into one group, all or nothing.
///
/// A bundle mixing primary attributes or outputs with other registers is
/// refused: the precoloured members would pin the rest onto registers of a
/// bank they cannot use.
fn try_chain(
    groups: &mut RegisterGroups,
    layout: &NodeLayout,
    ops: &[Operand],
    align: Alignment,
) -> bool {
    let mut nodes: SmallVec<[Node; 4]> = SmallVec::new();
    for op in ops {
        if op.dyn_len.is_some() {
            return false;
        }
        match layout.reg_node(op.reg) {
            Some(node) => nodes.push(node),
            None => return false,
        }
    }
    let precoloured = nodes
        .iter()
        .filter(|&&n| matches!(layout.bank(n), HwBank::PrimAttr | HwBank::Output))
        .count();
    if precoloured != 0 && precoloured != nodes.len() {
        return false;
    }
    groups.make_group(&nodes, align)
}
