//! The interference graph.
//!
//! Two nodes interfere when one is written while the other is live on a
//! shared channel. A C10 value and a non-C10 value interfere whenever both are
//! live, whatever their channels. Destinations written by the same
//! instruction always interfere with each other.
//!
//! The graph is built with one backward walk per block starting from the
//! block's live-out set. A similar walk records which nodes cross the split
//! and feedback points and which are live in the post-split region.

use super::liveness::{inst_reads, inst_writes, transfer_inst, LiveSet, Liveness};
use super::node::{Node, NodeFlags, NodeInfo, NodeLayout};
use crate::ir::{ChannelMask, Inst, Program, ProgramPoint};
use crate::trace;
use cranelift_entity::SecondaryMap;
use rustc_hash::{FxHashMap, FxHashSet};

/// An undirected graph over nodes without duplicate edges.
#[derive(Clone, Debug, Default)]
pub struct InterferenceGraph {
    adj: SecondaryMap<Node, Vec<Node>>,
    edges: FxHashSet<(Node, Node)>,
}

impl InterferenceGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge between `a` and `b`. Self edges and duplicates are ignored.
    pub fn add_edge(&mut self, a: Node, b: Node) {
        if a == b {
            return;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if self.edges.insert(key) {
            self.adj[a].push(b);
            self.adj[b].push(a);
        }
    }

    /// Do `a` and `b` interfere?
    pub fn interferes(&self, a: Node, b: Node) -> bool {
        let key = if a < b { (a, b) } else { (b, a) };
        self.edges.contains(&key)
    }

    /// The neighbours of `node`.
    pub fn neighbours(&self, node: Node) -> &[Node] {
        &self.adj[node]
    }

    /// Number of neighbours of `node`.
    pub fn degree(&self, node: Node) -> usize {
        self.adj[node].len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Build the graph for `program`.
    pub fn build(
        program: &Program,
        layout: &NodeLayout,
        liveness: &Liveness,
        info: &NodeInfo,
    ) -> Self {
        let mut graph = Self::new();
        for (func_ref, func) in program.functions.iter() {
            for (block, data) in func.blocks.iter() {
                let mut live = liveness.live_out(func_ref, block).clone();
                for &inst in data.insts.iter().rev() {
                    let inst_data = &func.insts[inst];
                    let reads = inst_reads(layout, liveness.summaries(), inst_data);
                    let writes = inst_writes(layout, liveness.summaries(), inst_data);

                    for (i, w) in writes.iter().enumerate() {
                        for (&other, &mask) in live.iter() {
                            if conflicts(info, w.node, w.mask, other, mask) {
                                graph.add_edge(w.node, other);
                            }
                        }
                        for w2 in &writes[i + 1..] {
                            graph.add_edge(w.node, w2.node);
                        }
                    }

                    if let Some(callee) = inst_data.callee() {
                        let referenced = &liveness.summary(callee).referenced;
                        for &across in live.keys() {
                            for &used in referenced {
                                graph.add_edge(across, used);
                            }
                        }
                    }

                    transfer_inst(&mut live, &reads, &writes);
                }
            }
        }

        // Values live into the program are all defined on entry.
        let main = program.main_func();
        let entry_live: Vec<(Node, ChannelMask)> = liveness
            .live_in(program.main, main.entry)
            .iter()
            .map(|(&n, &m)| (n, m))
            .collect();
        for (i, &(a, ma)) in entry_live.iter().enumerate() {
            for &(b, mb) in &entry_live[i + 1..] {
                if conflicts(info, a, ma, b, mb) {
                    graph.add_edge(a, b);
                }
            }
        }

        trace!("interference: {} edges", graph.num_edges());
        graph
    }
}

/// Flag the nodes live across the split and feedback points and the nodes
/// live in the post-split region of `main`.
pub fn mark_regions(
    program: &Program,
    layout: &NodeLayout,
    liveness: &Liveness,
    info: &mut NodeInfo,
) {
    if program.split_point.is_none() && program.feedback_point.is_none() {
        return;
    }
    let post_split = post_split_insts(program);
    for (func_ref, func) in program.functions.iter() {
        for (block, data) in func.blocks.iter() {
            let mut live = liveness.live_out(func_ref, block).clone();
            for &inst in data.insts.iter().rev() {
                let point = ProgramPoint::new(func_ref, inst);
                let inst_data = &func.insts[inst];
                let reads = inst_reads(layout, liveness.summaries(), inst_data);
                let writes = inst_writes(layout, liveness.summaries(), inst_data);

                if program.split_point == Some(point) {
                    mark(&live, &mut info.flags, NodeFlags::CROSSES_SPLIT);
                }
                if program.feedback_point == Some(point) {
                    mark(&live, &mut info.flags, NodeFlags::CROSSES_FEEDBACK);
                }
                if func_ref == program.main && post_split.contains(&inst) {
                    mark(&live, &mut info.flags, NodeFlags::POST_SPLIT);
                    for access in reads.iter().chain(writes.iter()) {
                        info.flags[access.node] |= NodeFlags::POST_SPLIT;
                    }
                }
                transfer_inst(&mut live, &reads, &writes);
            }
        }
    }
}

fn mark(live: &LiveSet, flags: &mut SecondaryMap<Node, NodeFlags>, flag: NodeFlags) {
    for &node in live.keys() {
        flags[node] |= flag;
    }
}

/// Does writing `a` on `mask_a` clobber `b` live on `mask_b`?
fn conflicts(info: &NodeInfo, a: Node, mask_a: ChannelMask, b: Node, mask_b: ChannelMask) -> bool {
    if a == b {
        return false;
    }
    let c10_a = info.flags[a].contains(NodeFlags::C10);
    let c10_b = info.flags[b].contains(NodeFlags::C10);
    mask_a & mask_b != 0 || c10_a != c10_b
}

/// Instructions of `main` strictly after the split point.
fn post_split_insts(program: &Program) -> FxHashSet<Inst> {
    let mut out = FxHashSet::default();
    let Some(split) = program.split_point else {
        return out;
    };
    if split.func != program.main {
        return out;
    }
    let order: FxHashMap<Inst, usize> = program
        .main_func()
        .layout()
        .enumerate()
        .map(|(i, (_, inst))| (inst, i))
        .collect();
    if let Some(&split_index) = order.get(&split.inst) {
        out.extend(
            order
                .iter()
                .filter(|&(_, &i)| i > split_index)
                .map(|(&inst, _)| inst),
        );
    }
    out
}
