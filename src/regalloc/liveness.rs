//! Block-level liveness.
//!
//! Liveness is tracked per channel: a node is live with the mask of channels
//! whose current value is still needed. The analysis is the classic
//! backward dataflow over each function's CFG, iterated to a fixed point.
//!
//! Calls are summarised: a call reads the callee's live-in set and
//! conditionally writes everything the callee may define. Summaries are
//! recomputed until they stop changing, which handles callees defined after
//! their callers.
//!
//! At the exit of `main`, every output register and every temporary bound to
//! a shader output is live.

use super::node::{Node, NodeLayout};
use crate::ir::{Block, ChannelMask, FuncRef, HwBank, InstData, Program, ALL_CHANNELS};
use crate::trace;
use cranelift_entity::{EntityRef, SecondaryMap};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// Live nodes with their live channels.
pub type LiveSet = BTreeMap<Node, ChannelMask>;

/// Add `mask` to `node`'s live channels.
pub fn live_insert(set: &mut LiveSet, node: Node, mask: ChannelMask) {
    if mask != 0 {
        *set.entry(node).or_insert(0) |= mask;
    }
}

/// Remove `mask` from `node`'s live channels.
pub fn live_remove(set: &mut LiveSet, node: Node, mask: ChannelMask) {
    if let Some(live) = set.get_mut(&node) {
        *live &= !mask;
        if *live == 0 {
            set.remove(&node);
        }
    }
}

/// A register access by an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    /// The node.
    pub node: Node,
    /// Channels accessed.
    pub mask: ChannelMask,
    /// For writes: earlier contents may survive.
    pub conditional: bool,
}

/// Accesses of one instruction.
pub type Accesses = SmallVec<[Access; 8]>;

/// What a function does to its caller's registers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FuncSummary {
    /// Nodes read before being written.
    pub live_in: LiveSet,
    /// Nodes the function may write.
    pub defs: LiveSet,
    /// Every node referenced by the function or its callees.
    pub referenced: BTreeSet<Node>,
}

/// Nodes read by `data`.
pub fn inst_reads(
    layout: &NodeLayout,
    summaries: &SecondaryMap<FuncRef, FuncSummary>,
    data: &InstData,
) -> Accesses {
    let mut out = Accesses::new();
    if let Some(callee) = data.callee() {
        for (&node, &mask) in &summaries[callee].live_in {
            out.push(Access {
                node,
                mask,
                conditional: false,
            });
        }
        return out;
    }
    for op in &data.srcs {
        for node in layout.operand_nodes(op) {
            out.push(Access {
                node,
                mask: op.mask,
                conditional: false,
            });
        }
    }
    out
}

/// Nodes written by `data`.
pub fn inst_writes(
    layout: &NodeLayout,
    summaries: &SecondaryMap<FuncRef, FuncSummary>,
    data: &InstData,
) -> Accesses {
    let mut out = Accesses::new();
    if let Some(callee) = data.callee() {
        for (&node, &mask) in &summaries[callee].defs {
            out.push(Access {
                node,
                mask,
                conditional: true,
            });
        }
        return out;
    }
    for op in &data.dests {
        let conditional = data.is_conditional() || op.dyn_len.is_some();
        for node in layout.operand_nodes(op) {
            out.push(Access {
                node,
                mask: op.mask,
                conditional,
            });
        }
    }
    out
}

/// Apply one instruction backwards: remove unconditional writes, add reads.
pub fn transfer_inst(live: &mut LiveSet, reads: &[Access], writes: &[Access]) {
    for w in writes {
        if !w.conditional {
            live_remove(live, w.node, w.mask);
        }
    }
    for r in reads {
        live_insert(live, r.node, r.mask);
    }
}

#[derive(Clone, Debug, Default)]
struct FuncLiveness {
    live_in: Vec<LiveSet>,
    live_out: Vec<LiveSet>,
}

/// Live-in and live-out sets of every block of every function.
#[derive(Clone, Debug)]
pub struct Liveness {
    funcs: SecondaryMap<FuncRef, FuncLiveness>,
    summaries: SecondaryMap<FuncRef, FuncSummary>,
    exit_live: LiveSet,
}

impl Liveness {
    /// Compute liveness for `program`.
    pub fn compute(program: &Program, layout: &NodeLayout) -> Self {
        let exit_live = program_exit_live(program, layout);
        let mut this = Self {
            funcs: SecondaryMap::new(),
            summaries: SecondaryMap::new(),
            exit_live,
        };

        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut changed = false;
            for func_ref in program.functions.keys().rev() {
                this.solve_function(program, layout, func_ref);
                let summary = this.summarise(program, layout, func_ref);
                if summary != this.summaries[func_ref] {
                    this.summaries[func_ref] = summary;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        trace!("liveness converged after {} rounds", rounds);
        this
    }

    fn solve_function(&mut self, program: &Program, layout: &NodeLayout, func_ref: FuncRef) {
        let func = &program.functions[func_ref];
        let is_main = func_ref == program.main;
        let n = func.blocks.len();
        let mut fl = FuncLiveness {
            live_in: vec![LiveSet::new(); n],
            live_out: vec![LiveSet::new(); n],
        };

        let mut changed = true;
        while changed {
            changed = false;
            for (block, data) in func.blocks.iter().rev() {
                let mut out = LiveSet::new();
                if data.succs.is_empty() && is_main {
                    out = self.exit_live.clone();
                }
                for succ in &data.succs {
                    for (&node, &mask) in &fl.live_in[succ.index()] {
                        live_insert(&mut out, node, mask);
                    }
                }
                let mut live = out.clone();
                for &inst in data.insts.iter().rev() {
                    let inst_data = &func.insts[inst];
                    let reads = inst_reads(layout, &self.summaries, inst_data);
                    let writes = inst_writes(layout, &self.summaries, inst_data);
                    transfer_inst(&mut live, &reads, &writes);
                }
                let b = block.index();
                if live != fl.live_in[b] || out != fl.live_out[b] {
                    fl.live_in[b] = live;
                    fl.live_out[b] = out;
                    changed = true;
                }
            }
        }
        self.funcs[func_ref] = fl;
    }

    fn summarise(&self, program: &Program, layout: &NodeLayout, func_ref: FuncRef) -> FuncSummary {
        let func = &program.functions[func_ref];
        let mut summary = FuncSummary {
            live_in: self.funcs[func_ref].live_in[func.entry.index()].clone(),
            ..FuncSummary::default()
        };
        for (_, inst) in func.layout() {
            let data = &func.insts[inst];
            for w in inst_writes(layout, &self.summaries, data) {
                live_insert(&mut summary.defs, w.node, w.mask);
                summary.referenced.insert(w.node);
            }
            for r in inst_reads(layout, &self.summaries, data) {
                summary.referenced.insert(r.node);
            }
            if let Some(callee) = data.callee() {
                summary
                    .referenced
                    .extend(self.summaries[callee].referenced.iter().copied());
            }
        }
        summary
    }

    /// Nodes live on entry to `block`.
    pub fn live_in(&self, func: FuncRef, block: Block) -> &LiveSet {
        &self.funcs[func].live_in[block.index()]
    }

    /// Nodes live on exit from `block`.
    pub fn live_out(&self, func: FuncRef, block: Block) -> &LiveSet {
        &self.funcs[func].live_out[block.index()]
    }

    /// Call summaries.
    pub fn summaries(&self) -> &SecondaryMap<FuncRef, FuncSummary> {
        &self.summaries
    }

    /// The summary of `func`.
    pub fn summary(&self, func: FuncRef) -> &FuncSummary {
        &self.summaries[func]
    }

    /// Nodes live at the end of the program.
    pub fn exit_live(&self) -> &LiveSet {
        &self.exit_live
    }

    /// Record the live-out sets on the program's blocks, as virtual
    /// registers.
    pub fn store_live_out(&self, program: &mut Program, layout: &NodeLayout) {
        for (func_ref, func) in program.functions.iter_mut() {
            for (block, data) in func.blocks.iter_mut() {
                data.live_out = self
                    .live_out(func_ref, block)
                    .iter()
                    .map(|(&node, &mask)| (layout.node_reg(node), mask))
                    .collect();
            }
        }
    }
}

/// Nodes that must hold their value when the program ends.
fn program_exit_live(program: &Program, layout: &NodeLayout) -> LiveSet {
    let mut live = LiveSet::new();
    for index in 0..program.regs.outputs {
        if let Some(node) = layout.register_to_node(HwBank::Output, index) {
            live_insert(&mut live, node, ALL_CHANNELS);
        }
    }
    for entry in program.fixed.iter().filter(|e| e.is_output) {
        for k in 0..entry.count {
            if let Some(node) = layout.temp_node(entry.vreg + k) {
                live_insert(&mut live, node, ALL_CHANNELS);
            }
        }
    }
    live
}
