//! Live intervals for the linear-scan engine.
//!
//! Every instruction of the program gets a position. Positions are numbered
//! from the end of the program: the last instruction has the smallest
//! position, and an interval `[start, end]` has `start >= end`. Instruction
//! positions are even; the odd position just above an instruction is where
//! reloads feeding it live, the odd position just below is where values it
//! writes are stored.
//!
//! A node may have several intervals, one per stretch of the program where its
//! value is needed. Intervals are built by a backward walk over each block,
//! seeded from the block's live-out set, so they follow block-level liveness
//! exactly. Nodes that flow between functions are merged into a single
//! `PARAMETER` interval covering every function that touches them.

use super::colour::Colour;
use super::liveness::{inst_reads, inst_writes, transfer_inst, LiveSet, Liveness};
use super::node::{Node, NodeLayout};
use crate::ir::{FuncRef, Program, ProgramPoint, ALL_CHANNELS};
use crate::trace;
use bitflags::bitflags;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// A reference to an interval.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalRef(u32);
entity_impl!(IntervalRef, "iv");

bitflags! {
    /// How the instructions in an interval touch its node.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct IntervalFlags: u8 {
        /// Closed by an unconditional write.
        const WRITTEN = 1 << 0;
        /// Written conditionally or partially somewhere inside.
        const COND_WRITTEN = 1 << 1;
        /// Read somewhere inside.
        const READ = 1 << 2;
        /// Carries a value between functions.
        const PARAMETER = 1 << 3;
        /// Lies entirely in a subroutine.
        const FUNC_LOCAL = 1 << 4;
        /// Still open during construction.
        const PENDING = 1 << 5;
    }
}

/// A live interval.
#[derive(Clone, Debug)]
pub struct Interval {
    /// The node whose value lives here.
    pub node: Node,
    /// First position, the larger number.
    pub start: u32,
    /// Last position, the smaller number.
    pub end: u32,
    /// Assigned colour.
    pub colour: Colour,
    /// The interval has been spilled and split into access stubs.
    pub spilled: bool,
    /// Number of reads and writes inside.
    pub accesses: u32,
    /// Access flags.
    pub flags: IntervalFlags,
    /// Interval of a move destination this one feeds, a coalescing candidate.
    pub tied: PackedOption<IntervalRef>,
}

impl Interval {
    fn new(node: Node, start: u32, end: u32, flags: IntervalFlags) -> Self {
        Self {
            node,
            start,
            end,
            colour: Colour::UNDEFINED,
            spilled: false,
            accesses: 1,
            flags,
            tied: None.into(),
        }
    }

    /// Do two intervals need their values at the same time?
    ///
    /// A value dying at an instruction does not overlap a value born there.
    /// Two values born at the same instruction always overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        (self.start > other.end && other.start > self.end) || self.start == other.start
    }

    /// Does the interval hold its value across position `pos`?
    pub fn crosses(&self, pos: u32) -> bool {
        self.start > pos && self.end < pos
    }

    /// Positions covered.
    pub fn span(&self) -> u32 {
        self.start - self.end + 1
    }
}

/// One instruction's accesses to one node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeAccess {
    /// Position of the instruction.
    pub pos: u32,
    /// The instruction.
    pub point: ProgramPoint,
    /// The instruction reads the node.
    pub reads: bool,
    /// The instruction writes the node.
    pub writes: bool,
    /// A write leaves earlier contents in place.
    pub partial: bool,
}

impl NodeAccess {
    /// The position range a temporary standing in for the node at this
    /// access would occupy.
    pub fn stub_range(&self) -> (u32, u32) {
        let start = if self.reads || self.partial {
            self.pos + 1
        } else {
            self.pos
        };
        let end = if self.writes { self.pos - 1 } else { self.pos };
        (start, end)
    }
}

/// All intervals of a program.
#[derive(Clone, Debug, Default)]
pub struct Intervals {
    /// Interval arena.
    pub intervals: PrimaryMap<IntervalRef, Interval>,
    /// Intervals of each node, latest-starting last.
    pub by_node: SecondaryMap<Node, SmallVec<[IntervalRef; 2]>>,
    /// Every access to every node, in program order.
    pub accesses: FxHashMap<Node, Vec<NodeAccess>>,
    /// `(position, callee)` of every call.
    pub calls: Vec<(u32, FuncRef)>,
    /// Position of every instruction.
    pub positions: FxHashMap<ProgramPoint, u32>,
}

/// Position of the instruction with forward index `i` of `total`.
fn position(total: usize, i: usize) -> u32 {
    2 * (total - i) as u32
}

impl Intervals {
    /// Build intervals for every node of `program`.
    pub fn build(program: &Program, layout: &NodeLayout, liveness: &Liveness) -> Self {
        let mut this = Self::default();
        let total = program.num_insts();
        let summaries = liveness.summaries();

        let mut index = 0;
        for (func_ref, func) in program.functions.iter() {
            for (block, data) in func.blocks.iter() {
                if data.insts.is_empty() {
                    continue;
                }
                let first_pos = position(total, index);
                let last_pos = position(total, index + data.insts.len() - 1);
                index += data.insts.len();

                let mut live: LiveSet = liveness.live_out(func_ref, block).clone();
                let mut open: FxHashMap<Node, IntervalRef> = FxHashMap::default();
                for &node in live.keys() {
                    let iv = this.push(Interval {
                        accesses: 0,
                        ..Interval::new(node, 0, last_pos - 1, IntervalFlags::PENDING)
                    });
                    open.insert(node, iv);
                }

                for (k, &inst) in data.insts.iter().enumerate().rev() {
                    let pos = first_pos - 2 * k as u32;
                    let point = ProgramPoint::new(func_ref, inst);
                    this.positions.insert(point, pos);
                    let inst_data = &func.insts[inst];
                    if let Some(callee) = inst_data.callee() {
                        this.calls.push((pos, callee));
                    }
                    let reads = inst_reads(layout, summaries, inst_data);
                    let writes = inst_writes(layout, summaries, inst_data);

                    let mut closed_here: SmallVec<[(Node, IntervalRef); 2]> = SmallVec::new();
                    for w in &writes {
                        // A spilled node is reloaded before any write that
                        // may leave channels in place, live or not.
                        let keeps = w.conditional || w.mask != ALL_CHANNELS;
                        this.record_access(w.node, pos, point, false, true, keeps);
                        match open.get(&w.node).copied() {
                            Some(iv) => {
                                let interval = &mut this.intervals[iv];
                                interval.accesses += 1;
                                let still_live = !w.conditional
                                    && live.get(&w.node).map_or(false, |&m| m & !w.mask != 0);
                                if w.conditional || still_live {
                                    interval.flags |= IntervalFlags::COND_WRITTEN;
                                } else {
                                    interval.start = pos;
                                    interval.flags |= IntervalFlags::WRITTEN;
                                    interval.flags.remove(IntervalFlags::PENDING);
                                    open.remove(&w.node);
                                    closed_here.push((w.node, iv));
                                }
                            }
                            None => {
                                let flags = if w.conditional {
                                    IntervalFlags::COND_WRITTEN
                                } else {
                                    IntervalFlags::WRITTEN
                                };
                                let iv = this.push(Interval::new(w.node, pos, pos, flags));
                                closed_here.push((w.node, iv));
                            }
                        }
                    }

                    let mut opened_here: SmallVec<[(Node, IntervalRef); 4]> = SmallVec::new();
                    for r in &reads {
                        this.record_access(r.node, pos, point, true, false, false);
                        match open.get(&r.node).copied() {
                            Some(iv) => {
                                let interval = &mut this.intervals[iv];
                                if !opened_here.iter().any(|&(n, _)| n == r.node) {
                                    interval.accesses += 1;
                                }
                                interval.flags |= IntervalFlags::READ;
                            }
                            None => {
                                let iv = this.push(Interval::new(
                                    r.node,
                                    0,
                                    pos,
                                    IntervalFlags::READ | IntervalFlags::PENDING,
                                ));
                                open.insert(r.node, iv);
                                opened_here.push((r.node, iv));
                            }
                        }
                    }

                    // mov d, s where s dies here: s may take d's colour.
                    if inst_data.is_plain_move() {
                        if let ([(_, dst_iv)], [(_, src_iv)]) =
                            (closed_here.as_slice(), opened_here.as_slice())
                        {
                            this.intervals[*src_iv].tied = (*dst_iv).into();
                        }
                    }

                    transfer_inst(&mut live, &reads, &writes);
                }

                for (_, iv) in open {
                    let interval = &mut this.intervals[iv];
                    interval.start = first_pos + 1;
                    interval.flags.remove(IntervalFlags::PENDING);
                }
            }
        }

        this.finish(program, layout, liveness);
        this
    }

    fn push(&mut self, interval: Interval) -> IntervalRef {
        let node = interval.node;
        let iv = self.intervals.push(interval);
        self.by_node[node].push(iv);
        iv
    }

    fn record_access(
        &mut self,
        node: Node,
        pos: u32,
        point: ProgramPoint,
        reads: bool,
        writes: bool,
        partial: bool,
    ) {
        let list = self.accesses.entry(node).or_default();
        match list.last_mut() {
            Some(last) if last.pos == pos => {
                last.reads |= reads;
                last.writes |= writes;
                last.partial |= partial;
            }
            _ => list.push(NodeAccess {
                pos,
                point,
                reads,
                writes,
                partial,
            }),
        }
    }

    /// Merge touching intervals, flag parameters and function-local
    /// intervals, and drop intervals of nodes that are never accessed.
    fn finish(&mut self, program: &Program, layout: &NodeLayout, liveness: &Liveness) {
        let total = program.num_insts();
        let mut index = 0;
        let mut ranges: Vec<(FuncRef, u32, u32)> = Vec::new();
        for (func_ref, func) in program.functions.iter() {
            let n = func.num_insts();
            if n > 0 {
                let hi = position(total, index) + 1;
                let lo = position(total, index + n - 1) - 1;
                ranges.push((func_ref, hi, lo));
            }
            index += n;
        }
        let func_at = |pos: u32| {
            ranges
                .iter()
                .find(|&&(_, hi, lo)| pos <= hi && pos >= lo)
                .map(|&(f, _, _)| f)
        };

        let mut fixed_outputs = SmallVec::<[Node; 8]>::new();
        for entry in program.fixed.iter().filter(|e| e.is_output) {
            for k in 0..entry.count {
                if let Some(node) = layout.temp_node(entry.vreg + k) {
                    fixed_outputs.push(node);
                }
            }
        }

        for list in self.accesses.values_mut() {
            list.reverse();
        }

        let nodes: Vec<Node> = self
            .by_node
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(n, _)| n)
            .collect();
        for node in nodes {
            let mut list: SmallVec<[IntervalRef; 2]> = core::mem::take(&mut self.by_node[node]);
            list.sort_by_key(|&iv| core::cmp::Reverse(self.intervals[iv].start));

            let funcs: SmallVec<[FuncRef; 2]> = {
                let mut fs: SmallVec<[FuncRef; 2]> = SmallVec::new();
                for &iv in &list {
                    if let Some(f) = func_at(self.intervals[iv].end) {
                        if !fs.contains(&f) {
                            fs.push(f);
                        }
                    }
                }
                fs
            };
            let live_into_sub = program.functions.iter().any(|(f, func)| {
                f != program.main && liveness.live_in(f, func.entry).contains_key(&node)
            });
            let parameter = funcs.len() > 1 || live_into_sub;

            let mut merged: SmallVec<[IntervalRef; 2]> = SmallVec::new();
            for iv in list {
                match merged.last().copied() {
                    Some(prev)
                        if parameter || self.intervals[iv].start >= self.intervals[prev].end =>
                    {
                        let cur = self.intervals[iv].clone();
                        let p = &mut self.intervals[prev];
                        p.end = p.end.min(cur.end);
                        p.start = p.start.max(cur.start);
                        p.accesses += cur.accesses;
                        p.flags |= cur.flags;
                        if p.tied.is_none() {
                            p.tied = cur.tied;
                        }
                        self.redirect_ties(iv, prev);
                    }
                    _ => merged.push(iv),
                }
            }

            for &iv in &merged {
                let interval = &mut self.intervals[iv];
                if parameter {
                    interval.flags |= IntervalFlags::PARAMETER;
                } else if funcs.first().map_or(false, |&f| f != program.main) {
                    interval.flags |= IntervalFlags::FUNC_LOCAL;
                }
            }

            let accessed = merged.iter().any(|&iv| {
                self.intervals[iv].flags.intersects(
                    IntervalFlags::READ | IntervalFlags::WRITTEN | IntervalFlags::COND_WRITTEN,
                )
            });
            if accessed || fixed_outputs.contains(&node) {
                self.by_node[node] = merged;
            }
        }
        trace!(
            "intervals: {} nodes, {} calls",
            self.by_node.values().filter(|l| !l.is_empty()).count(),
            self.calls.len()
        );
    }

    fn redirect_ties(&mut self, from: IntervalRef, to: IntervalRef) {
        for (_, interval) in self.intervals.iter_mut() {
            if interval.tied.expand() == Some(from) {
                interval.tied = to.into();
            }
        }
    }

    /// Live intervals of `node`.
    pub fn of(&self, node: Node) -> &[IntervalRef] {
        &self.by_node[node]
    }

    /// Nodes with at least one interval.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.by_node
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(n, _)| n)
    }

    /// Does interval `a` hold a value across a call into a function that
    /// references `b`'s node?
    fn crosses_call_using(&self, a: &Interval, b: &Interval, liveness: &Liveness) -> bool {
        self.calls.iter().any(|&(pos, callee)| {
            a.crosses(pos) && liveness.summary(callee).referenced.contains(&b.node)
        })
    }

    /// Must `a` and `b` be given different colours?
    pub fn conflict(&self, a: &Interval, b: &Interval, liveness: &Liveness) -> bool {
        if a.node == b.node {
            return false;
        }
        a.overlaps(b)
            || self.crosses_call_using(a, b, liveness)
            || self.crosses_call_using(b, a, liveness)
    }

    /// Span over accesses: the higher, the better a spill candidate.
    pub fn inactivity(&self, node: Node) -> f64 {
        let (span, accesses) = self.by_node[node]
            .iter()
            .map(|&iv| &self.intervals[iv])
            .fold((0u64, 0u64), |(s, a), iv| {
                (s + u64::from(iv.span()), a + u64::from(iv.accesses))
            });
        span as f64 / accesses.max(1) as f64
    }
}
