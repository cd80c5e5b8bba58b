//! Linear scan.
//!
//! A faster alternative to graph colouring. Intervals are visited in program
//! order and each node takes the first colour none of its conflicting
//! intervals holds. A move destination prefers the colour of the source it is
//! tied to, which lets rename delete the move.
//!
//! When no colour is free the engine either evicts occupants that are less
//! active than the new node or gives up on the new node itself. Evicted nodes
//! are spilled and every instruction that referenced them gets a stub: a tiny
//! interval covering the reload before it or the store after it. Stubs are
//! coloured after the main scan and are never evicted, so an attempt only
//! restarts when spill code needs temporaries nobody has coloured yet.

use super::coloring::{group_head_ranges, precolour, wants_colour};
use super::colour::{Assignment, Colour, ColourBudget};
use super::context::{Analysis, RegisterAllocationStrategy, Restart, Session, Solution};
use super::intervals::{Interval, IntervalFlags, IntervalRef, Intervals};
use super::node::{Node, NodeLayout};
use crate::ir::{HwBank, ProgramPoint};
use crate::result::{RegallocError, RegallocResult};
use crate::trace;
use core::cmp::Reverse;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Linear scan engine.
pub struct LinearScan {
    units: Vec<SmallVec<[Node; 4]>>,
}

impl LinearScan {
    /// A new engine.
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    /// Collect the nodes to colour, grouped, earliest interval first.
    fn order_units(&mut self, analysis: &Analysis, intervals: &Intervals) {
        self.units.clear();
        let mut seen: FxHashSet<Node> = FxHashSet::default();
        let mut keyed = Vec::new();
        for node in analysis.layout.nodes() {
            if !wants_colour(analysis, node, !intervals.of(node).is_empty()) {
                continue;
            }
            let head = analysis.groups.head(node);
            if !seen.insert(head) {
                continue;
            }
            let members = analysis.groups.members(node);
            let start = members
                .iter()
                .flat_map(|&m| intervals.of(m).iter())
                .map(|&iv| intervals.intervals[iv].start)
                .max()
                .unwrap_or(0);
            keyed.push((Reverse(start), head, members));
        }
        keyed.sort_by_key(|(start, head, _)| (*start, *head));
        self.units = keyed.into_iter().map(|(_, _, m)| m).collect();
    }
}

impl Default for LinearScan {
    fn default() -> Self {
        Self::new()
    }
}

/// Colour state of one attempt.
struct Scan<'a> {
    analysis: &'a Analysis,
    intervals: Intervals,
    budget: ColourBudget,
    assignment: Assignment,
    occupied: FxHashMap<Colour, Vec<IntervalRef>>,
    stubs: FxHashSet<IntervalRef>,
    /// Source interval of each tied move destination.
    tie_source: FxHashMap<IntervalRef, IntervalRef>,
    /// Nodes evicted or given up, to be split into stubs.
    evicted: Vec<Node>,
    /// Grouped nodes that could not be coloured; the attempt must restart.
    group_spills: Vec<Node>,
}

impl<'a> Scan<'a> {
    fn layout(&self) -> &NodeLayout {
        &self.analysis.layout
    }

    fn occupy(&mut self, node: Node, colour: Colour) {
        let refs: SmallVec<[IntervalRef; 4]> = self.intervals.of(node).iter().copied().collect();
        for iv in refs {
            self.intervals.intervals[iv].colour = colour;
            self.occupied.entry(colour).or_default().push(iv);
        }
        self.assignment.set(node, colour);
        trace!("colour {} = {}", node, colour);
    }

    fn evict(&mut self, node: Node) {
        let colour = self.assignment.get(node);
        let refs: SmallVec<[IntervalRef; 4]> = self.intervals.of(node).iter().copied().collect();
        if let Some(list) = self.occupied.get_mut(&colour) {
            list.retain(|iv| !refs.contains(iv));
        }
        for iv in refs {
            let interval = &mut self.intervals.intervals[iv];
            interval.colour = Colour::UNDEFINED;
            interval.spilled = true;
        }
        self.assignment.clear(node);
        if !self.evicted.contains(&node) {
            trace!("evict {}", node);
            self.evicted.push(node);
        }
    }

    /// Occupants of `colour` that conflict with `interval`.
    fn blockers(&self, interval: &Interval, colour: Colour) -> SmallVec<[IntervalRef; 4]> {
        let liveness = &self.analysis.liveness;
        self.occupied
            .get(&colour)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&occ| {
                self.intervals
                    .conflict(interval, &self.intervals.intervals[occ], liveness)
            })
            .collect()
    }

    fn node_blockers(&self, node: Node, colour: Colour) -> SmallVec<[IntervalRef; 4]> {
        let mut out = SmallVec::new();
        for &iv in self.intervals.of(node) {
            for b in self.blockers(&self.intervals.intervals[iv], colour) {
                if !out.contains(&b) {
                    out.push(b);
                }
            }
        }
        out
    }

    /// Head colours the unit may take, preferred first.
    fn candidates(&self, members: &[Node]) -> SmallVec<[Colour; 16]> {
        let align = self.analysis.groups.head_alignment(members[0]);
        // A precoloured member pins the whole unit.
        for (off, &m) in members.iter().enumerate() {
            let c = self.assignment.get(m);
            if c.is_defined() && c.index >= off as u32 {
                let base = Colour {
                    kind: c.kind,
                    index: c.index - off as u32,
                };
                return if align.accepts(base.index) {
                    SmallVec::from_elem(base, 1)
                } else {
                    SmallVec::new()
                };
            }
        }
        let ranges = group_head_ranges(self.analysis, &self.budget, members);
        let mut out: SmallVec<[Colour; 16]> = ranges
            .into_iter()
            .flat_map(|(bank, range)| range.map(move |i| Colour::new(bank, i)))
            .filter(|c| align.accepts(c.index))
            .collect();
        if let [node] = members {
            let preferred: SmallVec<[Colour; 2]> = self
                .intervals
                .of(*node)
                .iter()
                .filter_map(|iv| self.tie_source.get(iv))
                .map(|&src| self.intervals.intervals[src].colour)
                .filter(|c| out.contains(c))
                .collect();
            for c in preferred.into_iter().rev() {
                out.retain(|x| *x != c);
                out.insert(0, c);
            }
        }
        out
    }

    fn fits(&self, members: &[Node], base: Colour) -> bool {
        members.iter().enumerate().all(|(off, &m)| {
            let c = base.offset(off as u32);
            let own = self.assignment.get(m);
            if own.is_defined() {
                own == c
            } else {
                self.node_blockers(m, c).is_empty()
            }
        })
    }

    fn colour_unit(&mut self, members: &[Node]) -> RegallocResult<()> {
        let candidates = self.candidates(members);
        if let Some(&base) = candidates.iter().find(|&&c| self.fits(members, c)) {
            for (off, &m) in members.iter().enumerate() {
                if !self.assignment.is_coloured(m) {
                    self.occupy(m, base.offset(off as u32));
                }
            }
            return Ok(());
        }

        let analysis = self.analysis;
        let info = &analysis.info;
        let layout = &analysis.layout;
        if let [node] = *members {
            if let Some((colour, victims)) = self.find_spill_range(node, &candidates) {
                for v in victims {
                    self.evict(v);
                }
                self.occupy(node, colour);
                return Ok(());
            }
            if info.is_spillable(layout, node) {
                self.evict(node);
                return Ok(());
            }
            return Err(if layout.is_temp(node) {
                RegallocError::OutOfRegisters { node }
            } else {
                RegallocError::NonTemporaryUncolourable { node }
            });
        }

        if let Some(&bad) = members.iter().find(|&&m| !info.is_spillable(layout, m)) {
            return Err(if layout.is_temp(bad) {
                RegallocError::OutOfRegisters { node: bad }
            } else {
                RegallocError::NonTemporaryUncolourable { node: bad }
            });
        }
        trace!("group {:?} does not fit, spilling it", members);
        self.group_spills.extend_from_slice(members);
        Ok(())
    }

    /// A colour `node` can take by evicting less active occupants.
    fn find_spill_range(
        &self,
        node: Node,
        candidates: &[Colour],
    ) -> Option<(Colour, SmallVec<[Node; 4]>)> {
        let info = &self.analysis.info;
        let layout = self.layout();
        let spillable = info.is_spillable(layout, node);
        let inactivity = self.intervals.inactivity(node);
        let mut best: Option<(Colour, SmallVec<[Node; 4]>)> = None;
        'colours: for &colour in candidates {
            let mut victims: SmallVec<[Node; 4]> = SmallVec::new();
            for b in self.node_blockers(node, colour) {
                let v = self.intervals.intervals[b].node;
                if self.stubs.contains(&b)
                    || !info.is_spillable(layout, v)
                    || self.analysis.groups.is_grouped(v)
                    || (spillable && self.intervals.inactivity(v) <= inactivity)
                {
                    continue 'colours;
                }
                if !victims.contains(&v) {
                    victims.push(v);
                }
            }
            if best.as_ref().map_or(true, |(_, bv)| victims.len() < bv.len()) {
                best = Some((colour, victims));
            }
        }
        best
    }

    /// Colour a reload or store stub.
    fn colour_stub(&mut self, stub: Interval) -> Option<Colour> {
        let range = self
            .budget
            .range(HwBank::Temp, self.analysis.info.flags[stub.node]);
        let colour = range
            .map(|i| Colour::new(HwBank::Temp, i))
            .find(|&c| self.blockers(&stub, c).is_empty())?;
        let iv = self.intervals.intervals.push(Interval { colour, ..stub });
        self.stubs.insert(iv);
        self.occupied.entry(colour).or_default().push(iv);
        Some(colour)
    }
}

impl RegisterAllocationStrategy for LinearScan {
    fn name(&self) -> &'static str {
        "linear scan"
    }

    fn attempt(&mut self, session: &mut Session) -> RegallocResult<Result<Solution, Restart>> {
        let analysis = session.analyse()?;
        let intervals = Intervals::build(session.program, &analysis.layout, &analysis.liveness);
        let node_conflict = |a: Node, b: Node| {
            intervals.of(a).iter().any(|&ia| {
                intervals.of(b).iter().any(|&ib| {
                    intervals.conflict(
                        &intervals.intervals[ia],
                        &intervals.intervals[ib],
                        &analysis.liveness,
                    )
                })
            })
        };
        let assignment = match precolour(session, &analysis, node_conflict)? {
            Ok(assignment) => assignment,
            Err(restart) => return Ok(Err(restart)),
        };
        self.order_units(&analysis, &intervals);

        let tie_source = intervals
            .intervals
            .iter()
            .filter_map(|(src, iv)| iv.tied.expand().map(|dst| (dst, src)))
            .collect();
        let mut scan = Scan {
            analysis: &analysis,
            intervals,
            budget: ColourBudget::new(session.program, session.config),
            assignment: Assignment::new(),
            occupied: FxHashMap::default(),
            stubs: FxHashSet::default(),
            tie_source,
            evicted: Vec::new(),
            group_spills: Vec::new(),
        };
        for (node, colour) in assignment.iter() {
            scan.occupy(node, colour);
            for &alt in assignment.alternates(node) {
                scan.assignment.add_alternate(node, alt);
                for &iv in scan.intervals.of(node) {
                    scan.occupied.entry(alt).or_default().push(iv);
                }
            }
        }

        for unit in &self.units {
            scan.colour_unit(unit)?;
        }

        if scan.evicted.is_empty() && scan.group_spills.is_empty() {
            return Ok(Ok(Solution {
                groups: analysis.groups.clone(),
                assignment: scan.assignment,
            }));
        }

        let mut stub_colours: FxHashMap<(Node, ProgramPoint), Colour> = FxHashMap::default();
        let mut stubs_fit = true;
        let evicted = scan.evicted.clone();
        'stubs: for &node in &evicted {
            let accesses = scan.intervals.accesses.get(&node).cloned().unwrap_or_default();
            for access in accesses {
                let (start, end) = access.stub_range();
                let mut flags = IntervalFlags::empty();
                if access.reads {
                    flags |= IntervalFlags::READ;
                }
                if access.writes {
                    flags |= IntervalFlags::WRITTEN;
                }
                let stub = Interval {
                    node,
                    start,
                    end,
                    colour: Colour::UNDEFINED,
                    spilled: false,
                    accesses: 1,
                    flags,
                    tied: None.into(),
                };
                match scan.colour_stub(stub) {
                    Some(colour) => {
                        stub_colours.insert((node, access.point), colour);
                    }
                    None => {
                        trace!("no room for a stub of {} at {}", node, access.point.inst);
                        stubs_fit = false;
                        break 'stubs;
                    }
                }
            }
        }

        let layout = &analysis.layout;
        let temps: Vec<u32> = evicted
            .iter()
            .chain(scan.group_spills.iter())
            .map(|&n| layout.node_to_register(n).1)
            .collect();
        log::debug!(
            "linear scan: spilling {:?} ({} stubs)",
            temps,
            stub_colours.len()
        );
        let (report, saves) = session.spill(&temps)?;
        if !scan.group_spills.is_empty() || !stubs_fit {
            return Ok(Err(Restart::Spilled(temps.len())));
        }
        if !report.offset_temps.is_empty() || !saves.is_empty() {
            return Ok(Err(Restart::NewTemps(report.offset_temps.len() + saves.len())));
        }

        // Temporaries are numbered last, so old node numbers survive the
        // spill and replacements extend the layout.
        let grown = NodeLayout::new(session.program, session.config);
        let mut assignment = scan.assignment;
        for &node in &evicted {
            assignment.clear(node);
        }
        for &(temp, point, fresh) in &report.replacements {
            let Some(fresh_node) = grown.temp_node(fresh) else {
                continue;
            };
            let colour = layout
                .temp_node(temp)
                .and_then(|node| stub_colours.get(&(node, point)).copied())
                .ok_or(RegallocError::uncoloured(fresh_node))?;
            assignment.set(fresh_node, colour);
        }
        Ok(Ok(Solution {
            groups: analysis.groups.clone(),
            assignment,
        }))
    }
}
