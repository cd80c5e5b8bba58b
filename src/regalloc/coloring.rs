//! Graph colouring.
//!
//! The classic simplify/select scheme with optimistic spilling:
//!
//! 1. Precolour primary attributes, outputs and fixed bindings. A binding
//!    that cannot be honoured is relocated behind a copy and the attempt
//!    restarts.
//! 2. Simplify: repeatedly remove a node with fewer neighbours than it has
//!    colours, pushing it on a stack. When every remaining node is
//!    constrained, push the one least worth keeping in a register and carry
//!    on optimistically.
//! 3. Select: pop nodes and colour them. A grouped node colours its whole
//!    group at once, so members always land on consecutive registers.
//! 4. If any node is left without a colour, spill the cheapest candidate
//!    around each one and restart.
//!
//! Spill temporaries are marked so they are never spilled again. Every
//! restart therefore removes at least one spillable node, which bounds the
//! number of iterations.

use super::colour::{Assignment, Colour, ColourBudget};
use super::context::{Analysis, RegisterAllocationStrategy, Restart, Session, Solution};
use super::interference::InterferenceGraph;
use super::node::{Node, NodeFlags};
use super::spilling::relocate_fixed;
use crate::ir::{BankFlags, HwBank};
use crate::result::{RegallocError, RegallocResult};
use crate::trace;
use core::cmp::Reverse;
use core::ops::Range;
use cranelift_entity::SecondaryMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Colour primary attributes, outputs and fixed bindings.
///
/// `interferes` decides whether two precoloured nodes may not share a
/// register. When a fixed binding cannot be honoured it is relocated and the
/// caller must restart.
pub(crate) fn precolour(
    session: &mut Session,
    analysis: &Analysis,
    interferes: impl Fn(Node, Node) -> bool,
) -> RegallocResult<Result<Assignment, Restart>> {
    let layout = &analysis.layout;
    let info = &analysis.info;
    let mut assignment = Assignment::new();
    let mut owners: FxHashMap<Colour, SmallVec<[Node; 2]>> = FxHashMap::default();

    for bank in [HwBank::PrimAttr, HwBank::Output] {
        let mut index = 0;
        while let Some(node) = layout.register_to_node(bank, index) {
            let colour = Colour::new(bank, index);
            assignment.set(node, colour);
            owners.entry(colour).or_default().push(node);
            index += 1;
        }
    }

    // Binding that owns each fixed node.
    let mut binding_of: FxHashMap<Node, usize> = FxHashMap::default();
    let mut unusable: Option<(usize, Node)> = None;
    for (e, entry) in session.program.fixed.iter().enumerate() {
        let Some(index) = entry.index else {
            continue;
        };
        for k in 0..entry.count {
            let Some(node) = layout.temp_node(entry.vreg + k) else {
                continue;
            };
            let bank_ok = info.legal[node].contains(entry.bank.flag());
            let feedback =
                entry.is_output && info.flags[node].contains(NodeFlags::CROSSES_FEEDBACK);
            if (!bank_ok || feedback) && unusable.is_none() {
                trace!(
                    "fixed binding {} unusable for {} (bank ok: {}, crosses feedback: {})",
                    e,
                    node,
                    bank_ok,
                    feedback
                );
                unusable = Some((e, node));
            }
            let colour = Colour::new(entry.bank, index + k);
            assignment.set(node, colour);
            owners.entry(colour).or_default().push(node);
            for &alt in &entry.alternates {
                let alt = Colour::new(entry.bank, alt + k);
                assignment.add_alternate(node, alt);
                owners.entry(alt).or_default().push(node);
            }
            binding_of.insert(node, e);
        }
    }

    if unusable.is_none() {
        let mut colours: Vec<&Colour> = owners.keys().collect();
        colours.sort();
        'search: for colour in colours {
            let nodes = &owners[colour];
            for (i, &a) in nodes.iter().enumerate() {
                for &b in &nodes[i + 1..] {
                    if a == b || !interferes(a, b) {
                        continue;
                    }
                    let choice = match (binding_of.get(&a), binding_of.get(&b)) {
                        (Some(&ea), Some(&eb)) => {
                            let fixed = &session.program.fixed;
                            let is_output = |e: usize| fixed.get(e).map_or(false, |f| f.is_output);
                            let (out_a, out_b) = (is_output(ea), is_output(eb));
                            match (out_a, out_b) {
                                (true, false) => (ea, a),
                                (false, true) => (eb, b),
                                _ if ea > eb => (ea, a),
                                _ => (eb, b),
                            }
                        }
                        (Some(&ea), None) => (ea, a),
                        (None, Some(&eb)) => (eb, b),
                        (None, None) => continue,
                    };
                    trace!("fixed colour {} shared by interfering {} and {}", colour, a, b);
                    unusable = Some(choice);
                    break 'search;
                }
            }
        }
    }

    if let Some((e, node)) = unusable {
        if !relocate_fixed(session.program, e) {
            return Err(RegallocError::fixed_colour_conflict(node));
        }
        session.relocated += 1;
        return Ok(Err(Restart::FixedRelocated(e)));
    }
    Ok(Ok(assignment))
}

/// Does `node` need a colour from the engine?
pub(crate) fn wants_colour(analysis: &Analysis, node: Node, live: bool) -> bool {
    !analysis.info.flags[node].contains(NodeFlags::PRECOLOURED)
        && (analysis.info.refs[node] > 0 || live)
}

/// Colour ranges a whole group could start at, bank by bank.
///
/// For each bank every member accepts, the range of head indices that keeps
/// every member inside its own budget.
pub(crate) fn group_head_ranges(
    analysis: &Analysis,
    budget: &ColourBudget,
    members: &[Node],
) -> SmallVec<[(HwBank, Range<u32>); 4]> {
    let info = &analysis.info;
    let mut out = SmallVec::new();
    let banks = members
        .iter()
        .fold(BankFlags::all(), |acc, &m| acc & info.banks[m]);
    for bank in ColourBudget::PREFERENCE {
        if !banks.contains(bank.flag()) {
            continue;
        }
        let mut lo = 0u32;
        let mut hi = u32::MAX;
        for (off, &m) in members.iter().enumerate() {
            let off = off as u32;
            let mut range = budget.range(bank, info.flags[m]);
            if bank == HwBank::Internal {
                range.end = range.end.min(info.internal_limit[m]);
            }
            if range.end < off + 1 {
                hi = 0;
                break;
            }
            lo = lo.max(range.start.saturating_sub(off));
            hi = hi.min(range.end - off);
        }
        if lo < hi {
            out.push((bank, lo..hi));
        }
    }
    out
}

/// Colours available to `node` alone.
fn colour_count(analysis: &Analysis, budget: &ColourBudget, node: Node) -> usize {
    group_head_ranges(analysis, budget, &[node])
        .iter()
        .map(|(_, r)| r.len())
        .sum()
}

/// Graph colouring engine.
pub struct GraphColouring {
    stack: Vec<Node>,
}

impl GraphColouring {
    /// A new engine.
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Order the nodes to colour: the result is popped from the back.
    fn simplify(
        &mut self,
        analysis: &Analysis,
        graph: &InterferenceGraph,
        budget: &ColourBudget,
        candidates: &[Node],
    ) {
        self.stack.clear();
        let flags = &analysis.info.flags;
        let mut remaining: FxHashSet<Node> = candidates.iter().copied().collect();
        let mut degree: SecondaryMap<Node, usize> = SecondaryMap::new();
        let mut k: SecondaryMap<Node, usize> = SecondaryMap::new();
        for &n in candidates {
            degree[n] = graph.degree(n);
            k[n] = colour_count(analysis, budget, n);
        }

        let mut order: Vec<Node> = candidates.to_vec();
        order.sort();
        while !remaining.is_empty() {
            let trivial = order
                .iter()
                .copied()
                .find(|n| remaining.contains(n) && degree[*n] < k[*n]);
            let node = match trivial {
                Some(n) => n,
                None => {
                    // Push the node least worth keeping: it is coloured last.
                    let Some(n) = order
                        .iter()
                        .copied()
                        .filter(|n| remaining.contains(n))
                        .min_by_key(|&n| {
                            let f = flags[n];
                            (
                                f.contains(NodeFlags::CROSSES_FEEDBACK),
                                f.contains(NodeFlags::CROSSES_SPLIT),
                                !f.contains(NodeFlags::USP_TEMP),
                                degree[n],
                                Reverse(n),
                            )
                        })
                    else {
                        break;
                    };
                    trace!("potential spill {} (degree {}, {} colours)", n, degree[n], k[n]);
                    n
                }
            };
            remaining.remove(&node);
            self.stack.push(node);
            for &nb in graph.neighbours(node) {
                if remaining.contains(&nb) {
                    degree[nb] -= 1;
                }
            }
        }
    }

    /// Colour `node`'s group. Returns `false` if no colour fits.
    fn select(
        analysis: &Analysis,
        graph: &InterferenceGraph,
        budget: &ColourBudget,
        assignment: &mut Assignment,
        node: Node,
    ) -> bool {
        let groups = &analysis.groups;
        let members = groups.members(node);
        let align = groups.head_alignment(node);

        // A member that already has a colour pins the whole group.
        let pinned = members.iter().enumerate().find_map(|(off, &m)| {
            let c = assignment.get(m);
            if c.is_defined() && c.index >= off as u32 {
                Some(Colour {
                    kind: c.kind,
                    index: c.index - off as u32,
                })
            } else {
                None
            }
        });

        let fits = |assignment: &Assignment, base: Colour| {
            members.iter().enumerate().all(|(off, &m)| {
                let c = base.offset(off as u32);
                let own = assignment.get(m);
                if own.is_defined() {
                    return own == c;
                }
                graph
                    .neighbours(m)
                    .iter()
                    .all(|&nb| !assignment.owns(nb, c))
            })
        };

        let choice = match pinned {
            Some(base) => Some(base).filter(|&b| align.accepts(b.index) && fits(assignment, b)),
            None => group_head_ranges(analysis, budget, &members)
                .into_iter()
                .flat_map(|(bank, range)| range.map(move |i| Colour::new(bank, i)))
                .filter(|c| align.accepts(c.index))
                .find(|&c| fits(assignment, c)),
        };

        match choice {
            Some(base) => {
                for (off, &m) in members.iter().enumerate() {
                    if !assignment.is_coloured(m) {
                        assignment.set(m, base.offset(off as u32));
                        trace!("colour {} = {}", m, base.offset(off as u32));
                    }
                }
                true
            }
            None => false,
        }
    }

    /// The cheapest node to spill to make room for `node`: `node` itself or
    /// a neighbour holding a colour `node` could use.
    fn find_best_spill_node(
        analysis: &Analysis,
        graph: &InterferenceGraph,
        assignment: &Assignment,
        node: Node,
    ) -> Option<Node> {
        let info = &analysis.info;
        let banks = info.banks[node];
        let mut candidates: SmallVec<[Node; 16]> = SmallVec::new();
        for m in analysis.groups.members(node) {
            candidates.push(m);
            for &nb in graph.neighbours(m) {
                let usable = assignment
                    .get(nb)
                    .bank()
                    .map_or(false, |b| banks.contains(b.flag()));
                if usable {
                    candidates.push(nb);
                }
            }
        }
        candidates
            .into_iter()
            .filter(|&n| info.is_spillable(&analysis.layout, n))
            .min_by_key(|&n| (info.refs[n], Reverse(graph.degree(n)), n))
    }
}

impl Default for GraphColouring {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAllocationStrategy for GraphColouring {
    fn name(&self) -> &'static str {
        "graph colouring"
    }

    fn attempt(&mut self, session: &mut Session) -> RegallocResult<Result<Solution, Restart>> {
        let analysis = session.analyse()?;
        let graph = InterferenceGraph::build(
            session.program,
            &analysis.layout,
            &analysis.liveness,
            &analysis.info,
        );
        let mut assignment = match precolour(session, &analysis, |a, b| graph.interferes(a, b))? {
            Ok(assignment) => assignment,
            Err(restart) => return Ok(Err(restart)),
        };

        let budget = ColourBudget::new(session.program, session.config);
        let candidates: Vec<Node> = analysis
            .layout
            .nodes()
            .filter(|&n| wants_colour(&analysis, n, graph.degree(n) > 0))
            .collect();
        self.simplify(&analysis, &graph, &budget, &candidates);

        let mut uncoloured = Vec::new();
        while let Some(node) = self.stack.pop() {
            if assignment.is_coloured(node) {
                continue;
            }
            if !Self::select(&analysis, &graph, &budget, &mut assignment, node) {
                trace!("no colour for {}", node);
                uncoloured.push(node);
            }
        }

        if uncoloured.is_empty() {
            return Ok(Ok(Solution {
                groups: analysis.groups,
                assignment,
            }));
        }

        let mut spills: Vec<u32> = Vec::new();
        for &node in &uncoloured {
            if analysis.layout.bank(node) == HwBank::Internal {
                return Err(RegallocError::InternalRegistersExhausted { node });
            }
            let Some(victim) = Self::find_best_spill_node(&analysis, &graph, &assignment, node)
            else {
                return Err(RegallocError::OutOfRegisters { node });
            };
            let temp = analysis.layout.node_to_register(victim).1;
            if !spills.contains(&temp) {
                spills.push(temp);
            }
        }
        log::debug!(
            "graph colouring: {} uncoloured, spilling {:?}",
            uncoloured.len(),
            spills
        );
        session.spill(&spills)?;
        Ok(Err(Restart::Spilled(spills.len())))
    }
}
