//! Check a colouring before it is applied.
//!
//! Everything is recomputed from the program as it stands, so the checks do
//! not trust any state the colouring engines kept.

use super::colour::{Assignment, Colour, ColourBudget, ColourKind};
use super::groups::RegisterGroups;
use super::interference::{mark_regions, InterferenceGraph};
use super::liveness::Liveness;
use super::node::{Node, NodeFlags, NodeInfo, NodeLayout};
use crate::ir::{HwBank, Program};
use crate::result::{RegallocError, RegallocResult};
use crate::settings::Config;
use cranelift_entity::SecondaryMap;

fn fail(msg: String) -> RegallocError {
    log::error!("verifier: {}", msg);
    RegallocError::Verifier(msg)
}

/// Verify that `assignment` is a legal colouring of `program`.
pub fn verify(
    program: &Program,
    config: &Config,
    persistent: &SecondaryMap<Node, NodeFlags>,
    groups: &RegisterGroups,
    assignment: &Assignment,
) -> RegallocResult<()> {
    let layout = NodeLayout::new(program, config);
    let mut info = NodeInfo::collect(program, &layout, config, persistent);
    let liveness = Liveness::compute(program, &layout);
    mark_regions(program, &layout, &liveness, &mut info);
    let graph = InterferenceGraph::build(program, &layout, &liveness, &info);
    let budget = ColourBudget::new(program, config);

    for node in layout.nodes() {
        let colour = assignment.get(node);
        if info.refs[node] == 0 && graph.degree(node) == 0 {
            continue;
        }
        let Some(bank) = colour.bank() else {
            return Err(fail(format!("{} has no colour", node)));
        };

        let flags = info.flags[node];
        if !flags.contains(NodeFlags::PRECOLOURED) {
            if !info.banks[node].contains(bank.flag()) {
                return Err(fail(format!("{} coloured {} outside its banks", node, colour)));
            }
            if !budget.range(bank, flags).contains(&colour.index) {
                return Err(fail(format!("{} coloured {} outside the budget", node, colour)));
            }
            if bank == HwBank::Internal && colour.index >= info.internal_limit[node] {
                return Err(fail(format!(
                    "{} coloured {} above its internal limit {}",
                    node, colour, info.internal_limit[node]
                )));
            }
        }

        for &other in graph.neighbours(node) {
            if other < node {
                continue;
            }
            if let Some(c) = assignment
                .colours_of(node)
                .find(|&c| assignment.owns(other, c))
            {
                return Err(fail(format!(
                    "interfering {} and {} share {}",
                    node, other, c
                )));
            }
        }

        if let Some(next) = groups.link(node).next.expand() {
            let want = colour.offset(1);
            if assignment.get(next) != want {
                return Err(fail(format!(
                    "group {} -> {}: {} is not followed by {}",
                    node,
                    next,
                    colour,
                    assignment.get(next)
                )));
            }
        }
        if !groups.get_node_alignment(node).accepts(colour.index) {
            return Err(fail(format!("{} coloured {} breaks alignment", node, colour)));
        }
    }

    for (e, entry) in program.fixed.iter().enumerate() {
        let Some(index) = entry.index else {
            for k in 0..entry.count {
                if let Some(node) = layout.temp_node(entry.vreg + k) {
                    let colour = assignment.get(node);
                    if colour.is_defined() && colour.bank() != Some(entry.bank) {
                        return Err(fail(format!(
                            "fixed binding {}: {} must be in {}, got {}",
                            e, node, entry.bank, colour
                        )));
                    }
                }
            }
            continue;
        };
        for k in 0..entry.count {
            let Some(node) = layout.temp_node(entry.vreg + k) else {
                continue;
            };
            let want = Colour::new(entry.bank, index + k);
            let got = assignment.get(node);
            if got != want && got.kind != ColourKind::Undefined {
                return Err(fail(format!(
                    "fixed binding {}: {} must be {}, got {}",
                    e, node, want, got
                )));
            }
        }
    }
    log::debug!("verified colouring of {} nodes", layout.num_nodes());
    Ok(())
}
