//! Rewrite the program with hardware registers.
//!
//! Runs once, after a complete colouring. Every operand naming a node is
//! replaced by the node's colour, moves that became copies of a register onto
//! itself are deleted, block live-out sets are rewritten in hardware terms and
//! the program's usage counters are filled in.

use super::colour::{Assignment, ColourKind};
use super::liveness::Liveness;
use super::node::NodeLayout;
use super::spill_area::SpillArea;
use crate::ir::{Program, ProgramCounters, ProgramKind, Reg, RegBank};
use crate::result::{RegallocError, RegallocResult};
use crate::settings::Config;
use crate::trace;

fn note_use(counters: &mut ProgramCounters, reg: Reg) {
    match reg.bank {
        RegBank::Temp => counters.temps_used = counters.temps_used.max(reg.num + 1),
        RegBank::PrimAttr => counters.prim_attrs_used = counters.prim_attrs_used.max(reg.num + 1),
        RegBank::Internal => counters.internal_mask |= 1 << reg.num,
        _ => {}
    }
}

/// Apply `assignment` to `program`.
pub fn rename(
    program: &mut Program,
    config: &Config,
    area: &SpillArea,
    assignment: &Assignment,
) -> RegallocResult<()> {
    let layout = NodeLayout::new(program, config);
    let liveness = Liveness::compute(program, &layout);
    let mut counters = ProgramCounters::default();

    let colour_reg = |reg: Reg| -> RegallocResult<Reg> {
        let Some(node) = layout.reg_node(reg) else {
            return Ok(reg);
        };
        let colour = assignment.get(node);
        match colour.kind {
            ColourKind::Undefined | ColourKind::Dummy => Err(RegallocError::uncoloured(node)),
            _ => colour.reg().ok_or(RegallocError::uncoloured(node)),
        }
    };

    let mut removed = 0;
    for (func_ref, func) in program.functions.iter_mut() {
        for (block, data) in func.blocks.iter_mut() {
            for &inst in &data.insts {
                let inst_data = &mut func.insts[inst];
                for op in inst_data.dests.iter_mut().chain(inst_data.srcs.iter_mut()) {
                    op.reg = colour_reg(op.reg)?;
                    for reg in op.regs() {
                        note_use(&mut counters, reg);
                    }
                }
            }
            let insts = &func.insts;
            let before = data.insts.len();
            data.insts.retain(|&inst| !insts[inst].is_noop_move());
            removed += before - data.insts.len();

            let mut live_out = Vec::new();
            for (&node, &mask) in liveness.live_out(func_ref, block) {
                if let Some(reg) = assignment.get(node).reg() {
                    live_out.push((reg, mask));
                }
            }
            live_out.sort();
            data.live_out = live_out;
        }
    }

    counters.scratch_size = area.size();
    counters.secondary_finalized = program.kind == ProgramKind::Secondary;
    program.counters = counters;
    program.sec_attr_constants = area.sec_attr_constants();
    trace!(
        "rename: {} no-op moves removed, counters {:?}",
        removed,
        program.counters
    );
    Ok(())
}
