//! Spill code synthesis.
//!
//! Spilling a temporary moves its value to a scratch memory slot. Every
//! instruction that references the temporary gets a fresh, unspillable
//! temporary of its own: loaded from the slot just before the instruction
//! when it reads the value, and stored back just after when it writes it. A
//! write that leaves some channels untouched, or happens under a predicate,
//! loads first so the untouched channels survive the store.
//!
//! Scratch memory accesses clobber the internal registers, so every internal
//! register live across an access is copied out to a temporary before the
//! access and back afterwards.

use super::liveness::{inst_reads, inst_writes, transfer_inst, Liveness};
use super::node::{NodeFlags, NodeInfo, NodeLayout};
use super::spill_area::{OffsetPlan, SpillArea};
use crate::ir::{
    Block, ChannelMask, Format, FuncRef, HwBank, InstData, Opcode, Operand, Program, ProgramPoint,
    Reg, RegBank, UseDefChains, ALL_CHANNELS, W_CHANNEL,
};
use crate::result::{InternalError, RegallocResult};
use crate::settings::Config;
use crate::trace;
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

/// Temporaries created while spilling.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpillReport {
    /// The temporary standing in for a spilled value at each instruction that
    /// referenced it: `(spilled temporary, instruction, replacement)`.
    pub replacements: Vec<(u32, ProgramPoint, u32)>,
    /// Temporaries holding slot offsets loaded with `ldc`.
    pub offset_temps: Vec<u32>,
    /// Scratch instructions inserted.
    pub memory_insts: usize,
}

impl SpillReport {
    /// Every temporary created.
    pub fn new_temps(&self) -> impl Iterator<Item = u32> + '_ {
        self.replacements
            .iter()
            .map(|&(_, _, t)| t)
            .chain(self.offset_temps.iter().copied())
    }
}

fn missing(point: ProgramPoint) -> InternalError {
    InternalError::MissingInstruction(format!("{}:{}", point.func, point.inst))
}

/// Spill every temporary in `temps`.
pub fn spill_temps(
    program: &mut Program,
    area: &mut SpillArea,
    temps: &[u32],
) -> RegallocResult<SpillReport> {
    let chains = UseDefChains::compute(program);
    let mut report = SpillReport::default();

    for &temp in temps {
        let reg = Reg::temp(temp);
        let mut points: SmallVec<[ProgramPoint; 8]> = SmallVec::new();
        for ud in chains.get(reg) {
            if !points.contains(&ud.point) {
                points.push(ud.point);
            }
        }
        let slot = area.allocate_spill_space(temp);
        log::debug!(
            "spilling r{} to +{} ({} references)",
            temp,
            slot,
            points.len()
        );

        for point in points {
            let (block, pos) = program.functions[point.func]
                .locate(point.inst)
                .ok_or_else(|| missing(point))?;
            let fresh = program.new_temp();
            let data = &mut program.functions[point.func].insts[point.inst];

            let mut reads = false;
            let mut write_mask: ChannelMask = 0;
            for op in data.srcs.iter_mut().filter(|op| op.reg == reg) {
                op.reg = Reg::temp(fresh);
                reads = true;
            }
            for op in data.dests.iter_mut().filter(|op| op.reg == reg) {
                op.reg = Reg::temp(fresh);
                write_mask |= op.mask;
            }
            let writes = write_mask != 0;
            let load = reads || (writes && (data.is_conditional() || write_mask != ALL_CHANNELS));
            trace!("  {}: {} -> r{}", point.inst, data, fresh);

            let mut cursor = SpillCursor {
                program: &mut *program,
                area: &mut *area,
                report: &mut report,
                func: point.func,
                block,
                pos,
            };
            if load {
                cursor.emit_access(Opcode::ScratchLoad, fresh, slot);
            }
            if writes {
                cursor.pos += 1;
                cursor.emit_access(Opcode::ScratchStore, fresh, slot);
            }
            report.replacements.push((temp, point, fresh));
        }
    }

    reencode_stale(program, area, &mut report)?;
    Ok(report)
}

/// Insertion point for the spill code of one reference.
struct SpillCursor<'a> {
    program: &'a mut Program,
    area: &'a mut SpillArea,
    report: &'a mut SpillReport,
    func: FuncRef,
    block: Block,
    pos: usize,
}

impl SpillCursor<'_> {
    /// Insert a scratch access at the cursor, preceded by an offset load if
    /// needed, and step past what was inserted.
    fn emit_access(&mut self, opcode: Opcode, value: u32, slot: u32) {
        let offset = match self.area.offset_plan(slot) {
            OffsetPlan::Operand(op) => op,
            OffsetPlan::LoadConst(offset) => {
                let t = self.program.new_temp();
                self.report.offset_temps.push(t);
                self.program.functions[self.func].insert_inst(
                    self.block,
                    self.pos,
                    InstData::load_const(Operand::temp(t), offset),
                );
                self.pos += 1;
                Operand::temp(t)
            }
        };
        let data = match opcode {
            Opcode::ScratchLoad => InstData::scratch_load(Operand::temp(value), offset),
            _ => InstData::scratch_store(Operand::temp(value), offset),
        };
        let inst = self.program.functions[self.func].insert_inst(self.block, self.pos, data);
        if offset.reg.bank == RegBank::Immediate {
            self.area.record_immediate(ProgramPoint::new(self.func, inst));
        }
        self.report.memory_insts += 1;
        self.pos += 1;
    }
}

/// Re-encode scratch instructions whose immediate offsets the area has
/// outgrown.
fn reencode_stale(
    program: &mut Program,
    area: &mut SpillArea,
    report: &mut SpillReport,
) -> RegallocResult<()> {
    let stale = area.take_stale();
    if !stale.is_empty() {
        log::debug!(
            "spill area grew to {} bytes, re-encoding {} offsets",
            area.size(),
            stale.len()
        );
    }
    for point in stale {
        let func = &program.functions[point.func];
        let (block, pos) = func.locate(point.inst).ok_or_else(|| missing(point))?;
        let Some(offset) = func.insts[point.inst].srcs.last().copied() else {
            continue;
        };
        if offset.reg.bank != RegBank::Immediate {
            continue;
        }
        let replacement = match area.offset_plan(offset.reg.num) {
            OffsetPlan::Operand(op) => op,
            OffsetPlan::LoadConst(value) => {
                let t = program.new_temp();
                report.offset_temps.push(t);
                program.functions[point.func].insert_inst(
                    block,
                    pos,
                    InstData::load_const(Operand::temp(t), value),
                );
                Operand::temp(t)
            }
        };
        if let Some(src) = program.functions[point.func].insts[point.inst]
            .srcs
            .last_mut()
        {
            *src = replacement;
        }
    }
    Ok(())
}

/// An instruction that belongs to a scratch access sequence: the access
/// itself or a constant load into a temporary, such as an offset.
fn is_spill_sequence(data: &InstData) -> bool {
    data.info().memory
        || (data.opcode == Opcode::LoadConst
            && data.dests.iter().all(|d| d.reg.bank == RegBank::Temp))
}

/// Save and restore the internal registers live across scratch accesses.
///
/// Consecutive scratch accesses share one save and one restore. Only live
/// channels are copied. Running the pass twice inserts nothing the second
/// time, because a restored register is dead across the access it wraps.
/// Returns the temporaries created.
pub fn insert_internal_saves(program: &mut Program, config: &Config) -> RegallocResult<Vec<u32>> {
    let layout = NodeLayout::new(program, config);
    let liveness = Liveness::compute(program, &layout);
    let info = NodeInfo::collect(program, &layout, config, &SecondaryMap::new());

    // (func, block, first index, last index, internals to save)
    let mut runs: Vec<(FuncRef, Block, usize, usize, SmallVec<[(u32, ChannelMask, bool); 3]>)> =
        Vec::new();
    for (func_ref, func) in program.functions.iter() {
        for (block, data) in func.blocks.iter() {
            let mut live = liveness.live_out(func_ref, block).clone();
            let mut run_end: Option<(usize, SmallVec<[(u32, ChannelMask, bool); 3]>)> = None;
            let mut has_memory = false;
            for (k, &inst) in data.insts.iter().enumerate().rev() {
                let inst_data = &func.insts[inst];
                if is_spill_sequence(inst_data) {
                    if run_end.is_none() {
                        let saves = live
                            .iter()
                            .filter(|(&n, _)| layout.bank(n) == HwBank::Internal)
                            .map(|(&n, &m)| {
                                let c10 = info.flags[n].contains(NodeFlags::C10);
                                (layout.node_to_register(n).1, m, c10)
                            })
                            .collect();
                        run_end = Some((k, saves));
                        has_memory = false;
                    }
                    has_memory |= inst_data.info().memory;
                } else if let Some((end, saves)) = run_end.take() {
                    if has_memory && !saves.is_empty() {
                        runs.push((func_ref, block, k + 1, end, saves));
                    }
                }
                let reads = inst_reads(&layout, liveness.summaries(), inst_data);
                let writes = inst_writes(&layout, liveness.summaries(), inst_data);
                transfer_inst(&mut live, &reads, &writes);
            }
            if let Some((end, saves)) = run_end.take() {
                if has_memory && !saves.is_empty() {
                    runs.push((func_ref, block, 0, end, saves));
                }
            }
        }
    }

    // Runs were found back to front within each block, so inserting in that
    // order keeps the remaining indices valid.
    let mut temps = Vec::new();
    for (func_ref, block, first, last, saves) in runs {
        let mut restores = Vec::new();
        let mut copies = Vec::new();
        for (num, mask, c10) in saves {
            let t = program.new_temp();
            temps.push(t);
            let (save, restore) = if c10 {
                let mask = mask | W_CHANNEL;
                let internal = Operand::internal(num).with_mask(mask).with_format(Format::C10);
                let temp = Operand::temp(t).with_mask(mask);
                (InstData::pack(temp, internal), InstData::pack(internal, temp))
            } else {
                let internal = Operand::internal(num).with_mask(mask);
                let temp = Operand::temp(t).with_mask(mask);
                (InstData::mov(temp, internal), InstData::mov(internal, temp))
            };
            copies.push(save);
            restores.push(restore);
        }
        trace!(
            "saving {} internal registers around {}[{}..={}]",
            copies.len(),
            block,
            first,
            last
        );
        let func = &mut program.functions[func_ref];
        for (k, restore) in restores.into_iter().enumerate() {
            func.insert_inst(block, last + 1 + k, restore);
        }
        for (k, save) in copies.into_iter().enumerate() {
            func.insert_inst(block, first + k, save);
        }
    }
    if !temps.is_empty() {
        log::debug!("inserted {} internal register saves", temps.len());
    }
    Ok(temps)
}

/// Move fixed binding `entry` onto fresh temporaries joined to the old ones
/// by copies: at the end of `main` for outputs, at its start for inputs.
///
/// Returns `false` if the binding has already been relocated once.
pub fn relocate_fixed(program: &mut Program, entry: usize) -> bool {
    let Some(binding) = program.fixed.get(entry).cloned() else {
        return false;
    };
    if binding.is_relocated() {
        return false;
    }
    let base = program.new_temps(binding.count);
    let main = program.main;
    let func = &mut program.functions[main];
    if binding.is_output {
        let exits: Vec<Block> = func.exit_blocks().collect();
        for block in exits {
            for k in 0..binding.count {
                func.append_inst(
                    block,
                    InstData::mov(Operand::temp(base + k), Operand::temp(binding.vreg + k)),
                );
            }
        }
    } else {
        let entry_block = func.entry;
        for k in 0..binding.count {
            func.insert_inst(
                entry_block,
                k as usize,
                InstData::mov(Operand::temp(binding.vreg + k), Operand::temp(base + k)),
            );
        }
    }
    if let Some(b) = program.fixed.get_mut(entry) {
        b.relocated_from = Some(b.vreg);
        b.vreg = base;
    }
    log::debug!(
        "relocated fixed binding {} from r{} to r{}",
        entry,
        binding.vreg,
        base
    );
    true
}
