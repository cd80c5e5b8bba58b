//! Register allocator context.
//!
//! The `Context` struct holds the configuration that is reused across
//! invocations of the register allocator. Everything else lives in a
//! `Session` created for one program and dropped when allocation finishes;
//! only the rewritten program survives.
//!
//! Allocation is a loop. Each iteration analyses the current program and
//! hands it to the configured colouring strategy. The strategy either
//! produces a complete assignment or rewrites the program (spill code,
//! relocated fixed bindings) and asks for another iteration.

use super::colour::{Assignment, Colour};
use super::groups::{build_groups, RegisterGroups};
use super::interference::mark_regions;
use super::liveness::Liveness;
use super::node::{Node, NodeFlags, NodeInfo, NodeLayout};
use super::spill_area::SpillArea;
use super::spilling::{insert_internal_saves, spill_temps, SpillReport};
use super::{coloring::GraphColouring, linear_scan::LinearScan, rename, verify};
use crate::ir::{Alignment, HwBank, Program, ProgramKind, RegBank};
use crate::result::{InternalError, RegallocError, RegallocResult};
use crate::settings::{Config, Strategy};
use crate::{trace, trace_log_enabled};
use core::fmt;
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;

/// Why a colouring attempt gave up and asked to be run again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Restart {
    /// This many temporaries were spilled.
    Spilled(usize),
    /// A fixed binding was moved behind a copy.
    FixedRelocated(usize),
    /// Spill code created temporaries that still need colours.
    NewTemps(usize),
}

impl fmt::Display for Restart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Restart::Spilled(n) => write!(f, "spilled {} temporaries", n),
            Restart::FixedRelocated(e) => write!(f, "relocated fixed binding {}", e),
            Restart::NewTemps(n) => write!(f, "{} new temporaries", n),
        }
    }
}

/// A complete colouring of the session's program.
#[derive(Clone, Debug)]
pub struct Solution {
    /// The groups the colouring honours.
    pub groups: RegisterGroups,
    /// A colour for every referenced node.
    pub assignment: Assignment,
}

/// A colouring engine.
pub trait RegisterAllocationStrategy {
    /// Name, for logging.
    fn name(&self) -> &'static str;

    /// Try to colour the session's program.
    fn attempt(&mut self, session: &mut Session) -> RegallocResult<Result<Solution, Restart>>;
}

/// Everything derived from the program at the start of an attempt.
pub struct Analysis {
    /// Node numbering.
    pub layout: NodeLayout,
    /// Per-node properties.
    pub info: NodeInfo,
    /// Block liveness.
    pub liveness: Liveness,
    /// Register groups.
    pub groups: RegisterGroups,
    /// Colours demanded by fixed bindings.
    pub fixed: FxHashMap<Node, Colour>,
}

/// State of one allocation.
pub struct Session<'a> {
    /// The program being allocated.
    pub program: &'a mut Program,
    /// Hardware description and limits.
    pub config: &'a Config,
    /// Scratch memory layout.
    pub area: SpillArea,
    /// Node flags that survive between attempts.
    pub persistent: SecondaryMap<Node, NodeFlags>,
    /// Attempts started so far.
    pub iteration: u32,
    /// Temporaries spilled so far.
    pub spilled: usize,
    /// Fixed bindings relocated so far.
    pub relocated: usize,
}

impl<'a> Session<'a> {
    /// Start allocating `program`.
    pub fn new(program: &'a mut Program, config: &'a Config) -> Self {
        Self {
            program,
            config,
            area: SpillArea::new(config),
            persistent: SecondaryMap::new(),
            iteration: 0,
            spilled: 0,
            relocated: 0,
        }
    }

    /// Hardware registers in `bank`.
    pub fn bank_size(&self, bank: HwBank) -> u32 {
        match bank {
            HwBank::PrimAttr => self.config.prim_attrs,
            HwBank::Output => self.config.outputs,
            HwBank::Internal => self.config.internals,
            HwBank::Temp => self.config.temps,
        }
    }

    /// Build groups, then analyse the program.
    pub fn analyse(&mut self) -> RegallocResult<Analysis> {
        check_register_file(self.program)?;
        let layout = NodeLayout::new(self.program, self.config);
        let mut fixed = FxHashMap::default();
        for entry in self.program.fixed.iter() {
            let Some(index) = entry.index else {
                continue;
            };
            for k in 0..entry.count {
                let Some(node) = layout.temp_node(entry.vreg + k) else {
                    continue;
                };
                if index + k >= self.bank_size(entry.bank) {
                    return Err(RegallocError::fixed_out_of_range(node));
                }
                fixed.insert(node, Colour::new(entry.bank, index + k));
            }
        }

        let mut groups = build_groups(self.program, self.config, &fixed)?;
        let layout = NodeLayout::new(self.program, self.config);
        for entry in self.program.fixed.iter().filter(|e| e.count > 1) {
            let nodes: Vec<Node> = (0..entry.count)
                .filter_map(|k| layout.temp_node(entry.vreg + k))
                .collect();
            if !groups.make_group(&nodes, Alignment::None) {
                let node = nodes.first().copied().unwrap_or(Node::from_u32(0));
                return Err(RegallocError::group_inconsistent(node));
            }
        }

        let mut info = NodeInfo::collect(self.program, &layout, self.config, &self.persistent);
        let liveness = Liveness::compute(self.program, &layout);
        mark_regions(self.program, &layout, &liveness, &mut info);
        log::debug!(
            "iteration {}: {} nodes, {} instructions",
            self.iteration,
            layout.num_nodes(),
            self.program.num_insts()
        );
        Ok(Analysis {
            layout,
            info,
            liveness,
            groups,
            fixed,
        })
    }

    /// Add `flags` to the persistent flags of virtual temporaries `temps`.
    pub fn mark_temps(&mut self, temps: impl IntoIterator<Item = u32>, flags: NodeFlags) {
        let layout = NodeLayout::new(self.program, self.config);
        for temp in temps {
            if let Some(node) = layout.temp_node(temp) {
                self.persistent[node] |= flags;
            }
        }
    }

    /// Spill virtual temporaries `temps` and protect internal registers
    /// around the new scratch accesses. Returns the spill report and the
    /// temporaries created for internal register saves.
    pub fn spill(&mut self, temps: &[u32]) -> RegallocResult<(SpillReport, Vec<u32>)> {
        self.mark_temps(temps.iter().copied(), NodeFlags::SPILLED);
        let report = spill_temps(self.program, &mut self.area, temps)?;
        let saves = insert_internal_saves(self.program, self.config)?;
        let created: Vec<u32> = report.new_temps().chain(saves.iter().copied()).collect();
        self.mark_temps(created, NodeFlags::NO_SPILL | NodeFlags::USED_IN_SPILL);
        self.spilled += temps.len();
        Ok((report, saves))
    }
}

/// Every register operand must lie inside the program's declared register
/// file, or it would silently escape allocation.
fn check_register_file(program: &Program) -> RegallocResult<()> {
    let regs = &program.regs;
    for func in program.functions.values() {
        for (_, inst) in func.layout() {
            let data = &func.insts[inst];
            for op in data.dests.iter().chain(data.srcs.iter()) {
                for reg in op.regs() {
                    let declared = match reg.bank {
                        RegBank::PrimAttr => regs.prim_attrs,
                        RegBank::Output => regs.outputs,
                        RegBank::Internal => regs.internals,
                        RegBank::Temp => regs.temps,
                        _ => continue,
                    };
                    if reg.num >= declared {
                        return Err(InternalError::OperandOutOfRange(format!(
                            "{} in `{}`",
                            reg, data
                        ))
                        .into());
                    }
                }
            }
        }
    }
    Ok(())
}

/// What an allocation did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationSummary {
    /// The engine that coloured the program.
    pub strategy: Strategy,
    /// Colouring attempts, including the successful one.
    pub iterations: u32,
    /// Temporaries spilled to scratch memory.
    pub spilled: usize,
    /// Fixed bindings moved behind copies.
    pub relocated: usize,
    /// Bytes of scratch memory used.
    pub scratch_size: u32,
    /// Hardware temporaries used.
    pub temps_used: u32,
}

/// Persistent configuration for register allocation.
pub struct Context {
    config: Config,
}

impl Context {
    /// Create a new context for register allocation with `config`.
    ///
    /// The same context may be used for any number of programs.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocate registers in `program`.
    ///
    /// On success every virtual register operand in `program` names a
    /// hardware register and the program's counters describe what was used.
    /// On failure the program may have been partly rewritten and must be
    /// discarded.
    pub fn run(&mut self, program: &mut Program) -> RegallocResult<AllocationSummary> {
        let strategy = match (program.kind, self.config.strategy) {
            (ProgramKind::Secondary, Strategy::LinearScan) => {
                log::debug!("secondary programs always use graph colouring");
                Strategy::GraphColouring
            }
            (_, strategy) => strategy,
        };
        let mut engine: Box<dyn RegisterAllocationStrategy> = match strategy {
            Strategy::GraphColouring => Box::new(GraphColouring::new()),
            Strategy::LinearScan => Box::new(LinearScan::new()),
        };
        if trace_log_enabled!() {
            trace!("allocating with {}:\n{}", engine.name(), program);
        }

        let config = &self.config;
        let mut session = Session::new(program, config);
        let solution = loop {
            session.iteration += 1;
            if session.iteration > config.max_iterations {
                return Err(RegallocError::IterationLimit {
                    limit: config.max_iterations,
                });
            }
            match engine.attempt(&mut session)? {
                Ok(solution) => break solution,
                Err(restart) => {
                    log::debug!(
                        "{} iteration {}: restarting, {}",
                        engine.name(),
                        session.iteration,
                        restart
                    );
                }
            }
        };

        if config.verify {
            verify::verify(
                session.program,
                config,
                &session.persistent,
                &solution.groups,
                &solution.assignment,
            )?;
        }
        rename::rename(
            session.program,
            config,
            &session.area,
            &solution.assignment,
        )?;

        let summary = AllocationSummary {
            strategy,
            iterations: session.iteration,
            spilled: session.spilled,
            relocated: session.relocated,
            scratch_size: session.area.size(),
            temps_used: session.program.counters.temps_used,
        };
        log::debug!("{} done: {:?}", engine.name(), summary);
        if trace_log_enabled!() {
            trace!("allocated:\n{}", session.program);
        }
        Ok(summary)
    }
}

/// Allocate registers in `program` with `config`.
pub fn allocate(program: &mut Program, config: &Config) -> RegallocResult<AllocationSummary> {
    Context::new(config.clone()).run(program)
}
