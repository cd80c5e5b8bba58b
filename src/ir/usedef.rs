//! Use/def chains.
//!
//! For every register named by an explicit operand, the ordered list of
//! program points that define or use it. The allocator rebuilds the chains
//! after each pass that rewrites the program.

use super::entities::ProgramPoint;
use super::function::Program;
use super::registers::{Reg, RegBank};
use rustc_hash::FxHashMap;

/// How an instruction touches a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Unconditional write.
    Def,
    /// Conditional or partial write; earlier contents may survive.
    CondDef,
    /// Read.
    Use,
}

/// One entry of a chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UseDef {
    /// Where the access happens.
    pub point: ProgramPoint,
    /// What kind of access.
    pub kind: AccessKind,
}

/// Use/def chains for every register of a program.
#[derive(Debug, Default)]
pub struct UseDefChains {
    chains: FxHashMap<Reg, Vec<UseDef>>,
}

impl UseDefChains {
    /// Compute the chains of `program`, in layout order per function.
    ///
    /// Immediates are not registers and are skipped. A dynamically indexed
    /// operand touches every element of its array; writes through one are
    /// conditional.
    pub fn compute(program: &Program) -> Self {
        let mut chains: FxHashMap<Reg, Vec<UseDef>> = FxHashMap::default();
        for (func_ref, func) in program.functions.iter() {
            for (_, inst) in func.layout() {
                let data = &func.insts[inst];
                let point = ProgramPoint::new(func_ref, inst);
                for op in &data.srcs {
                    if op.reg.bank == RegBank::Immediate {
                        continue;
                    }
                    for reg in op.regs() {
                        chains.entry(reg).or_default().push(UseDef {
                            point,
                            kind: AccessKind::Use,
                        });
                    }
                }
                for op in &data.dests {
                    let kind = if data.is_conditional() || op.dyn_len.is_some() {
                        AccessKind::CondDef
                    } else {
                        AccessKind::Def
                    };
                    for reg in op.regs() {
                        chains
                            .entry(reg)
                            .or_default()
                            .push(UseDef { point, kind });
                    }
                }
            }
        }
        Self { chains }
    }

    /// The chain for `reg`, empty if it is never referenced.
    pub fn get(&self, reg: Reg) -> &[UseDef] {
        self.chains.get(&reg).map_or(&[], |v| v.as_slice())
    }

    /// Every use of `reg`.
    pub fn uses(&self, reg: Reg) -> impl Iterator<Item = ProgramPoint> + '_ {
        self.get(reg)
            .iter()
            .filter(|ud| ud.kind == AccessKind::Use)
            .map(|ud| ud.point)
    }

    /// Every definition of `reg`, conditional or not.
    pub fn defs(&self, reg: Reg) -> impl Iterator<Item = ProgramPoint> + '_ {
        self.get(reg)
            .iter()
            .filter(|ud| ud.kind != AccessKind::Use)
            .map(|ud| ud.point)
    }

    /// Number of references to `reg`.
    pub fn ref_count(&self, reg: Reg) -> usize {
        self.get(reg).len()
    }

    /// Is `reg` referenced at all?
    pub fn is_referenced(&self, reg: Reg) -> bool {
        self.chains.contains_key(&reg)
    }
}
