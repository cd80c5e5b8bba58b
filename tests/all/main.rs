mod fixed;
mod groups;
mod interpreter;
mod random;
mod scenarios;
mod spilling;

use shader_regalloc::ir::{Opcode, Program, RegBank};
use shader_regalloc::{AllocationSummary, Config, RegallocResult};

/// Allocate with the verifier turned on.
pub(crate) fn allocate_verified(
    program: &mut Program,
    config: &Config,
) -> RegallocResult<AllocationSummary> {
    let _ = env_logger::try_init();
    let mut config = config.clone();
    config.verify(true);
    shader_regalloc::allocate(program, &config)
}

/// Check that every operand of `program` names a hardware register inside
/// the limits of `config`.
pub(crate) fn assert_hardware(program: &Program, config: &Config) {
    for func in program.functions.values() {
        for (_, inst) in func.layout() {
            let data = &func.insts[inst];
            for op in data.dests.iter().chain(data.srcs.iter()) {
                for reg in op.regs() {
                    match reg.bank {
                        RegBank::Temp => assert!(
                            reg.num < config.get_temps(),
                            "{} out of range in {}",
                            reg,
                            data
                        ),
                        RegBank::Internal => assert!(reg.num < config.get_internals()),
                        RegBank::PrimAttr => assert!(reg.num < config.get_prim_attrs()),
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Number of instructions with `opcode` in every function of `program`.
pub(crate) fn count_opcode(program: &Program, opcode: Opcode) -> usize {
    program
        .functions
        .values()
        .flat_map(|f| f.layout().map(move |(_, i)| f.insts[i].opcode))
        .filter(|&op| op == opcode)
        .count()
}
