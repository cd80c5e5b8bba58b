use crate::{allocate_verified, assert_hardware, count_opcode};
use shader_regalloc::entity::SecondaryMap;
use shader_regalloc::ir::{
    InstData, Opcode, Operand, Program, ProgramBuilder, ProgramKind, RegBank,
};
use shader_regalloc::regalloc::interference::{mark_regions, InterferenceGraph};
use shader_regalloc::regalloc::liveness::Liveness;
use shader_regalloc::regalloc::{NodeInfo, NodeLayout};
use shader_regalloc::{Config, RegallocError, Strategy};

fn graph_of(program: &Program, config: &Config) -> InterferenceGraph {
    let layout = NodeLayout::new(program, config);
    let mut info = NodeInfo::collect(program, &layout, config, &SecondaryMap::new());
    let liveness = Liveness::compute(program, &layout);
    mark_regions(program, &layout, &liveness, &mut info);
    InterferenceGraph::build(program, &layout, &liveness, &info)
}

#[test]
fn no_pressure() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let t0 = b.temp();
    let t1 = b.temp();
    let t2 = b.temp();
    b.ins(InstData::load_const(Operand::temp(t0), 1));
    b.ins(InstData::load_const(Operand::temp(t1), 2));
    b.ins(InstData::binary(Opcode::Add, Operand::temp(t2), Operand::temp(t0), Operand::temp(t1)));
    b.mov(Operand::output(0), Operand::temp(t2));
    let mut program = b.finish();

    let mut config = Config::new();
    config.temps(2);
    let graph = graph_of(&program, &config);
    assert_eq!(graph.num_edges(), 1);
    let layout = NodeLayout::new(&program, &config);
    assert!(graph.interferes(layout.temp_node(t0).unwrap(), layout.temp_node(t1).unwrap()));

    let summary = allocate_verified(&mut program, &config).unwrap();
    assert_eq!(summary.spilled, 0);
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.scratch_size, 0);
    assert!(program.counters.temps_used <= 2);
    assert_hardware(&program, &config);
}

/// Three values live across the definition of a third, and two registers.
fn pressure_program() -> Program {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let t: Vec<u32> = (0..5).map(|_| b.temp()).collect();
    b.ins(InstData::load_const(Operand::temp(t[0]), 1));
    b.ins(InstData::load_const(Operand::temp(t[1]), 2));
    b.ins(InstData::load_const(Operand::temp(t[2]), 3));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(t[3]),
        Operand::temp(t[1]),
        Operand::temp(t[2]),
    ));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(t[4]),
        Operand::temp(t[3]),
        Operand::temp(t[0]),
    ));
    b.mov(Operand::output(0), Operand::temp(t[4]));
    b.finish()
}

/// Every scratch store directly follows the write it saves and every scratch
/// load directly precedes the read it feeds.
pub(crate) fn assert_spill_code_adjacent(program: &Program) {
    for func in program.functions.values() {
        let insts: Vec<_> = func.layout().map(|(_, i)| &func.insts[i]).collect();
        for (i, data) in insts.iter().enumerate() {
            match data.opcode {
                Opcode::ScratchStore => {
                    let value = data.srcs[0].reg;
                    assert!(i > 0, "store at program start");
                    assert!(
                        insts[i - 1].dests.iter().any(|d| d.reg == value),
                        "{} does not follow a write of {}",
                        data,
                        value
                    );
                }
                Opcode::ScratchLoad => {
                    let value = data.dests[0].reg;
                    let next = insts.get(i + 1).expect("load at program end");
                    assert!(
                        next.srcs.iter().any(|s| s.reg == value)
                            || next.dests.iter().any(|d| d.reg == value),
                        "{} does not precede a use of {}",
                        data,
                        value
                    );
                }
                _ => {}
            }
        }
    }
}

#[test]
fn forced_spill() {
    let mut program = pressure_program();
    let mut config = Config::new();
    config.temps(2);

    let summary = allocate_verified(&mut program, &config).unwrap();
    assert_eq!(summary.spilled, 1);
    assert_eq!(summary.scratch_size, 4);
    assert_eq!(program.counters.scratch_size, 4);
    assert_eq!(count_opcode(&program, Opcode::ScratchStore), 1);
    assert_eq!(count_opcode(&program, Opcode::ScratchLoad), 1);
    assert_spill_code_adjacent(&program);
    assert_hardware(&program, &config);
}

#[test]
fn even_group_skips_odd_range() {
    use shader_regalloc::ir::{FixedReg, HwBank};

    for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
        let mut b = ProgramBuilder::new(ProgramKind::Main);
        b.outputs(1);
        let x = b.temp();
        b.fixed(FixedReg::input(x, 1, HwBank::Temp, 0));
        let s: Vec<u32> = (0..2).map(|_| b.temp()).collect();
        let d: Vec<u32> = (0..4).map(|_| b.temp()).collect();
        let sums: Vec<u32> = (0..4).map(|_| b.temp()).collect();
        b.ins(InstData::load_const(Operand::temp(s[0]), 0));
        b.ins(InstData::load_const(Operand::temp(s[1]), 1));
        let mut sample = InstData::new(Opcode::SampleMulti);
        for &r in &d {
            sample = sample.dest(Operand::temp(r));
        }
        b.ins(sample.src(Operand::temp(s[0])).src(Operand::temp(s[1])));
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(sums[0]),
            Operand::temp(d[0]),
            Operand::temp(d[1]),
        ));
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(sums[1]),
            Operand::temp(d[2]),
            Operand::temp(d[3]),
        ));
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(sums[2]),
            Operand::temp(sums[0]),
            Operand::temp(sums[1]),
        ));
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(sums[3]),
            Operand::temp(sums[2]),
            Operand::temp(x),
        ));
        b.mov(Operand::output(0), Operand::temp(sums[3]));
        let mut program = b.finish();

        // r0 holds the input, so r1..r4 is the first free run but starts odd.
        let mut config = Config::new();
        config.temps(6).strategy(strategy);
        let summary = allocate_verified(&mut program, &config).unwrap();
        assert_eq!(summary.spilled, 0, "{:?}", strategy);

        let main = program.main_func();
        let sample = main
            .layout()
            .map(|(_, i)| &main.insts[i])
            .find(|data| data.opcode == Opcode::SampleMulti)
            .unwrap();
        let regs: Vec<u32> = sample.dests.iter().map(|op| op.reg.num).collect();
        assert_eq!(regs, vec![2, 3, 4, 5], "{:?}", strategy);
        assert!(sample.dests.iter().all(|op| op.reg.bank == RegBank::Temp));
        assert_eq!(sample.srcs[0].reg.num % 2, 0);
        assert_eq!(sample.srcs[1].reg.num, sample.srcs[0].reg.num + 1);
        assert_hardware(&program, &config);
    }
}

#[test]
fn internal_registers_exhausted() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1).internals(2);
    let t = b.temp();
    b.ins(InstData::load_const(Operand::internal(0), 1));
    b.ins(InstData::load_const(Operand::internal(1), 2));
    // dp4 can only address the first internal register.
    b.ins(InstData::binary(
        Opcode::Dp4,
        Operand::temp(t),
        Operand::internal(0),
        Operand::internal(1),
    ));
    b.mov(Operand::output(0), Operand::temp(t));
    let mut program = b.finish();

    let err = allocate_verified(&mut program, &Config::new()).unwrap_err();
    assert!(
        matches!(err, RegallocError::InternalRegistersExhausted { .. }),
        "{}",
        err
    );
}

#[test]
fn internal_registers_renumbered() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1).internals(2);
    let t = b.temp();
    b.ins(InstData::load_const(Operand::internal(1), 1));
    b.ins(InstData::binary(Opcode::Dp4, Operand::temp(t), Operand::internal(1), Operand::imm(2)));
    b.mov(Operand::output(0), Operand::temp(t));
    let mut program = b.finish();

    allocate_verified(&mut program, &Config::new()).unwrap();
    assert_eq!(program.counters.internal_mask, 0b1);
}

#[test]
fn values_live_across_calls() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let t = b.temp();
    let u = b.temp();
    let v = b.temp();
    let w = b.temp();
    let helper = b.function("helper");
    b.ins(InstData::load_const(Operand::temp(t), 1));
    b.ins(InstData::call(helper));
    b.ins(InstData::binary(Opcode::Add, Operand::temp(w), Operand::temp(t), Operand::temp(v)));
    b.mov(Operand::output(0), Operand::temp(w));
    b.switch_to_function(helper);
    b.ins(InstData::load_const(Operand::temp(u), 5));
    b.ins(InstData::binary(Opcode::Mul, Operand::temp(v), Operand::temp(u), Operand::temp(u)));
    let program = b.finish();

    for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
        let mut program = program.clone();
        let mut config = Config::new();
        config.strategy(strategy);
        allocate_verified(&mut program, &config).unwrap();

        let main = program.main_func();
        let first = main.layout().next().map(|(_, i)| &main.insts[i]).unwrap();
        let held = first.dests[0].reg;
        let sub = &program.functions[helper];
        for (_, inst) in sub.layout() {
            for op in &sub.insts[inst].dests {
                assert_ne!(op.reg, held, "{:?} clobbers a value live across the call", strategy);
            }
        }
    }
}

#[test]
fn post_split_budget() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let t: Vec<u32> = (0..5).map(|_| b.temp()).collect();
    b.ins(InstData::load_const(Operand::temp(t[0]), 1));
    b.ins(InstData::load_const(Operand::temp(t[1]), 2));
    b.ins(InstData::load_const(Operand::temp(t[2]), 3));
    let split = b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(t[3]),
        Operand::temp(t[0]),
        Operand::temp(t[1]),
    ));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(t[4]),
        Operand::temp(t[3]),
        Operand::temp(t[2]),
    ));
    b.mov(Operand::output(0), Operand::temp(t[4]));
    b.split_at(split);
    let mut program = b.finish();

    let mut config = Config::new();
    config.temps(4).post_split_temps(Some(2));
    allocate_verified(&mut program, &config).unwrap();

    let main = program.main_func();
    for (_, inst) in main.layout().skip(4) {
        for op in main.insts[inst].dests.iter().chain(main.insts[inst].srcs.iter()) {
            if op.reg.bank == RegBank::Temp {
                assert!(op.reg.num < 2, "{} after the split", op.reg);
            }
        }
    }
}

#[test]
fn secondary_programs_use_graph_colouring() {
    let mut b = ProgramBuilder::new(ProgramKind::Secondary);
    b.outputs(1);
    let t = b.temp();
    b.ins(InstData::load_const(Operand::temp(t), 7));
    b.mov(Operand::output(0), Operand::temp(t));
    let mut program = b.finish();

    let mut config = Config::new();
    config.strategy(Strategy::LinearScan);
    let summary = allocate_verified(&mut program, &config).unwrap();
    assert_eq!(summary.strategy, Strategy::GraphColouring);
    assert!(program.counters.secondary_finalized);
}
