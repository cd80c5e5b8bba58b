use crate::interpreter::{interpret, Run};
use crate::{allocate_verified, assert_hardware, count_opcode};
use shader_regalloc::ir::{
    InstData, Opcode, Operand, Program, ProgramBuilder, ProgramKind, RegBank,
};
use shader_regalloc::{allocate, Config, Strategy};

fn assert_bundles_consecutive(program: &Program) {
    for func in program.functions.values() {
        for (_, inst) in func.layout() {
            let data = &func.insts[inst];
            if data.opcode != Opcode::Sample {
                continue;
            }
            let (a, b) = (data.srcs[0].reg, data.srcs[1].reg);
            assert_eq!(a.bank, b.bank, "{}", data);
            assert_eq!(b.num, a.num + 1, "{}", data);
            assert_eq!(a.num % 2, 0, "{}", data);
        }
    }
}

#[test]
fn crossed_bundles_get_copies() {
    for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
        let mut b = ProgramBuilder::new(ProgramKind::Main);
        b.outputs(1);
        let u = b.temp();
        let v = b.temp();
        let x = b.temp();
        let y = b.temp();
        let z = b.temp();
        b.ins(InstData::load_const(Operand::temp(u), 1));
        b.ins(InstData::load_const(Operand::temp(v), 2));
        // The second sample wants the same pair in the opposite order, which
        // no single colouring satisfies.
        b.ins(
            InstData::new(Opcode::Sample)
                .dest(Operand::temp(x))
                .src(Operand::temp(u))
                .src(Operand::temp(v)),
        );
        b.ins(
            InstData::new(Opcode::Sample)
                .dest(Operand::temp(y))
                .src(Operand::temp(v))
                .src(Operand::temp(u)),
        );
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(z),
            Operand::temp(x),
            Operand::temp(y),
        ));
        b.mov(Operand::output(0), Operand::temp(z));
        let mut program = b.finish();
        let movs_before = count_opcode(&program, Opcode::Mov);

        let mut config = Config::new();
        config.strategy(strategy);
        allocate_verified(&mut program, &config).unwrap();
        assert!(count_opcode(&program, Opcode::Mov) > movs_before, "{:?}", strategy);
        assert_bundles_consecutive(&program);
        assert_hardware(&program, &config);
    }
}

#[test]
fn arrays_stay_consecutive() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let base = b.array(4);
    let t = b.temp();
    for k in 0..4 {
        b.ins(InstData::load_const(Operand::temp(base + k), k));
    }
    b.ins(InstData::load_const(Operand::temp(t), 9));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::output(0),
        Operand::temp(base).dyn_array(4),
        Operand::temp(t),
    ));
    let mut program = b.finish();

    allocate_verified(&mut program, &Config::new()).unwrap();
    let main = program.main_func();
    let regs: Vec<u32> = main
        .layout()
        .take(4)
        .map(|(_, i)| main.insts[i].dests[0].reg.num)
        .collect();
    assert_eq!(regs[1], regs[0] + 1);
    assert_eq!(regs[2], regs[0] + 2);
    assert_eq!(regs[3], regs[0] + 3);
    let (_, last) = main.layout().last().unwrap();
    assert_eq!(main.insts[last].srcs[0].reg.num, regs[0]);
}

fn sample_prim_attrs(first: u32, second: u32) -> Program {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.prim_attrs(3).outputs(1);
    let x = b.temp();
    b.ins(
        InstData::new(Opcode::Sample)
            .dest(Operand::temp(x))
            .src(Operand::prim_attr(first))
            .src(Operand::prim_attr(second)),
    );
    b.mov(Operand::output(0), Operand::temp(x));
    b.finish()
}

#[test]
fn prim_attr_bundles_are_copied_when_misplaced() {
    let _ = env_logger::try_init();
    let inputs = vec![[1, 2, 3, 4], [10, 20, 30, 40], [100, 200, 300, 400]];
    let run = Run {
        prim_attrs: inputs.clone(),
        ..Run::default()
    };
    // An odd first register, then a pair running backwards.
    for (first, second) in [(1u32, 2u32), (1, 0)] {
        let (u, v) = (inputs[first as usize], inputs[second as usize]);
        let texel: Vec<u32> = (0..4).map(|c| u[c] * 31 + v[c]).collect();
        for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
            for verify in [false, true] {
                let mut program = sample_prim_attrs(first, second);
                let mut config = Config::new();
                config.strategy(strategy).verify(verify);
                allocate(&mut program, &config).unwrap();
                assert_eq!(count_opcode(&program, Opcode::Mov), 3, "{:?}", strategy);
                assert_bundles_consecutive(&program);
                assert_hardware(&program, &config);
                assert_eq!(interpret(&program, &run)[0].to_vec(), texel, "{}", program);
            }
        }
    }
}

#[test]
fn aligned_prim_attr_bundles_are_used_in_place() {
    for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
        let mut program = sample_prim_attrs(0, 1);
        let mut config = Config::new();
        config.strategy(strategy);
        allocate_verified(&mut program, &config).unwrap();
        assert_eq!(count_opcode(&program, Opcode::Mov), 1);
        let main = program.main_func();
        let (_, first) = main.layout().next().unwrap();
        let sample = &main.insts[first];
        assert_eq!(sample.opcode, Opcode::Sample);
        assert_eq!(sample.srcs[0].reg.bank, RegBank::PrimAttr);
        assert_eq!(sample.srcs[0].reg.num, 0);
    }
}
