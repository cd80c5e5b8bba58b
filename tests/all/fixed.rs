use crate::{allocate_verified, assert_hardware};
use shader_regalloc::ir::{
    FixedReg, HwBank, InstData, Opcode, Operand, ProgramBuilder, ProgramKind, Reg, RegBank,
};
use shader_regalloc::{Config, Strategy};

#[test]
fn conflicting_fixed_colours_are_relocated() {
    for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
        let mut b = ProgramBuilder::new(ProgramKind::Main);
        b.prim_attrs(1).outputs(1);
        let input = b.temp();
        let result = b.temp();
        let sum = b.temp();
        b.fixed(FixedReg::input(input, 1, HwBank::PrimAttr, 0));
        let out = b.fixed(FixedReg::output(result, 1, HwBank::PrimAttr, 0));
        // `result` is written while `input` is still needed.
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(result),
            Operand::temp(input),
            Operand::imm(1),
        ));
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(sum),
            Operand::temp(input),
            Operand::temp(result),
        ));
        b.mov(Operand::output(0), Operand::temp(sum));
        let mut program = b.finish();

        let mut config = Config::new();
        config.prim_attrs_writable(true).strategy(strategy);
        let summary = allocate_verified(&mut program, &config).unwrap();
        assert_eq!(summary.relocated, 1, "{:?}", strategy);
        assert!(summary.iterations >= 2);

        let binding = program.fixed.get(out).unwrap();
        assert_eq!(binding.relocated_from, Some(result));
        assert_ne!(binding.vreg, result);

        // The copy into the output location ends the program.
        let main = program.main_func();
        let (_, last) = main.layout().last().unwrap();
        let copy = &main.insts[last];
        assert_eq!(copy.opcode, Opcode::Mov);
        assert_eq!(copy.dests[0].reg, Reg::new(RegBank::PrimAttr, 0));
        assert_ne!(copy.srcs[0].reg, Reg::new(RegBank::PrimAttr, 0));
        assert_hardware(&program, &config);
    }
}

#[test]
fn outputs_crossing_feedback_are_relocated() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    let a = b.temp();
    let result = b.temp();
    let out = b.fixed(FixedReg::output(result, 1, HwBank::Output, 0));
    b.ins(InstData::load_const(Operand::temp(a), 3));
    b.ins(InstData::binary(Opcode::Add, Operand::temp(result), Operand::temp(a), Operand::temp(a)));
    let feedback = b.ins(InstData::new(Opcode::Nop));
    b.feedback_at(feedback);
    let mut program = b.finish();

    let summary = allocate_verified(&mut program, &Config::new()).unwrap();
    assert_eq!(summary.relocated, 1);
    assert_eq!(program.fixed.get(out).unwrap().relocated_from, Some(result));

    let main = program.main_func();
    let (_, last) = main.layout().last().unwrap();
    assert_eq!(main.insts[last].dests[0].reg, Reg::new(RegBank::Output, 0));
}

#[test]
fn inputs_are_copied_at_entry() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.prim_attrs(1).outputs(1);
    let input = b.temp();
    let t = b.temp();
    // Primary attributes are read-only, so an input that is rewritten in
    // place cannot stay in one.
    b.fixed(FixedReg::input(input, 1, HwBank::PrimAttr, 0));
    b.ins(InstData::load_const(Operand::temp(t), 1));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(input),
        Operand::temp(input),
        Operand::temp(t),
    ));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::output(0),
        Operand::temp(input),
        Operand::temp(t),
    ));
    let mut program = b.finish();

    let summary = allocate_verified(&mut program, &Config::new()).unwrap();
    assert_eq!(summary.relocated, 1);
    let main = program.main_func();
    let (_, first) = main.layout().next().unwrap();
    assert_eq!(main.insts[first].opcode, Opcode::Mov);
    assert_eq!(main.insts[first].srcs[0].reg, Reg::new(RegBank::PrimAttr, 0));
    assert_eq!(main.insts[first].dests[0].reg.bank, RegBank::Temp);
}

#[test]
fn unbound_index_keeps_bank() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1).internals(1);
    let t = b.temp();
    let u = b.temp();
    b.fixed(FixedReg {
        index: None,
        ..FixedReg::input(t, 1, HwBank::Internal, 0)
    });
    b.ins(InstData::load_const(Operand::temp(t), 1));
    b.ins(InstData::binary(Opcode::Add, Operand::temp(u), Operand::temp(t), Operand::imm(1)));
    b.mov(Operand::output(0), Operand::temp(u));
    let mut program = b.finish();

    allocate_verified(&mut program, &Config::new()).unwrap();
    let main = program.main_func();
    let (_, first) = main.layout().next().unwrap();
    assert_eq!(main.insts[first].dests[0].reg.bank, RegBank::Internal);
}
