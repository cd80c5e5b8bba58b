use crate::scenarios::assert_spill_code_adjacent;
use crate::{allocate_verified, assert_hardware, count_opcode};
use shader_regalloc::ir::{InstData, Opcode, Operand, Program, ProgramBuilder, ProgramKind, RegBank};
use shader_regalloc::{Config, RegallocError, Strategy};

/// `n` values all live at once, summed at the end.
fn wide_program(n: u32) -> Program {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let values: Vec<u32> = (0..n).map(|_| b.temp()).collect();
    for (k, &v) in values.iter().enumerate() {
        b.ins(InstData::load_const(Operand::temp(v), k as u32));
    }
    let mut acc = values[0];
    for &v in &values[1..] {
        let next = b.temp();
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(next),
            Operand::temp(acc),
            Operand::temp(v),
        ));
        acc = next;
    }
    b.mov(Operand::output(0), Operand::temp(acc));
    b.finish()
}

fn scratch_offsets(program: &Program) -> Vec<RegBank> {
    let main = program.main_func();
    main.layout()
        .map(|(_, i)| &main.insts[i])
        .filter(|data| data.info().memory)
        .filter_map(|data| data.srcs.last().map(|op| op.reg.bank))
        .collect()
}

#[test]
fn offsets_leave_immediates() {
    for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
        let mut program = wide_program(6);
        let mut config = Config::new();
        config
            .strategy(strategy)
            .temps(3)
            .max_immediate_offset(0)
            .spill_sec_attrs(96, 1);
        let summary = allocate_verified(&mut program, &config).unwrap();
        assert!(summary.spilled >= 2, "{:?}", strategy);
        assert_eq!(summary.scratch_size % 4, 0);

        let banks = scratch_offsets(&program);
        assert!(!banks.is_empty());
        assert!(banks.iter().all(|&b| b != RegBank::Immediate), "{:?}", strategy);
        assert!(banks.contains(&RegBank::SecAttr));
        assert!(banks.contains(&RegBank::Temp));
        assert_eq!(program.sec_attr_constants.len(), 1);
        assert_eq!(program.sec_attr_constants[0].0, 96);
        assert_hardware(&program, &config);
    }
}

#[test]
fn immediates_while_the_area_is_small() {
    let mut program = wide_program(5);
    let mut config = Config::new();
    config.temps(3);
    let summary = allocate_verified(&mut program, &config).unwrap();
    assert!(summary.spilled >= 1);
    assert!(summary.scratch_size <= 64);
    assert!(scratch_offsets(&program)
        .iter()
        .all(|&b| b == RegBank::Immediate));
    assert!(program.sec_attr_constants.is_empty());
    assert_spill_code_adjacent(&program);
}

#[test]
fn internal_registers_survive_spill_code() {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1).internals(1);
    let v: Vec<u32> = (0..4).map(|_| b.temp()).collect();
    let (sum, sum2, sum3, out) = (b.temp(), b.temp(), b.temp(), b.temp());
    b.ins(InstData::load_const(Operand::internal(0), 7));
    for (k, &t) in v.iter().enumerate() {
        b.ins(InstData::load_const(Operand::temp(t), k as u32));
    }
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(sum),
        Operand::temp(v[2]),
        Operand::temp(v[3]),
    ));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(sum2),
        Operand::temp(sum),
        Operand::temp(v[1]),
    ));
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(sum3),
        Operand::temp(sum2),
        Operand::temp(v[0]),
    ));
    b.ins(InstData::binary(
        Opcode::Dp4,
        Operand::temp(out),
        Operand::temp(sum3),
        Operand::internal(0),
    ));
    b.mov(Operand::output(0), Operand::temp(out));
    let mut program = b.finish();

    let mut config = Config::new();
    config.temps(3);
    let summary = allocate_verified(&mut program, &config).unwrap();
    assert_eq!(summary.spilled, 1);
    assert_eq!(count_opcode(&program, Opcode::ScratchStore), 1);
    assert_eq!(count_opcode(&program, Opcode::ScratchLoad), 1);

    // Each access is bracketed by a copy out of the internal register and a
    // copy back into it.
    let main = program.main_func();
    let insts: Vec<_> = main.layout().map(|(_, i)| &main.insts[i]).collect();
    for (i, data) in insts.iter().enumerate() {
        if !data.info().memory {
            continue;
        }
        let save = insts[..i]
            .iter()
            .rev()
            .find(|d| d.opcode != Opcode::LoadConst)
            .unwrap();
        assert_eq!(save.opcode, Opcode::Mov, "before {}", data);
        assert_eq!(save.srcs[0].reg.bank, RegBank::Internal, "before {}", data);
        let restore = insts[i + 1];
        assert_eq!(restore.opcode, Opcode::Mov, "after {}", data);
        assert_eq!(restore.dests[0].reg.bank, RegBank::Internal, "after {}", data);
        assert_eq!(restore.srcs[0].reg, save.dests[0].reg);
    }
    assert_hardware(&program, &config);
}

#[test]
fn iteration_limit_is_reported() {
    let mut program = wide_program(8);
    let mut config = Config::new();
    config.temps(2).max_iterations(1);
    assert_eq!(
        allocate_verified(&mut program, &config),
        Err(RegallocError::IterationLimit { limit: 1 })
    );
}
