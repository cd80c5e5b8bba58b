use crate::interpreter::{interpret, Run};
use crate::{allocate_verified, assert_hardware};
use proptest::prelude::*;
use proptest::strategy::Strategy as _;
use shader_regalloc::ir::{
    Block, InstData, Opcode, Operand, Predicate, Program, ProgramBuilder, ProgramKind,
    ALL_CHANNELS,
};
use shader_regalloc::{allocate, Config, Strategy};

#[derive(Debug, Clone)]
struct Shape {
    constants: u32,
    ops: Vec<(bool, usize, usize)>,
}

fn shape() -> impl proptest::strategy::Strategy<Value = Shape> {
    (
        2u32..8,
        prop::collection::vec((any::<bool>(), any::<usize>(), any::<usize>()), 0..12),
    )
        .prop_map(|(constants, ops)| Shape { constants, ops })
}

/// Straight-line code: constants, arithmetic over earlier values, and a sum
/// of everything into the output.
fn build(shape: &Shape) -> Program {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.outputs(1);
    let mut values = Vec::new();
    for k in 0..shape.constants {
        let t = b.temp();
        b.ins(InstData::load_const(Operand::temp(t), k));
        values.push(t);
    }
    for &(mul, x, y) in &shape.ops {
        let opcode = if mul { Opcode::Mul } else { Opcode::Add };
        let (x, y) = (values[x % values.len()], values[y % values.len()]);
        let t = b.temp();
        b.ins(InstData::binary(
            opcode,
            Operand::temp(t),
            Operand::temp(x),
            Operand::temp(y),
        ));
        values.push(t);
    }
    let mut acc = values[0];
    for &v in &values[1..] {
        let t = b.temp();
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(t),
            Operand::temp(acc),
            Operand::temp(v),
        ));
        acc = t;
    }
    b.mov(Operand::output(0), Operand::temp(acc));
    b.finish()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn straight_line_programs_allocate(shape in shape()) {
        for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
            let mut program = build(&shape);
            let mut config = Config::new();
            config.strategy(strategy).temps(4).max_immediate_offset(1024);
            let summary = allocate_verified(&mut program, &config);
            prop_assert!(summary.is_ok(), "{:?}: {:?}", strategy, summary);
            assert_hardware(&program, &config);
        }
    }
}

/// One instruction of a block: opcode selector, destination, two sources,
/// write mask and an optional predicate.
#[derive(Debug, Clone)]
struct BlockOp {
    opcode: u8,
    dest: usize,
    a: usize,
    b: usize,
    mask: u8,
    pred: Option<(u32, bool)>,
}

/// How a block leaves: fall through, loop on itself first, or branch ahead.
#[derive(Debug, Clone)]
enum Exit {
    Next,
    Loop,
    Ahead(usize),
}

#[derive(Debug, Clone)]
struct CfgShape {
    values: usize,
    blocks: Vec<(Vec<BlockOp>, Exit)>,
    preds: Vec<bool>,
    choices: Vec<usize>,
}

fn block_op() -> impl proptest::strategy::Strategy<Value = BlockOp> {
    (
        0u8..3,
        any::<usize>(),
        any::<usize>(),
        any::<usize>(),
        prop_oneof![Just(ALL_CHANNELS), 1u8..16],
        prop::option::of((0u32..2, any::<bool>())),
    )
        .prop_map(|(opcode, dest, a, b, mask, pred)| BlockOp {
            opcode,
            dest,
            a,
            b,
            mask,
            pred,
        })
}

fn exit() -> impl proptest::strategy::Strategy<Value = Exit> {
    prop_oneof![
        Just(Exit::Next),
        Just(Exit::Loop),
        any::<usize>().prop_map(Exit::Ahead),
    ]
}

fn cfg_shape() -> impl proptest::strategy::Strategy<Value = CfgShape> {
    (
        3usize..8,
        prop::collection::vec((prop::collection::vec(block_op(), 0..5), exit()), 1..5),
        prop::collection::vec(any::<bool>(), 2),
        prop::collection::vec(0usize..3, 1..8),
    )
        .prop_map(|(values, blocks, preds, choices)| CfgShape {
            values,
            blocks,
            preds,
            choices,
        })
}

/// An entry block defining every value in full, a chain of blocks with
/// masked and predicated arithmetic, loops and forward branches, and an exit
/// block summing everything into the outputs.
fn build_cfg(shape: &CfgShape) -> Program {
    let mut b = ProgramBuilder::new(ProgramKind::Main);
    b.prim_attrs(2).outputs(2);
    let values: Vec<u32> = (0..shape.values).map(|_| b.temp()).collect();
    for (k, &v) in values.iter().enumerate() {
        b.ins(InstData::load_const(Operand::temp(v), 7 * k as u32 + 3));
    }
    b.ins(InstData::binary(
        Opcode::Add,
        Operand::temp(values[0]),
        Operand::temp(values[0]),
        Operand::prim_attr(0),
    ));
    b.ins(InstData::binary(
        Opcode::Mul,
        Operand::temp(values[1]),
        Operand::temp(values[1]),
        Operand::prim_attr(1),
    ));

    let entry = b.current_block();
    let body: Vec<Block> = shape.blocks.iter().map(|_| b.create_block()).collect();
    let exit_block = b.create_block();
    // Block `i` of the whole chain; the entry is 0 and the exit comes last.
    let chain = |i: usize| -> Block {
        match i {
            0 => entry,
            i if i <= body.len() => body[i - 1],
            _ => exit_block,
        }
    };
    b.edge(entry, chain(1));

    for (i, (ops, exit)) in shape.blocks.iter().enumerate() {
        let here = body[i];
        b.switch_to_block(here);
        for op in ops {
            let opcode = match op.opcode {
                0 => Opcode::Mov,
                1 => Opcode::Add,
                _ => Opcode::Mul,
            };
            let dest = Operand::temp(values[op.dest % values.len()]).with_mask(op.mask);
            let a = Operand::temp(values[op.a % values.len()]);
            let mut data = if opcode == Opcode::Mov {
                InstData::mov(dest, a)
            } else {
                InstData::binary(opcode, dest, a, Operand::temp(values[op.b % values.len()]))
            };
            if let Some((num, negate)) = op.pred {
                data = data.predicated(Predicate { num, negate });
            }
            b.ins(data);
        }
        // The forward edge always comes last.
        let next = chain(i + 2);
        match exit {
            Exit::Next => {}
            Exit::Loop => {
                b.edge(here, here);
            }
            Exit::Ahead(skip) => {
                let remaining = body.len() + 1 - (i + 1);
                b.edge(here, chain(i + 2 + skip % remaining));
            }
        }
        b.edge(here, next);
    }

    b.switch_to_block(exit_block);
    let mut acc = values[0];
    for &v in &values[1..] {
        let t = b.temp();
        b.ins(InstData::binary(
            Opcode::Add,
            Operand::temp(t),
            Operand::temp(acc),
            Operand::temp(v),
        ));
        acc = t;
    }
    b.mov(Operand::output(0), Operand::temp(acc));
    b.mov(Operand::output(1), Operand::temp(values[values.len() - 1]));
    b.finish()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn cfg_programs_keep_their_results(shape in cfg_shape(), temps in 4u32..8) {
        let _ = env_logger::try_init();
        let program = build_cfg(&shape);
        let run = Run {
            prim_attrs: vec![[1, 2, 3, 4], [5, 6, 7, 8]],
            preds: shape.preds.clone(),
            choices: shape.choices.clone(),
        };
        let expected = interpret(&program, &run);
        for strategy in [Strategy::GraphColouring, Strategy::LinearScan] {
            let mut allocated = program.clone();
            let mut config = Config::new();
            config
                .strategy(strategy)
                .temps(temps)
                .max_immediate_offset(1024)
                .verify(false);
            let summary = allocate(&mut allocated, &config);
            prop_assert!(summary.is_ok(), "{:?}: {:?}", strategy, summary);
            prop_assert_eq!(
                interpret(&allocated, &run),
                expected.clone(),
                "{:?} with {} temps:\n{}",
                strategy,
                temps,
                allocated
            );
            assert_hardware(&allocated, &config);
        }
    }
}
