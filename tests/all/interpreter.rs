//! A reference interpreter, to compare a program's results before and after
//! allocation.
//!
//! Every register holds four 32-bit channels and arithmetic wraps. A
//! consecutive operand bundle is read or written from its first register
//! onwards, whatever the later operands of the bundle name, which is how the
//! hardware addresses it. Blocks with several successors take the one picked
//! by `Run::choices`; once the block budget is spent the last successor is
//! taken, so a CFG whose last edges all lead forward always terminates.

use shader_regalloc::ir::{FuncRef, InstData, Opcode, Operand, Program, Reg, RegBank};
use std::collections::HashMap;

pub(crate) type Value = [u32; 4];

/// Block visits before every branch is forced onto its last successor.
const BLOCK_BUDGET: usize = 48;

/// Inputs of one execution.
#[derive(Clone, Debug, Default)]
pub(crate) struct Run {
    /// Initial contents of the primary attributes.
    pub prim_attrs: Vec<Value>,
    /// Predicate register values.
    pub preds: Vec<bool>,
    /// Successor picked at each branch, cycled.
    pub choices: Vec<usize>,
}

struct Machine<'a> {
    program: &'a Program,
    run: &'a Run,
    regs: HashMap<Reg, Value>,
    scratch: HashMap<u32, Value>,
    visits: usize,
}

/// Execute `program` and return the contents of its output registers.
pub(crate) fn interpret(program: &Program, run: &Run) -> Vec<Value> {
    let mut m = Machine {
        program,
        run,
        regs: HashMap::new(),
        scratch: HashMap::new(),
        visits: 0,
    };
    for (i, &value) in run.prim_attrs.iter().enumerate() {
        m.regs.insert(Reg::new(RegBank::PrimAttr, i as u32), value);
    }
    m.call(program.main);
    (0..program.regs.outputs)
        .map(|i| m.read(Reg::new(RegBank::Output, i)))
        .collect()
}

impl Machine<'_> {
    fn call(&mut self, func_ref: FuncRef) {
        let program = self.program;
        let func = &program.functions[func_ref];
        let mut block = func.entry;
        loop {
            for &inst in &func.blocks[block].insts {
                self.exec(&func.insts[inst]);
            }
            let succs = &func.blocks[block].succs;
            let Some(&last) = succs.last() else {
                return;
            };
            block = if self.visits < BLOCK_BUDGET && !self.run.choices.is_empty() {
                let choice = self.run.choices[self.visits % self.run.choices.len()];
                succs[choice % succs.len()]
            } else {
                last
            };
            self.visits += 1;
        }
    }

    fn read(&self, reg: Reg) -> Value {
        match reg.bank {
            RegBank::Immediate => [reg.num; 4],
            RegBank::SecAttr => {
                let value = self
                    .program
                    .sec_attr_constants
                    .iter()
                    .find(|&&(sa, _)| sa == reg.num)
                    .map_or(0, |&(_, value)| value);
                [value; 4]
            }
            _ => self.regs.get(&reg).copied().unwrap_or_default(),
        }
    }

    fn src(&self, data: &InstData, index: usize) -> Value {
        self.read(data.srcs[index].reg)
    }

    /// Register `k` of the bundle starting at `op`.
    fn bundle(op: &Operand, k: u32) -> Reg {
        Reg::new(op.reg.bank, op.reg.num + k)
    }

    fn write(&mut self, dest: &Operand, reg: Reg, value: Value) {
        let slot = self.regs.entry(reg).or_default();
        for c in 0..4 {
            if dest.mask & (1 << c) != 0 {
                slot[c] = value[c];
            }
        }
    }

    fn scratch_offset(&self, op: &Operand) -> u32 {
        self.read(op.reg)[0]
    }

    fn exec(&mut self, data: &InstData) {
        if let Some(pred) = data.pred {
            let set = self
                .run
                .preds
                .get(pred.num as usize)
                .copied()
                .unwrap_or(false);
            if set == pred.negate {
                return;
            }
        }
        let lanes = |f: &dyn Fn(usize) -> u32| -> Value { [f(0), f(1), f(2), f(3)] };
        match data.opcode {
            Opcode::Mov | Opcode::Pack | Opcode::LoadConst => {
                let v = self.src(data, 0);
                self.write(&data.dests[0], data.dests[0].reg, v);
            }
            Opcode::Add | Opcode::Mul => {
                let (a, b) = (self.src(data, 0), self.src(data, 1));
                let v = if data.opcode == Opcode::Add {
                    lanes(&|c| a[c].wrapping_add(b[c]))
                } else {
                    lanes(&|c| a[c].wrapping_mul(b[c]))
                };
                self.write(&data.dests[0], data.dests[0].reg, v);
            }
            Opcode::Mad => {
                let (a, b, x) = (self.src(data, 0), self.src(data, 1), self.src(data, 2));
                let v = lanes(&|c| a[c].wrapping_mul(b[c]).wrapping_add(x[c]));
                self.write(&data.dests[0], data.dests[0].reg, v);
            }
            Opcode::Dp4 => {
                let (a, b) = (self.src(data, 0), self.src(data, 1));
                let dot = (0..4).fold(0u32, |acc, c| acc.wrapping_add(a[c].wrapping_mul(b[c])));
                self.write(&data.dests[0], data.dests[0].reg, [dot; 4]);
            }
            Opcode::Sample | Opcode::SampleMulti => {
                let first = &data.srcs[0];
                let u = self.read(Self::bundle(first, 0));
                let v = self.read(Self::bundle(first, 1));
                let texel = lanes(&|c| u[c].wrapping_mul(31).wrapping_add(v[c]));
                let dest = data.dests[0];
                self.write(&dest, Self::bundle(&dest, 0), texel);
                if data.opcode == Opcode::SampleMulti {
                    let second = lanes(&|c| u[c] ^ v[c].wrapping_mul(17));
                    let mut upper = dest;
                    upper.mask = data.dests.get(1).map_or(dest.mask, |d| d.mask);
                    self.write(&upper, Self::bundle(&dest, 1), second);
                }
            }
            Opcode::ScratchLoad => {
                let offset = self.scratch_offset(&data.srcs[0]);
                let v = self.scratch.get(&offset).copied().unwrap_or_default();
                self.write(&data.dests[0], data.dests[0].reg, v);
            }
            Opcode::ScratchStore => {
                let offset = self.scratch_offset(&data.srcs[1]);
                let v = self.src(data, 0);
                self.scratch.insert(offset, v);
            }
            Opcode::Call(callee) => self.call(callee),
            Opcode::Nop => {}
        }
    }
}
