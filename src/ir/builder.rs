//! A small builder for assembling programs.

use super::entities::{Block, FuncRef, Inst, ProgramPoint};
use super::fixed::FixedReg;
use super::function::{ArrayDecl, Function, Program, ProgramKind};
use super::instructions::{InstData, Operand};

/// Assembles a [`Program`] one instruction at a time.
///
/// Instructions are appended to the current block of the current function.
/// Temporaries handed out by [`ProgramBuilder::temp`] are numbered densely.
pub struct ProgramBuilder {
    program: Program,
    func: FuncRef,
    block: Block,
}

impl ProgramBuilder {
    /// Start a program of the given kind, positioned at the entry of `main`.
    pub fn new(kind: ProgramKind) -> Self {
        let program = Program::new(kind);
        let func = program.main;
        let block = program.functions[func].entry;
        Self {
            program,
            func,
            block,
        }
    }

    /// Declare the primary attribute inputs.
    pub fn prim_attrs(&mut self, count: u32) -> &mut Self {
        self.program.regs.prim_attrs = count;
        self
    }

    /// Declare the output registers.
    pub fn outputs(&mut self, count: u32) -> &mut Self {
        self.program.regs.outputs = count;
        self
    }

    /// Declare the internal registers.
    pub fn internals(&mut self, count: u32) -> &mut Self {
        self.program.regs.internals = count;
        self
    }

    /// Reserve primary attributes at the top of the bank for the secondary
    /// update program.
    pub fn reserve_prim_attrs(&mut self, count: u32) -> &mut Self {
        self.program.reserved_prim_attrs = count;
        self
    }

    /// A fresh temporary.
    pub fn temp(&mut self) -> u32 {
        self.program.new_temp()
    }

    /// A dynamically indexed array of `len` fresh temporaries. Returns the
    /// first one.
    pub fn array(&mut self, len: u32) -> u32 {
        let base = self.program.new_temps(len);
        self.program.arrays.push(ArrayDecl { base, len });
        base
    }

    /// Add a fixed binding.
    pub fn fixed(&mut self, entry: FixedReg) -> usize {
        self.program.fixed.push(entry)
    }

    /// Mark a temporary as patchable by the USP.
    pub fn usp_temp(&mut self, temp: u32) -> &mut Self {
        self.program.usp_temps.push(temp);
        self
    }

    /// Create a new subroutine. The builder stays in the current function.
    pub fn function(&mut self, name: &str) -> FuncRef {
        self.program.functions.push(Function::new(name))
    }

    /// Continue building at the end of `func`'s entry block.
    pub fn switch_to_function(&mut self, func: FuncRef) -> &mut Self {
        self.func = func;
        self.block = self.program.functions[func].entry;
        self
    }

    /// Create a new block in the current function.
    pub fn create_block(&mut self) -> Block {
        self.program.functions[self.func].create_block()
    }

    /// Continue building at the end of `block`.
    pub fn switch_to_block(&mut self, block: Block) -> &mut Self {
        self.block = block;
        self
    }

    /// The block being built.
    pub fn current_block(&self) -> Block {
        self.block
    }

    /// Add a CFG edge.
    pub fn edge(&mut self, from: Block, to: Block) -> &mut Self {
        self.program.functions[self.func].blocks[from].succs.push(to);
        self
    }

    /// Append an instruction.
    pub fn ins(&mut self, data: InstData) -> Inst {
        self.program.functions[self.func].append_inst(self.block, data)
    }

    /// Append `mov dst, src`.
    pub fn mov(&mut self, dst: Operand, src: Operand) -> Inst {
        self.ins(InstData::mov(dst, src))
    }

    /// Mark `inst` of the current function as the split point.
    pub fn split_at(&mut self, inst: Inst) -> &mut Self {
        self.program.split_point = Some(ProgramPoint::new(self.func, inst));
        self
    }

    /// Mark `inst` of the current function as the feedback point.
    pub fn feedback_at(&mut self, inst: Inst) -> &mut Self {
        self.program.feedback_point = Some(ProgramPoint::new(self.func, inst));
        self
    }

    /// Finish building.
    pub fn finish(self) -> Program {
        self.program
    }
}
