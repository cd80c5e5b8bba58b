//! Functions and programs.

use super::entities::{Block, FuncRef, Inst, ProgramPoint};
use super::fixed::FixedRegTable;
use super::instructions::InstData;
use super::registers::{channel_suffix, ChannelMask, Reg};
use cranelift_entity::PrimaryMap;
use core::fmt;
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};
use smallvec::SmallVec;

/// The contents of a basic block.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    /// Instructions in execution order.
    pub insts: Vec<Inst>,
    /// Successor blocks.
    pub succs: SmallVec<[Block; 2]>,
    /// Registers live on exit from the block, with their live channels.
    ///
    /// Recomputed by the allocator and rewritten with hardware registers.
    pub live_out: Vec<(Reg, ChannelMask)>,
}

/// A function: a CFG of blocks over an instruction arena.
#[derive(Clone, Debug)]
pub struct Function {
    /// Name, for diagnostics.
    pub name: String,
    /// Blocks. Layout order is key order.
    pub blocks: PrimaryMap<Block, BlockData>,
    /// Instruction arena. Removed instructions stay in the arena but leave
    /// the layout.
    pub insts: PrimaryMap<Inst, InstData>,
    /// The entry block.
    pub entry: Block,
}

impl Function {
    /// Create a function with a single empty entry block.
    pub fn new(name: impl Into<String>) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::default());
        Self {
            name: name.into(),
            blocks,
            insts: PrimaryMap::new(),
            entry,
        }
    }

    /// Append a new empty block.
    pub fn create_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Append an instruction to the end of `block`.
    pub fn append_inst(&mut self, block: Block, data: InstData) -> Inst {
        let inst = self.insts.push(data);
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Insert an instruction at `pos` in `block`.
    pub fn insert_inst(&mut self, block: Block, pos: usize, data: InstData) -> Inst {
        let inst = self.insts.push(data);
        self.blocks[block].insts.insert(pos, inst);
        inst
    }

    /// Remove the instruction at `pos` in `block` from the layout.
    pub fn remove_inst(&mut self, block: Block, pos: usize) -> Inst {
        self.blocks[block].insts.remove(pos)
    }

    /// Blocks without successors.
    pub fn exit_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks
            .iter()
            .filter(|(_, data)| data.succs.is_empty())
            .map(|(block, _)| block)
    }

    /// The block containing `inst` and its index within the block.
    pub fn locate(&self, inst: Inst) -> Option<(Block, usize)> {
        self.blocks.iter().find_map(|(block, data)| {
            data.insts
                .iter()
                .position(|&i| i == inst)
                .map(|pos| (block, pos))
        })
    }

    /// Every instruction in layout order.
    pub fn layout(&self) -> impl Iterator<Item = (Block, Inst)> + '_ {
        self.blocks
            .iter()
            .flat_map(|(block, data)| data.insts.iter().map(move |&inst| (block, inst)))
    }

    /// Number of instructions in the layout.
    pub fn num_insts(&self) -> usize {
        self.blocks.values().map(|b| b.insts.len()).sum()
    }
}

/// Which kind of program is being allocated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ProgramKind {
    /// A main shader program.
    Main,
    /// A secondary update program, run by the driver to compute values for
    /// the main program. It owns the primary attributes reserved for it at
    /// the top of the bank.
    Secondary,
}

/// Declared register counts of a program.
///
/// Primary attributes, outputs and internals are real hardware registers used
/// directly by the program. Temporaries are virtual; `temps` is one past the
/// highest virtual number in use.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RegisterFile {
    /// Primary attributes read as inputs.
    pub prim_attrs: u32,
    /// Outputs.
    pub outputs: u32,
    /// Internal registers.
    pub internals: u32,
    /// Virtual temporaries.
    pub temps: u32,
}

/// A dynamically indexed array of temporaries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ArrayDecl {
    /// First virtual temporary of the array.
    pub base: u32,
    /// Number of elements.
    pub len: u32,
}

/// Register usage and scratch size after allocation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ProgramCounters {
    /// One past the highest hardware temporary used.
    pub temps_used: u32,
    /// One past the highest primary attribute used.
    pub prim_attrs_used: u32,
    /// Bit `n` is set when internal register `n` is used.
    pub internal_mask: u32,
    /// Bytes of scratch memory needed for spills.
    pub scratch_size: u32,
    /// Set once the registers of a secondary update program are final.
    pub secondary_finalized: bool,
}

/// A whole shader program.
#[derive(Clone, Debug)]
pub struct Program {
    /// Main shader or secondary update program.
    pub kind: ProgramKind,
    /// All functions. Subroutines are called from `main`.
    pub functions: PrimaryMap<FuncRef, Function>,
    /// The function executed first.
    pub main: FuncRef,
    /// Declared register counts.
    pub regs: RegisterFile,
    /// Primary attributes at the top of the hardware bank reserved for the
    /// secondary update program. The main program must not touch them.
    pub reserved_prim_attrs: u32,
    /// Shader input and output bindings.
    pub fixed: FixedRegTable,
    /// Dynamically indexed arrays.
    pub arrays: Vec<ArrayDecl>,
    /// Temporaries the USP may patch; they are spilled last.
    pub usp_temps: Vec<u32>,
    /// The split point: after it, only the post-split temporary budget is
    /// available.
    pub split_point: Option<ProgramPoint>,
    /// The feedback point: output registers do not survive it.
    pub feedback_point: Option<ProgramPoint>,
    /// Secondary attributes the driver must load with spill offsets, as
    /// `(secondary attribute, byte offset)`.
    pub sec_attr_constants: Vec<(u32, u32)>,
    /// Register usage, filled in by allocation.
    pub counters: ProgramCounters,
}

impl Program {
    /// Create an empty program with a main function.
    pub fn new(kind: ProgramKind) -> Self {
        let mut functions = PrimaryMap::new();
        let main = functions.push(Function::new("main"));
        Self {
            kind,
            functions,
            main,
            regs: RegisterFile::default(),
            reserved_prim_attrs: 0,
            fixed: FixedRegTable::default(),
            arrays: Vec::new(),
            usp_temps: Vec::new(),
            split_point: None,
            feedback_point: None,
            sec_attr_constants: Vec::new(),
            counters: ProgramCounters::default(),
        }
    }

    /// Allocate a fresh virtual temporary.
    pub fn new_temp(&mut self) -> u32 {
        let num = self.regs.temps;
        self.regs.temps += 1;
        num
    }

    /// Allocate `count` consecutive fresh virtual temporaries.
    pub fn new_temps(&mut self, count: u32) -> u32 {
        let base = self.regs.temps;
        self.regs.temps += count;
        base
    }

    /// The main function.
    pub fn main_func(&self) -> &Function {
        &self.functions[self.main]
    }

    /// Get an instruction by program point.
    pub fn inst(&self, pp: ProgramPoint) -> &InstData {
        &self.functions[pp.func].insts[pp.inst]
    }

    /// Total instructions in the layout of every function.
    pub fn num_insts(&self) -> usize {
        self.functions.values().map(|f| f.num_insts()).sum()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (func_ref, func) in self.functions.iter() {
            writeln!(f, "{} \"{}\" {{", func_ref, func.name)?;
            for (block, data) in func.blocks.iter() {
                write!(f, "{}:", block)?;
                if !data.succs.is_empty() {
                    f.write_str(" ->")?;
                    for succ in &data.succs {
                        write!(f, " {}", succ)?;
                    }
                }
                writeln!(f)?;
                for &inst in &data.insts {
                    let marker = match (self.split_point, self.feedback_point) {
                        (Some(pp), _) if pp == ProgramPoint::new(func_ref, inst) => " ; split",
                        (_, Some(pp)) if pp == ProgramPoint::new(func_ref, inst) => " ; feedback",
                        _ => "",
                    };
                    writeln!(f, "    {}: {}{}", inst, func.insts[inst], marker)?;
                }
                if !data.live_out.is_empty() {
                    f.write_str("    ; live-out:")?;
                    for (reg, mask) in &data.live_out {
                        write!(f, " {}{}", reg, channel_suffix(*mask))?;
                    }
                    writeln!(f)?;
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}
