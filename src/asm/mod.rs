//! The instruction-emission interface barrier code is generated against.
//!
//! Encoding instructions is the embedding compiler's business. The barrier generator only
//! needs a small macro-assembler vocabulary: moves, loads and stores, a few ALU operations,
//! compare-and-branch, a store-load fence, register-set push/pop and calls. Each compiler
//! tier implements [`MacroAssembler`] for its own code buffer.

#[macro_use]
pub mod reg;

use std::fmt;

use crate::util::Address;
pub use reg::{Reg, RegSet, RegisterConventions};

/// A branch target within one code buffer. Labels are created by [`MacroAssembler::new_label`],
/// may be branched to before they are bound, and are bound exactly once.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Label(u32);

impl Label {
    pub const fn new(id: u32) -> Self {
        Label(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

/// The entry point of a piece of code outside the code buffer being assembled: a runtime
/// function or a shared trampoline.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CodeEntry(Address);

impl CodeEntry {
    pub const fn new(addr: Address) -> Self {
        CodeEntry(addr)
    }

    pub const fn address(self) -> Address {
        self.0
    }
}

impl fmt::Display for CodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The width of a memory access. Loads zero-extend into the full register.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Width {
    Byte,
    Int,
    Word,
}

impl Width {
    pub const fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Int => 4,
            Width::Word => crate::util::constants::BYTES_IN_WORD,
        }
    }
}

/// A memory operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mem {
    /// `base + offset`
    Base { base: Reg, offset: isize },
    /// `base + index`
    Indexed { base: Reg, index: Reg },
}

impl Mem {
    /// `[base]`
    pub const fn base(base: Reg) -> Self {
        Mem::Base { base, offset: 0 }
    }

    /// `[base + offset]`
    pub const fn at(base: Reg, offset: isize) -> Self {
        Mem::Base { base, offset }
    }

    /// `[base + index]`
    pub const fn indexed(base: Reg, index: Reg) -> Self {
        Mem::Indexed { base, index }
    }

    /// The registers the operand reads.
    pub fn registers(&self) -> RegSet {
        match *self {
            Mem::Base { base, .. } => RegSet::of(&[base]),
            Mem::Indexed { base, index } => RegSet::of(&[base, index]),
        }
    }
}

/// Branch conditions for compare-and-branch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Cond {
    Eq,
    Ne,
}

/// How a leaf call into the runtime is emitted.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CallStyle {
    /// The site has a complete call frame; the assembler may verify frame state around the call.
    Checked,
    /// The site may be frame-less (e.g. inside a reference load barrier); emit the bare call
    /// sequence with no frame bookkeeping.
    Expanded,
}

/// The primitives barrier code is emitted with.
///
/// Implementations must emit exactly the operation asked for: barrier code relies on
/// unlisted registers and memory being left alone. The only allowed side effect beyond the
/// described one is that a compressed [`MacroAssembler::store_reference`] may overwrite its
/// source register with the encoded value.
pub trait MacroAssembler {
    fn new_label(&mut self) -> Label;
    fn bind(&mut self, label: Label);

    /// Unconditional branch.
    fn jump(&mut self, target: Label);
    /// Compare `reg` with `imm` and branch to `target` if `cond` holds.
    fn branch_cmp_imm(&mut self, cond: Cond, reg: Reg, imm: usize, target: Label);

    fn mov(&mut self, dst: Reg, src: Reg);
    fn mov_imm(&mut self, dst: Reg, imm: usize);
    /// Materialize the effective address of `mem` in `dst`.
    fn lea(&mut self, dst: Reg, mem: Mem);

    fn load(&mut self, width: Width, dst: Reg, mem: Mem);
    fn store(&mut self, width: Width, src: Reg, mem: Mem);
    /// Load a reference, decoding it when `compressed`.
    fn load_reference(&mut self, dst: Reg, mem: Mem, compressed: bool);
    /// Store a reference, encoding it when `compressed`. `None` stores null.
    fn store_reference(&mut self, src: Option<Reg>, mem: Mem, compressed: bool);

    fn add(&mut self, dst: Reg, a: Reg, b: Reg);
    fn sub_imm(&mut self, dst: Reg, src: Reg, imm: usize);
    fn xor(&mut self, dst: Reg, a: Reg, b: Reg);
    /// Logical shift right.
    fn shr_imm(&mut self, dst: Reg, src: Reg, shift: u32);

    /// Order earlier stores before later loads.
    fn fence_store_load(&mut self);

    fn push(&mut self, regs: RegSet);
    fn pop(&mut self, regs: RegSet);

    /// Call a runtime function with `arg_count` arguments already in the argument registers.
    fn call_leaf(&mut self, entry: CodeEntry, arg_count: usize, style: CallStyle);
    /// Call code that may be out of direct branch range, e.g. a shared trampoline.
    fn far_call(&mut self, entry: CodeEntry);

    fn enter(&mut self);
    fn leave(&mut self);

    /// Pass a value to an out-of-line stub through its parameter area.
    fn store_parameter(&mut self, src: Reg, slot: usize);
    /// Read a value passed by [`MacroAssembler::store_parameter`], from inside the stub.
    fn load_parameter(&mut self, dst: Reg, slot: usize);

    /// Start a standalone stub. Everything up to [`MacroAssembler::stub_epilogue`] forms its body.
    fn stub_prologue(&mut self, name: &'static str);
    /// Return from a standalone stub.
    fn stub_epilogue(&mut self);
}

/// Turns freshly assembled standalone code into callable code.
///
/// The process-wide trampolines are generated through this interface once, at start-up.
pub trait CodeInstaller {
    type Asm: MacroAssembler;

    fn new_stub(&mut self, name: &'static str) -> Self::Asm;
    fn install(&mut self, name: &'static str, asm: Self::Asm) -> CodeEntry;
}
