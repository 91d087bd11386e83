// Some helpers are only used by some tests.
#![allow(dead_code)]

use std::collections::HashMap;

use crate::asm::*;

/// One recorded [`MacroAssembler`] operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inst {
    Jump { target: Label },
    BranchCmpImm { cond: Cond, reg: Reg, imm: usize, target: Label },
    Mov { dst: Reg, src: Reg },
    MovImm { dst: Reg, imm: usize },
    Lea { dst: Reg, mem: Mem },
    Load { width: Width, dst: Reg, mem: Mem },
    Store { width: Width, src: Reg, mem: Mem },
    LoadReference { dst: Reg, mem: Mem, compressed: bool },
    StoreReference { src: Option<Reg>, mem: Mem, compressed: bool },
    Add { dst: Reg, a: Reg, b: Reg },
    SubImm { dst: Reg, src: Reg, imm: usize },
    Xor { dst: Reg, a: Reg, b: Reg },
    ShrImm { dst: Reg, src: Reg, shift: u32 },
    FenceStoreLoad,
    Push { regs: RegSet },
    Pop { regs: RegSet },
    CallLeaf { entry: CodeEntry, arg_count: usize, style: CallStyle },
    FarCall { entry: CodeEntry },
    Enter,
    Leave,
    StoreParameter { src: Reg, slot: usize },
    LoadParameter { dst: Reg, slot: usize },
    StubPrologue { name: &'static str },
    StubEpilogue,
    /// Stop the machine. Not part of [`MacroAssembler`]; tests put it between a method body and
    /// its deferred stubs.
    Halt,
}

impl Inst {
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Inst::Jump { target } | Inst::BranchCmpImm { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Finished mock code: the instructions and where each label is bound.
#[derive(Clone, Debug, Default)]
pub struct MockCode {
    insts: Vec<Inst>,
    labels: HashMap<Label, usize>,
}

impl MockCode {
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    /// The instruction index a label is bound to.
    pub fn label_position(&self, label: Label) -> usize {
        match self.labels.get(&label) {
            Some(pos) => *pos,
            None => panic!("label {:?} is not bound", label),
        }
    }

    pub fn count<P: Fn(&Inst) -> bool>(&self, pred: P) -> usize {
        self.insts.iter().filter(|i| pred(i)).count()
    }

    pub fn position<P: Fn(&Inst) -> bool>(&self, pred: P) -> Option<usize> {
        self.insts.iter().position(pred)
    }

    pub fn positions<P: Fn(&Inst) -> bool>(&self, pred: P) -> Vec<usize> {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, i)| pred(i))
            .map(|(pos, _)| pos)
            .collect()
    }

    pub fn contains<P: Fn(&Inst) -> bool>(&self, pred: P) -> bool {
        self.insts.iter().any(pred)
    }
}

/// A [`MacroAssembler`] that records what it is asked to emit.
#[derive(Debug, Default)]
pub struct MockAssembler {
    name: Option<&'static str>,
    code: MockCode,
    next_label: u32,
}

impl MockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &'static str) -> Self {
        MockAssembler {
            name: Some(name),
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn emit(&mut self, inst: Inst) {
        self.code.insts.push(inst);
    }

    pub fn halt(&mut self) {
        self.emit(Inst::Halt);
    }

    /// The instructions emitted so far.
    pub fn insts(&self) -> &[Inst] {
        &self.code.insts
    }

    /// Check every branch target is bound and hand out the code.
    pub fn finish(self) -> MockCode {
        for inst in &self.code.insts {
            if let Some(target) = inst.branch_target() {
                assert!(
                    self.code.labels.contains_key(&target),
                    "branch to unbound label {:?} in {:?}",
                    target,
                    inst
                );
            }
        }
        self.code
    }
}

impl MacroAssembler for MockAssembler {
    fn new_label(&mut self) -> Label {
        self.next_label += 1;
        Label::new(self.next_label)
    }

    fn bind(&mut self, label: Label) {
        let pos = self.code.insts.len();
        let previous = self.code.labels.insert(label, pos);
        assert!(previous.is_none(), "label {:?} bound twice", label);
    }

    fn jump(&mut self, target: Label) {
        self.emit(Inst::Jump { target });
    }

    fn branch_cmp_imm(&mut self, cond: Cond, reg: Reg, imm: usize, target: Label) {
        self.emit(Inst::BranchCmpImm {
            cond,
            reg,
            imm,
            target,
        });
    }

    fn mov(&mut self, dst: Reg, src: Reg) {
        self.emit(Inst::Mov { dst, src });
    }

    fn mov_imm(&mut self, dst: Reg, imm: usize) {
        self.emit(Inst::MovImm { dst, imm });
    }

    fn lea(&mut self, dst: Reg, mem: Mem) {
        self.emit(Inst::Lea { dst, mem });
    }

    fn load(&mut self, width: Width, dst: Reg, mem: Mem) {
        self.emit(Inst::Load { width, dst, mem });
    }

    fn store(&mut self, width: Width, src: Reg, mem: Mem) {
        self.emit(Inst::Store { width, src, mem });
    }

    fn load_reference(&mut self, dst: Reg, mem: Mem, compressed: bool) {
        self.emit(Inst::LoadReference {
            dst,
            mem,
            compressed,
        });
    }

    fn store_reference(&mut self, src: Option<Reg>, mem: Mem, compressed: bool) {
        self.emit(Inst::StoreReference {
            src,
            mem,
            compressed,
        });
    }

    fn add(&mut self, dst: Reg, a: Reg, b: Reg) {
        self.emit(Inst::Add { dst, a, b });
    }

    fn sub_imm(&mut self, dst: Reg, src: Reg, imm: usize) {
        self.emit(Inst::SubImm { dst, src, imm });
    }

    fn xor(&mut self, dst: Reg, a: Reg, b: Reg) {
        self.emit(Inst::Xor { dst, a, b });
    }

    fn shr_imm(&mut self, dst: Reg, src: Reg, shift: u32) {
        self.emit(Inst::ShrImm { dst, src, shift });
    }

    fn fence_store_load(&mut self) {
        self.emit(Inst::FenceStoreLoad);
    }

    fn push(&mut self, regs: RegSet) {
        self.emit(Inst::Push { regs });
    }

    fn pop(&mut self, regs: RegSet) {
        self.emit(Inst::Pop { regs });
    }

    fn call_leaf(&mut self, entry: CodeEntry, arg_count: usize, style: CallStyle) {
        self.emit(Inst::CallLeaf {
            entry,
            arg_count,
            style,
        });
    }

    fn far_call(&mut self, entry: CodeEntry) {
        self.emit(Inst::FarCall { entry });
    }

    fn enter(&mut self) {
        self.emit(Inst::Enter);
    }

    fn leave(&mut self) {
        self.emit(Inst::Leave);
    }

    fn store_parameter(&mut self, src: Reg, slot: usize) {
        self.emit(Inst::StoreParameter { src, slot });
    }

    fn load_parameter(&mut self, dst: Reg, slot: usize) {
        self.emit(Inst::LoadParameter { dst, slot });
    }

    fn stub_prologue(&mut self, name: &'static str) {
        self.emit(Inst::StubPrologue { name });
    }

    fn stub_epilogue(&mut self) {
        self.emit(Inst::StubEpilogue);
    }
}

/// A code cache for standalone stubs. Each installed stub gets its own entry address.
#[derive(Debug, Default)]
pub struct MockCodeCache {
    blobs: Vec<(&'static str, CodeEntry, MockCode)>,
}

/// Where the first installed stub goes. Stubs are 4KB apart.
pub const CODE_CACHE_START: usize = 0x7000_0000;

impl MockCodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn blobs(&self) -> impl Iterator<Item = (&'static str, CodeEntry, &MockCode)> {
        self.blobs.iter().map(|(n, e, c)| (*n, *e, c))
    }

    pub fn get(&self, entry: CodeEntry) -> Option<&MockCode> {
        self.blobs
            .iter()
            .find(|(_, e, _)| *e == entry)
            .map(|(_, _, c)| c)
    }
}

impl CodeInstaller for MockCodeCache {
    type Asm = MockAssembler;

    fn new_stub(&mut self, name: &'static str) -> MockAssembler {
        MockAssembler::named(name)
    }

    fn install(&mut self, name: &'static str, asm: MockAssembler) -> CodeEntry {
        assert_eq!(asm.name(), Some(name));
        let entry = CodeEntry::new(crate::util::Address::from_usize(
            CODE_CACHE_START + self.blobs.len() * 0x1000,
        ));
        self.blobs.push((name, entry, asm.finish()));
        entry
    }
}
