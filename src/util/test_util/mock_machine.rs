// Some helpers are only used by some tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;

use crate::asm::reg::NUM_REGISTERS;
use crate::asm::*;
use crate::util::test_util::mock_asm::{Inst, MockCode, MockCodeCache};
use crate::util::Address;
use crate::vm::{RuntimeEntries, RuntimeEntry};

/// The value call-clobbered registers hold after a runtime call.
pub const POISON: usize = 0xdead_beef_usize;

/// The most instructions one [`MockMachine::run`] executes. Barrier code never loops, so
/// hitting this is a bug.
const STEP_LIMIT: usize = 100_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One memory access made by executed code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub kind: AccessKind,
    pub addr: Address,
    pub bytes: usize,
}

impl Access {
    pub fn overlaps(&self, range: &Range<Address>) -> bool {
        self.addr < range.end && range.start < self.addr + self.bytes
    }
}

/// Sparse, little-endian simulated memory. Only mapped ranges can be accessed; they read as
/// zero until written.
#[derive(Clone, Debug, Default)]
pub struct MockMemory {
    mapped: Vec<Range<Address>>,
    bytes: HashMap<Address, u8>,
    accesses: Vec<Access>,
}

impl MockMemory {
    pub fn map(&mut self, start: Address, bytes: usize) {
        self.mapped.push(start..start + bytes);
    }

    fn check_mapped(&self, addr: Address, bytes: usize) {
        assert!(
            self.mapped
                .iter()
                .any(|r| r.start <= addr && addr + bytes <= r.end),
            "access to unmapped memory at {} ({} bytes)",
            addr,
            bytes
        );
    }

    /// Read without recording an access.
    pub fn read(&self, addr: Address, bytes: usize) -> usize {
        self.check_mapped(addr, bytes);
        (0..bytes).rev().fold(0usize, |v, i| {
            (v << 8) | *self.bytes.get(&(addr + i)).unwrap_or(&0) as usize
        })
    }

    /// Write without recording an access.
    pub fn write(&mut self, addr: Address, bytes: usize, value: usize) {
        self.check_mapped(addr, bytes);
        for i in 0..bytes {
            self.bytes.insert(addr + i, (value >> (8 * i)) as u8);
        }
    }

    pub fn read_word(&self, addr: Address) -> usize {
        self.read(addr, Width::Word.bytes())
    }

    pub fn write_word(&mut self, addr: Address, value: usize) {
        self.write(addr, Width::Word.bytes(), value)
    }

    pub fn read_byte(&self, addr: Address) -> u8 {
        self.read(addr, 1) as u8
    }

    pub fn write_byte(&mut self, addr: Address, value: u8) {
        self.write(addr, 1, value as usize)
    }

    /// Copy a plain-old-data value into memory.
    pub fn write_pod<T: bytemuck::NoUninit>(&mut self, addr: Address, value: &T) {
        for (i, b) in bytemuck::bytes_of(value).iter().enumerate() {
            self.write_byte(addr + i, *b);
        }
    }

    fn load(&mut self, addr: Address, bytes: usize) -> usize {
        self.accesses.push(Access {
            kind: AccessKind::Read,
            addr,
            bytes,
        });
        self.read(addr, bytes)
    }

    fn store(&mut self, addr: Address, bytes: usize, value: usize) {
        self.accesses.push(Access {
            kind: AccessKind::Write,
            addr,
            bytes,
        });
        self.write(addr, bytes, value)
    }

    /// Every access made by executed code, in order.
    pub fn accesses(&self) -> &[Access] {
        &self.accesses
    }

    pub fn writes(&self) -> Vec<Access> {
        self.accesses
            .iter()
            .filter(|a| a.kind == AccessKind::Write)
            .copied()
            .collect()
    }

    /// Did executed code touch `range` at all?
    pub fn touched(&self, range: &Range<Address>) -> bool {
        self.accesses.iter().any(|a| a.overlaps(range))
    }

    pub fn clear_accesses(&mut self) {
        self.accesses.clear();
    }
}

/// A runtime call made by executed code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeCall {
    pub entry: RuntimeEntry,
    pub args: Vec<usize>,
    pub style: CallStyle,
}

/// Which code is executing: the program handed to `run`, or an installed stub.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CodeRef {
    Program,
    Stub(CodeEntry),
}

/// Executes [`MockCode`] against simulated registers and memory.
///
/// Runtime calls are recorded, not executed, and overwrite every call-clobbered register
/// with [`POISON`], so barrier code that fails to save a register is caught. Far calls
/// enter stubs installed in a [`MockCodeCache`].
pub struct MockMachine {
    regs: [usize; NUM_REGISTERS],
    pub memory: MockMemory,
    stack: Vec<usize>,
    params: [usize; 4],
    frames: usize,
    fences: usize,
    runtime_calls: Vec<RuntimeCall>,
    far_calls: Vec<CodeEntry>,
    conventions: RegisterConventions,
    runtime: RuntimeEntries,
    stubs: HashMap<CodeEntry, MockCode>,
}

impl MockMachine {
    pub fn new(conventions: RegisterConventions, runtime: RuntimeEntries) -> Self {
        MockMachine {
            regs: [0; NUM_REGISTERS],
            memory: MockMemory::default(),
            stack: vec![],
            params: [0; 4],
            frames: 0,
            fences: 0,
            runtime_calls: vec![],
            far_calls: vec![],
            conventions,
            runtime,
            stubs: HashMap::new(),
        }
    }

    /// Make the stubs of `cache` callable.
    pub fn load_stubs(&mut self, cache: &MockCodeCache) {
        for (_, entry, code) in cache.blobs() {
            self.stubs.insert(entry, code.clone());
        }
    }

    pub fn reg(&self, r: Reg) -> usize {
        self.regs[r.encoding()]
    }

    pub fn set_reg(&mut self, r: Reg, value: usize) {
        self.regs[r.encoding()] = value;
    }

    pub fn runtime_calls(&self) -> &[RuntimeCall] {
        &self.runtime_calls
    }

    pub fn far_calls(&self) -> &[CodeEntry] {
        &self.far_calls
    }

    pub fn fences(&self) -> usize {
        self.fences
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn address(&self, mem: Mem) -> Address {
        match mem {
            Mem::Base { base, offset } => Address::from_usize(self.reg(base)) + offset,
            Mem::Indexed { base, index } => {
                Address::from_usize(self.reg(base).wrapping_add(self.reg(index)))
            }
        }
    }

    fn code<'a>(&'a self, program: &'a MockCode, at: CodeRef) -> &'a MockCode {
        match at {
            CodeRef::Program => program,
            CodeRef::Stub(entry) => &self.stubs[&entry],
        }
    }

    /// Run `program` from its first instruction until it falls off the end or halts.
    pub fn run(&mut self, program: &MockCode) {
        let mut at = CodeRef::Program;
        let mut pc = 0;
        let mut returns: Vec<(CodeRef, usize)> = vec![];
        let stack_at_entry = self.stack.len();

        for _ in 0..STEP_LIMIT {
            let Some(inst) = self.code(program, at).insts().get(pc).cloned() else {
                assert_eq!(at, CodeRef::Program, "fell off the end of a stub");
                break;
            };
            pc += 1;
            let target_of = |m: &Self, label: Label| m.code(program, at).label_position(label);
            match inst {
                Inst::Halt => break,
                Inst::Jump { target } => pc = target_of(self, target),
                Inst::BranchCmpImm {
                    cond,
                    reg,
                    imm,
                    target,
                } => {
                    let equal = self.reg(reg) == imm;
                    let taken = match cond {
                        Cond::Eq => equal,
                        Cond::Ne => !equal,
                    };
                    if taken {
                        pc = target_of(self, target);
                    }
                }
                Inst::Mov { dst, src } => self.set_reg(dst, self.reg(src)),
                Inst::MovImm { dst, imm } => self.set_reg(dst, imm),
                Inst::Lea { dst, mem } => {
                    let addr = self.address(mem);
                    self.set_reg(dst, addr.as_usize());
                }
                Inst::Load { width, dst, mem } => {
                    let addr = self.address(mem);
                    let v = self.memory.load(addr, width.bytes());
                    self.set_reg(dst, v);
                }
                Inst::Store { width, src, mem } => {
                    let addr = self.address(mem);
                    self.memory.store(addr, width.bytes(), self.reg(src));
                }
                Inst::LoadReference {
                    dst,
                    mem,
                    compressed,
                } => {
                    let addr = self.address(mem);
                    let v = if compressed {
                        decode(self.memory.load(addr, 4))
                    } else {
                        self.memory.load(addr, Width::Word.bytes())
                    };
                    self.set_reg(dst, v);
                }
                Inst::StoreReference {
                    src,
                    mem,
                    compressed,
                } => {
                    let addr = self.address(mem);
                    let v = src.map(|r| self.reg(r)).unwrap_or(0);
                    if compressed {
                        let encoded = encode(v);
                        // Encoding happens in place.
                        if let Some(r) = src {
                            self.set_reg(r, encoded);
                        }
                        self.memory.store(addr, 4, encoded);
                    } else {
                        self.memory.store(addr, Width::Word.bytes(), v);
                    }
                }
                Inst::Add { dst, a, b } => self.set_reg(dst, self.reg(a).wrapping_add(self.reg(b))),
                Inst::SubImm { dst, src, imm } => self.set_reg(dst, self.reg(src).wrapping_sub(imm)),
                Inst::Xor { dst, a, b } => self.set_reg(dst, self.reg(a) ^ self.reg(b)),
                Inst::ShrImm { dst, src, shift } => self.set_reg(dst, self.reg(src) >> shift),
                Inst::FenceStoreLoad => self.fences += 1,
                Inst::Push { regs } => {
                    for r in regs.iter() {
                        self.stack.push(self.reg(r));
                    }
                }
                Inst::Pop { regs } => {
                    for r in regs.iter().rev() {
                        let v = self.stack.pop().expect("pop from an empty stack");
                        self.set_reg(r, v);
                    }
                }
                Inst::CallLeaf {
                    entry,
                    arg_count,
                    style,
                } => self.call_runtime(entry, arg_count, style),
                Inst::FarCall { entry } => {
                    assert!(self.stubs.contains_key(&entry), "far call to unknown code {}", entry);
                    self.far_calls.push(entry);
                    returns.push((at, pc));
                    at = CodeRef::Stub(entry);
                    pc = 0;
                }
                Inst::Enter => self.frames += 1,
                Inst::Leave => {
                    assert!(self.frames > 0, "leave without enter");
                    self.frames -= 1;
                }
                Inst::StoreParameter { src, slot } => self.params[slot] = self.reg(src),
                Inst::LoadParameter { dst, slot } => self.set_reg(dst, self.params[slot]),
                Inst::StubPrologue { .. } => {
                    assert!(matches!(at, CodeRef::Stub(_)), "stub prologue outside a stub")
                }
                Inst::StubEpilogue => {
                    let (ret_at, ret_pc) = returns.pop().expect("stub epilogue without a caller");
                    at = ret_at;
                    pc = ret_pc;
                }
            }
            if self.code(program, at).insts().len() < pc {
                panic!("pc {} out of range", pc);
            }
        }
        assert!(returns.is_empty(), "stopped inside a stub");
        assert_eq!(self.frames, 0, "unbalanced enter/leave");
        assert_eq!(self.stack.len(), stack_at_entry, "unbalanced push/pop");
    }

    fn call_runtime(&mut self, entry: CodeEntry, arg_count: usize, style: CallStyle) {
        let Some(runtime_entry) = self.runtime.lookup(entry) else {
            panic!("call to {} which is not a runtime entry", entry);
        };
        assert_eq!(arg_count, runtime_entry.arity(), "{} arity", runtime_entry);
        let args = (0..arg_count)
            .map(|i| self.reg(self.conventions.arg(i)))
            .collect();
        self.runtime_calls.push(RuntimeCall {
            entry: runtime_entry,
            args,
            style,
        });
        for r in self.conventions.call_clobbered.iter() {
            self.set_reg(r, POISON);
        }
    }
}

/// Compressed references are the address shifted right by 3, in 32 bits.
pub fn encode(v: usize) -> usize {
    let encoded = v >> 3;
    assert!(encoded <= u32::MAX as usize, "{:#x} cannot be compressed", v);
    encoded
}

pub fn decode(v: usize) -> usize {
    v << 3
}
