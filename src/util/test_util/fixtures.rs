// Not every test uses every helper.
#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};
use enum_map::enum_map;
use memoffset::offset_of;

use crate::asm::{CodeEntry, Reg, RegisterConventions};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::options::Options;
use crate::util::test_util::mock_asm::MockCodeCache;
use crate::util::test_util::mock_machine::MockMachine;
use crate::util::Address;
use crate::vm::*;
use crate::BarrierSet;

/// The thread block of the simulated mutator thread.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MockThreadBlock {
    /// Read as a byte or an int, depending on the layout. Little-endian, so both see 1 as set.
    pub marking_active: u32,
    _pad: u32,
    pub satb_index: usize,
    pub satb_buffer: usize,
    pub dirty_card_index: usize,
    pub dirty_card_buffer: usize,
}

pub const THREAD_BLOCK: Address = Address::from_usize(0x1000_0000);
pub const SATB_BUFFER: Address = Address::from_usize(0x2000_0000);
pub const DIRTY_CARD_BUFFER: Address = Address::from_usize(0x2100_0000);
pub const QUEUE_CAPACITY: usize = 8;
pub const QUEUE_CAPACITY_BYTES: usize = QUEUE_CAPACITY * BYTES_IN_WORD;

pub const LOG_REGION_BYTES: usize = 12;
pub const REGION_BYTES: usize = 1 << LOG_REGION_BYTES;
pub const LOG_CARD_BYTES: usize = 9;
pub const HEAP_START: Address = Address::from_usize(0x4000_0000);
pub const HEAP_REGIONS: usize = 16;
pub const HEAP_BYTES: usize = HEAP_REGIONS * REGION_BYTES;
/// The first card of the heap.
pub const CARD_TABLE: Address = Address::from_usize(0x3000_0000);
pub const CARDS: usize = HEAP_BYTES >> LOG_CARD_BYTES;

pub const RUNTIME_START: usize = 0x6000_0000;

pub const CLEAN_CARD: u8 = 0xff;
pub const DIRTY_CARD: u8 = 0;
pub const YOUNG_CARD: u8 = 2;

pub const THREAD_REG: Reg = Reg::new(28);

/// `offset` bytes into heap region `region`.
pub fn heap_address(region: usize, offset: usize) -> Address {
    assert!(region < HEAP_REGIONS && offset < REGION_BYTES);
    HEAP_START + region * REGION_BYTES + offset
}

/// Runtime entries at made-up addresses the mock machine recognizes.
pub fn runtime_entries() -> RuntimeEntries {
    RuntimeEntries::from_fn(|e| CodeEntry::new(Address::from_usize(RUNTIME_START + e as usize * 0x10)))
}

pub fn layout(flag_width: FlagWidth) -> BarrierLayout {
    BarrierLayout {
        marking_active_offset: offset_of!(MockThreadBlock, marking_active),
        marking_active_width: flag_width,
        queues: enum_map! {
            QueueKind::Satb => QueueOffsets {
                index: offset_of!(MockThreadBlock, satb_index),
                buffer: offset_of!(MockThreadBlock, satb_buffer),
            },
            QueueKind::DirtyCard => QueueOffsets {
                index: offset_of!(MockThreadBlock, dirty_card_index),
                buffer: offset_of!(MockThreadBlock, dirty_card_buffer),
            },
        },
        card_table_base: CARD_TABLE - (HEAP_START.as_usize() >> LOG_CARD_BYTES),
        log_bytes_in_card: LOG_CARD_BYTES,
        log_bytes_in_region: LOG_REGION_BYTES,
        card_values: CardValues {
            clean: CLEAN_CARD,
            dirty: DIRTY_CARD,
            young: YOUNG_CARD,
        },
    }
}

/// A barrier set over a small simulated heap, and machines to run its code on.
pub struct BarrierFixture {
    pub bs: BarrierSet,
    pub code_cache: MockCodeCache,
}

impl BarrierFixture {
    pub fn new() -> Self {
        Self::with_flag_width(FlagWidth::Byte)
    }

    pub fn with_flag_width(width: FlagWidth) -> Self {
        Self::build(width, Options::builtin_defaults())
    }

    pub fn with_options(options: Options) -> Self {
        Self::build(FlagWidth::Byte, options)
    }

    fn build(width: FlagWidth, options: Options) -> Self {
        BarrierFixture {
            bs: BarrierSet::new(
                layout(width),
                runtime_entries(),
                RegisterConventions::aarch64(),
                options,
            ),
            code_cache: MockCodeCache::new(),
        }
    }

    pub fn layout(&self) -> &BarrierLayout {
        self.bs.layout()
    }

    pub fn conventions(&self) -> &RegisterConventions {
        self.bs.conventions()
    }

    /// Generate the baseline trampolines into this fixture's code cache.
    pub fn generate_trampolines(&mut self) {
        self.bs.generate_trampolines(&mut self.code_cache);
    }

    /// A machine with marking off, empty queues, all cards clean and the thread register
    /// set. Stubs in the code cache are callable.
    pub fn machine(&self) -> MockMachine {
        let mut m = MockMachine::new(self.conventions().clone(), runtime_entries());
        m.memory
            .map(THREAD_BLOCK, std::mem::size_of::<MockThreadBlock>());
        m.memory.map(SATB_BUFFER, QUEUE_CAPACITY_BYTES);
        m.memory.map(DIRTY_CARD_BUFFER, QUEUE_CAPACITY_BYTES);
        m.memory.map(CARD_TABLE, CARDS);
        m.memory.map(HEAP_START, HEAP_BYTES);

        let thread = MockThreadBlock {
            marking_active: 0,
            _pad: 0,
            satb_index: QUEUE_CAPACITY_BYTES,
            satb_buffer: SATB_BUFFER.as_usize(),
            dirty_card_index: QUEUE_CAPACITY_BYTES,
            dirty_card_buffer: DIRTY_CARD_BUFFER.as_usize(),
        };
        m.memory.write_pod(THREAD_BLOCK, &thread);
        for i in 0..CARDS {
            m.memory.write_byte(CARD_TABLE + i, CLEAN_CARD);
        }
        m.set_reg(self.conventions().thread, THREAD_BLOCK.as_usize());
        m.load_stubs(&self.code_cache);
        m
    }

    pub fn set_marking(&self, m: &mut MockMachine, active: bool) {
        let layout = self.layout();
        let addr = THREAD_BLOCK + layout.marking_active_offset;
        m.memory.write(addr, layout.marking_active_width.as_width().bytes(), active as usize);
    }

    fn queue_field(&self, kind: QueueKind) -> Address {
        THREAD_BLOCK + self.layout().queue(kind).index
    }

    pub fn queue_index(&self, m: &MockMachine, kind: QueueKind) -> usize {
        m.memory.read_word(self.queue_field(kind))
    }

    pub fn set_queue_index(&self, m: &mut MockMachine, kind: QueueKind, index: usize) {
        m.memory.write_word(self.queue_field(kind), index);
    }

    pub fn queue_buffer(&self, kind: QueueKind) -> Address {
        match kind {
            QueueKind::Satb => SATB_BUFFER,
            QueueKind::DirtyCard => DIRTY_CARD_BUFFER,
        }
    }

    /// The queued entries, newest first.
    pub fn queue_entries(&self, m: &MockMachine, kind: QueueKind) -> Vec<usize> {
        let buffer = self.queue_buffer(kind);
        (self.queue_index(m, kind)..QUEUE_CAPACITY_BYTES)
            .step_by(BYTES_IN_WORD)
            .map(|i| m.memory.read_word(buffer + i))
            .collect()
    }

    /// The card value covering `addr`.
    pub fn card(&self, m: &MockMachine, addr: Address) -> u8 {
        m.memory.read_byte(self.layout().card_address(addr))
    }

    pub fn set_card(&self, m: &mut MockMachine, addr: Address, value: u8) {
        m.memory.write_byte(self.layout().card_address(addr), value);
    }

    /// The whole card table, for checking that nothing was written to it.
    pub fn card_table(&self) -> std::ops::Range<Address> {
        CARD_TABLE..CARD_TABLE + CARDS
    }
}

impl Default for BarrierFixture {
    fn default() -> Self {
        Self::new()
    }
}
