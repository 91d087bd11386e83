use enum_map::{Enum, EnumMap};
use strum_macros::{Display, EnumIter};

use crate::asm::Width;
use crate::util::constants::*;
use crate::util::Address;

/// The two thread-owned queues barrier code inserts into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter, Display)]
pub enum QueueKind {
    /// Overwritten reference values, recorded while marking is active.
    Satb,
    /// Addresses of cards dirtied by cross-region stores.
    DirtyCard,
}

/// Where a queue's fields live in the thread block, as offsets from the thread register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueOffsets {
    /// The byte countdown cursor. Zero means the buffer is full.
    pub index: usize,
    /// The start of the entry storage. Entries live at `buffer + index`.
    pub buffer: usize,
}

/// The width of the per-thread marking-active flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlagWidth {
    Byte,
    Int,
}

impl FlagWidth {
    pub const fn as_width(self) -> Width {
        match self {
            FlagWidth::Byte => Width::Byte,
            FlagWidth::Int => Width::Int,
        }
    }
}

/// Card-table byte values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CardValues {
    pub clean: u8,
    pub dirty: u8,
    /// Cards of young regions. They are never logged because young regions are always
    /// scanned in full.
    pub young: u8,
}

impl Default for CardValues {
    fn default() -> Self {
        CardValues {
            clean: 0xff,
            dirty: 0,
            young: 2,
        }
    }
}

/// The layout constants barrier code is generated against. They are supplied by the
/// collector and only ever read here, never computed.
#[derive(Clone, Debug)]
pub struct BarrierLayout {
    /// Offset of the marking-active flag in the thread block.
    pub marking_active_offset: usize,
    pub marking_active_width: FlagWidth,
    pub queues: EnumMap<QueueKind, QueueOffsets>,
    /// Card address of heap address `a` is `card_table_base + (a >> log_bytes_in_card)`. The
    /// base is biased, so it does not have to lie inside the card table itself.
    pub card_table_base: Address,
    pub log_bytes_in_card: usize,
    pub log_bytes_in_region: usize,
    pub card_values: CardValues,
}

impl BarrierLayout {
    pub fn queue(&self, kind: QueueKind) -> QueueOffsets {
        self.queues[kind]
    }

    pub const fn bytes_in_region(&self) -> usize {
        1 << self.log_bytes_in_region
    }

    pub const fn bytes_in_card(&self) -> usize {
        1 << self.log_bytes_in_card
    }

    /// The card-table byte covering `addr`. This is the same computation the post-barrier emits.
    pub fn card_address(&self, addr: Address) -> Address {
        self.card_table_base + (addr >> self.log_bytes_in_card)
    }

    /// Do the two addresses fall in the same region?
    pub fn in_same_region(&self, a: Address, b: Address) -> bool {
        a.in_same_chunk(b, self.log_bytes_in_region)
    }

    /// Panic if the constants cannot describe a working card table and thread block.
    pub fn validate(&self) {
        assert!(
            self.log_bytes_in_card < self.log_bytes_in_region,
            "cards ({} bytes) must be smaller than regions ({} bytes)",
            self.bytes_in_card(),
            self.bytes_in_region()
        );
        assert!(
            self.log_bytes_in_region < BITS_IN_ADDRESS,
            "region size 2^{} does not fit in an address",
            self.log_bytes_in_region
        );
        assert!(
            !self.card_table_base.is_zero(),
            "card table base is not set"
        );

        let cards = self.card_values;
        assert!(
            cards.clean != cards.dirty && cards.clean != cards.young && cards.dirty != cards.young,
            "card values must be distinct: {:?}",
            cards
        );

        let flag = self.marking_active_offset;
        let flag_bytes = self.marking_active_width.as_width().bytes();
        assert!(
            flag % flag_bytes == 0,
            "marking-active flag at {:#x} is not aligned to its width",
            flag
        );
        for (kind, q) in self.queues.iter() {
            assert!(
                q.index != q.buffer,
                "{} queue index and buffer share offset {:#x}",
                kind,
                q.index
            );
            for field in [q.index, q.buffer] {
                assert!(
                    field % BYTES_IN_WORD == 0,
                    "{} queue field at {:#x} is not word aligned",
                    kind,
                    field
                );
                assert!(
                    flag + flag_bytes <= field || field + BYTES_IN_WORD <= flag,
                    "{} queue field at {:#x} overlaps the marking-active flag",
                    kind,
                    field
                );
            }
        }
        let satb = self.queue(QueueKind::Satb);
        let dirty = self.queue(QueueKind::DirtyCard);
        assert!(
            [satb.index, satb.buffer]
                .iter()
                .all(|f| *f != dirty.index && *f != dirty.buffer),
            "the SATB and dirty card queues overlap"
        );
        debug!("Barrier layout validated: {:?}", self);
    }
}
