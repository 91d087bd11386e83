use enum_map::{Enum, EnumMap};
use strum_macros::{Display, EnumIter};

use crate::asm::CodeEntry;

/// The collector functions barrier code calls when a thread-owned buffer is full.
///
/// They run synchronously on the calling thread, must not allocate and must not start a
/// pause, because they are entered from arbitrary, possibly frame-less, points in compiled code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter, Display)]
pub enum RuntimeEntry {
    /// `log_previous_value(value, thread)`
    LogPreviousValue,
    /// `log_dirtied_card(card_address, thread)`
    LogDirtiedCard,
    /// `log_previous_value_range(start, count, thread)` for uncompressed reference arrays.
    LogPreviousValueRange,
    /// `log_previous_value_range(start, count, thread)` for compressed reference arrays.
    LogPreviousNarrowValueRange,
    /// `log_dirtied_range(start, count)` after a bulk reference-array copy.
    LogDirtiedRange,
}

impl RuntimeEntry {
    /// The number of arguments the entry takes.
    pub const fn arity(self) -> usize {
        match self {
            RuntimeEntry::LogPreviousValue => 2,
            RuntimeEntry::LogDirtiedCard => 2,
            RuntimeEntry::LogPreviousValueRange => 3,
            RuntimeEntry::LogPreviousNarrowValueRange => 3,
            RuntimeEntry::LogDirtiedRange => 2,
        }
    }

    /// The previous-value range entry matching the reference encoding.
    pub const fn previous_value_range(compressed: bool) -> Self {
        if compressed {
            RuntimeEntry::LogPreviousNarrowValueRange
        } else {
            RuntimeEntry::LogPreviousValueRange
        }
    }
}

/// The addresses of all runtime entries, supplied by the collector.
#[derive(Clone, Debug)]
pub struct RuntimeEntries(EnumMap<RuntimeEntry, CodeEntry>);

impl RuntimeEntries {
    pub fn new(entries: EnumMap<RuntimeEntry, CodeEntry>) -> Self {
        RuntimeEntries(entries)
    }

    /// Build the table by asking `f` for each entry.
    pub fn from_fn<F: FnMut(RuntimeEntry) -> CodeEntry>(f: F) -> Self {
        RuntimeEntries(EnumMap::from_fn(f))
    }

    pub fn get(&self, entry: RuntimeEntry) -> CodeEntry {
        self.0[entry]
    }

    /// Find which entry lives at `code`, if any.
    pub fn lookup(&self, code: CodeEntry) -> Option<RuntimeEntry> {
        self.0.iter().find(|(_, c)| **c == code).map(|(e, _)| e)
    }

    pub fn validate(&self) {
        for (entry, code) in self.0.iter() {
            assert!(
                !code.address().is_zero(),
                "runtime entry {} has no address",
                entry
            );
        }
    }
}
