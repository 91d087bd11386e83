/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// log2 of the number of bits in an address
pub const LOG_BITS_IN_ADDRESS: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_ADDRESS as usize;
/// The number of bits in an address
pub const BITS_IN_ADDRESS: usize = 1 << LOG_BITS_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word. Queue cursors move by one word per entry.
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the default region size. Regions are the unit of incremental evacuation.
pub const DEFAULT_LOG_BYTES_IN_REGION: u8 = 20;
/// log2 of the default card size. Cards are the unit of post-barrier change tracking.
pub const DEFAULT_LOG_BYTES_IN_CARD: u8 = 9;
/// The default card size
pub const DEFAULT_BYTES_IN_CARD: usize = 1 << DEFAULT_LOG_BYTES_IN_CARD;

/// The maximum number of arguments a barrier runtime entry takes.
pub const MAX_RUNTIME_ARGS: usize = 3;

static_assertions::const_assert!(DEFAULT_LOG_BYTES_IN_CARD < DEFAULT_LOG_BYTES_IN_REGION);
static_assertions::const_assert_eq!(BYTES_IN_WORD, std::mem::size_of::<usize>());
