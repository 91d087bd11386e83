use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

/// size in bytes
pub type ByteSize = usize;
/// offset in byte
pub type ByteOffset = isize;

/// Address represents an arbitrary address in the program's address space: a heap
/// location, a card-table byte, a thread-local block, or the entry of a piece of code.
/// The barrier generator never dereferences an `Address` itself. It only embeds
/// addresses as immediates into emitted code and does arithmetic on them, so the
/// constructors are safe. This type needs to be zero overhead (memory wise and time wise).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit, Default)]
pub struct Address(usize);

/// Address + ByteSize (positive)
impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

/// Address + ByteOffset (positive or negative)
impl Add<ByteOffset> for Address {
    type Output = Address;
    fn add(self, offset: ByteOffset) -> Address {
        Address((self.0 as isize + offset) as usize)
    }
}

/// Address - ByteSize (positive)
impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// Address ^ Address. The result is no longer an address, but a bit pattern
/// whose high bits tell whether two addresses share an aligned chunk.
impl BitXor<Address> for Address {
    type Output = usize;
    fn bitxor(self, other: Address) -> usize {
        self.0 ^ other.0
    }
}

/// Address >> shift (get an index)
impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Address {
    /// The lowest possible address.
    pub const ZERO: Self = Address(0);

    /// creates an arbitrary Address
    pub const fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// is this address zero?
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// aligns up the address to the given alignment
    pub const fn align_up(self, align: ByteSize) -> Address {
        use crate::util::conversions;
        Address(conversions::raw_align_up(self.0, align))
    }

    /// aligns down the address to the given alignment
    pub const fn align_down(self, align: ByteSize) -> Address {
        use crate::util::conversions;
        Address(conversions::raw_align_down(self.0, align))
    }

    /// is this address aligned to the given alignment
    pub const fn is_aligned_to(self, align: usize) -> bool {
        use crate::util::conversions;
        conversions::raw_is_aligned(self.0, align)
    }

    /// Do `self` and `other` fall in the same naturally aligned chunk of `1 << log_bytes` bytes?
    /// This is the region-cross test the post-barrier emits.
    pub const fn in_same_chunk(self, other: Address, log_bytes: usize) -> bool {
        (self.0 ^ other.0) >> log_bytes == 0
    }

    /// converts the Address to a pointer-sized integer
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// allows Display format the Address (as lower-case hex value with 0x prefix)
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// allows Debug format the Address (as lower-case hex value with 0x prefix)
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
