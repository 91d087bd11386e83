/// Panic if any two of the given registers are the same.
#[macro_export]
macro_rules! assert_different_registers {
    ($($reg:expr),+ $(,)?) => {
        $crate::asm::reg::assert_different(&[$($reg),+])
    };
}

use std::fmt;
use std::ops::{BitAnd, BitOr, Sub};

use crate::util::constants::MAX_RUNTIME_ARGS;

/// The number of general purpose registers a [`RegSet`] can describe.
pub const NUM_REGISTERS: usize = 32;

/// A general purpose register of the target, identified by its encoding.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const fn new(encoding: u8) -> Self {
        assert!((encoding as usize) < NUM_REGISTERS, "register encoding out of range");
        Reg(encoding)
    }

    pub const fn encoding(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A set of registers, e.g. the registers live across a call site.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RegSet(u32);

impl RegSet {
    pub const fn empty() -> Self {
        RegSet(0)
    }

    pub fn of(regs: &[Reg]) -> Self {
        regs.iter().fold(Self::empty(), |set, r| set.with(*r))
    }

    /// All registers from `first` to `last`, inclusive.
    pub fn range(first: Reg, last: Reg) -> Self {
        debug_assert!(first <= last);
        (first.0..=last.0).fold(Self::empty(), |set, r| set.with(Reg(r)))
    }

    pub const fn with(self, reg: Reg) -> Self {
        RegSet(self.0 | (1 << reg.0))
    }

    pub const fn without(self, reg: Reg) -> Self {
        RegSet(self.0 & !(1 << reg.0))
    }

    pub const fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << reg.0) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the registers in ascending encoding order. Pushes store in this order,
    /// pops restore in the reverse order.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = Reg> {
        (0..NUM_REGISTERS as u8)
            .filter(move |r| self.0 & (1 << r) != 0)
            .map(Reg)
    }
}

impl BitOr for RegSet {
    type Output = RegSet;
    fn bitor(self, other: RegSet) -> RegSet {
        RegSet(self.0 | other.0)
    }
}

impl BitAnd for RegSet {
    type Output = RegSet;
    fn bitand(self, other: RegSet) -> RegSet {
        RegSet(self.0 & other.0)
    }
}

impl Sub for RegSet {
    type Output = RegSet;
    fn sub(self, other: RegSet) -> RegSet {
        RegSet(self.0 & !other.0)
    }
}

impl FromIterator<Reg> for RegSet {
    fn from_iter<I: IntoIterator<Item = Reg>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, r| set.with(r))
    }
}

impl fmt::Debug for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The register conventions of the embedding compiler that emitted barrier code has to
/// respect. They are fixed for the lifetime of a [`crate::BarrierSet`].
#[derive(Clone, Debug)]
pub struct RegisterConventions {
    /// Holds the current thread's block. Never clobbered by calls.
    pub thread: Reg,
    /// Free for the barrier's own use at any point; never allocated to program values.
    pub scratch1: Reg,
    pub scratch2: Reg,
    /// Argument registers for runtime calls, in order.
    pub args: [Reg; MAX_RUNTIME_ARGS],
    /// Registers a runtime call may overwrite.
    pub call_clobbered: RegSet,
}

impl RegisterConventions {
    /// A 64-bit ARM flavoured convention: arguments in r0-r2, scratch r8/r9, thread in r28,
    /// r0-r18 clobbered by calls.
    pub fn aarch64() -> Self {
        RegisterConventions {
            thread: Reg::new(28),
            scratch1: Reg::new(8),
            scratch2: Reg::new(9),
            args: [Reg::new(0), Reg::new(1), Reg::new(2)],
            call_clobbered: RegSet::range(Reg::new(0), Reg::new(18)),
        }
    }

    pub fn arg(&self, i: usize) -> Reg {
        self.args[i]
    }

    pub fn scratch(&self) -> RegSet {
        RegSet::of(&[self.scratch1, self.scratch2])
    }

    /// Check the convention is usable for barrier code.
    pub fn validate(&self) {
        assert_different_registers!(self.thread, self.scratch1, self.scratch2);
        assert_different(&self.args);
        assert!(
            !self.call_clobbered.contains(self.thread),
            "thread register {} must survive calls",
            self.thread
        );
        for arg in self.args {
            assert!(
                self.call_clobbered.contains(arg),
                "argument register {} must be call-clobbered",
                arg
            );
            assert!(
                !self.scratch().contains(arg),
                "argument register {} cannot be a scratch register",
                arg
            );
        }
    }
}

impl Default for RegisterConventions {
    fn default() -> Self {
        Self::aarch64()
    }
}

/// Panic if any two registers in `regs` are the same.
pub fn assert_different(regs: &[Reg]) {
    for (i, a) in regs.iter().enumerate() {
        for b in &regs[i + 1..] {
            assert!(a != b, "register {} is bound twice in {:?}", a, regs);
        }
    }
}
