//! Write-barrier code generation for a region-based, concurrently marking garbage collector.
//!
//! Compiled code calls into this crate at every reference store, every bulk reference-array
//! copy and every load of a weak or phantom referent. The crate emits the barrier code for
//! the site through the compiler's [`asm::MacroAssembler`]:
//!
//! * an SATB pre-barrier that records overwritten references while marking is active, and
//! * a card-marking post-barrier that logs cross-region stores for the remembered sets.
//!
//! The collector describes its thread block, card table and runtime entry points with a
//! [`vm::BarrierLayout`] and [`vm::RuntimeEntries`], and builds one [`BarrierSet`] for the
//! process. Each compiler tier then picks a call-site shape: the interpreter shape on
//! [`BarrierSet`] itself, [`tier::BaselineBarriers`] (everything inline, shared trampolines)
//! or [`tier::OptimizingBarriers`] (inline fast path, deferred out-of-line stubs).
//!
//! Logging goes through the `log` crate. With the default `builtin_env_logger` feature,
//! [`util::logger::try_init`] installs `env_logger`.

#[cfg(any(test, feature = "mock_test"))]
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

#[macro_use]
pub mod asm;
pub mod barrier;
pub mod tier;
pub mod util;
pub mod vm;

pub use crate::barrier::{
    BarrierFlags, BarrierKind, BarrierSet, Operand, OperandBindings, ReferenceStrength,
};
