//! Call-site shapes for the two compiler tiers.
//!
//! Both tiers emit the same barrier protocol as [`crate::BarrierSet`]; they differ in where
//! the code goes. The [`baseline`] tier inlines everything and shares one trampoline per
//! barrier for the runtime call. The [`optimizing`] tier inlines only the fast-path test and
//! moves the rest into per-site stubs emitted after the method body.

pub mod baseline;
pub mod optimizing;

pub use baseline::{BaselineBarriers, Trampolines};
pub use optimizing::{
    generate_post_barrier_stub, generate_pre_barrier_stub, BarrierStub, DeferredStubs,
    OptimizingBarriers,
};
