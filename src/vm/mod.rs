//! What the barrier generator reads from the collector: the layout of the thread block and
//! card table, and the addresses of the runtime functions barrier code calls.

pub mod layout;
pub mod runtime;


pub use layout::{BarrierLayout, CardValues, FlagWidth, QueueKind, QueueOffsets};
pub use runtime::{RuntimeEntries, RuntimeEntry};
