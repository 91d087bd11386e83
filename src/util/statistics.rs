use std::sync::atomic::{AtomicUsize, Ordering};

use enum_map::EnumMap;
use strum::IntoEnumIterator;

use crate::barrier::BarrierKind;

/// Counts of emitted barrier code, kept when the `count_sites` option is on.
///
/// Code generation may run on several compiler threads at once, so the counters are atomics.
/// They are only ever read for reporting, so relaxed ordering is enough.
#[derive(Default)]
pub struct BarrierStats {
    sites: EnumMap<BarrierKind, AtomicUsize>,
    trampolines: AtomicUsize,
    deferred_stubs: AtomicUsize,
}

impl BarrierStats {
    pub fn record_site(&self, kind: BarrierKind) {
        self.sites[kind].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trampoline(&self) {
        self.trampolines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_stub(&self) {
        self.deferred_stubs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sites(&self, kind: BarrierKind) -> usize {
        self.sites[kind].load(Ordering::Relaxed)
    }

    pub fn total_sites(&self) -> usize {
        self.sites.values().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn trampolines(&self) -> usize {
        self.trampolines.load(Ordering::Relaxed)
    }

    pub fn deferred_stubs(&self) -> usize {
        self.deferred_stubs.load(Ordering::Relaxed)
    }

    /// A one-table summary, in the same tab separated shape for every run so it can be diffed.
    pub fn report(&self) -> String {
        let mut header = String::new();
        let mut values = String::new();
        for kind in BarrierKind::iter() {
            header.push_str(&format!("{}\t", kind));
            values.push_str(&format!("{}\t", self.sites(kind)));
        }
        header.push_str("trampolines\tdeferred_stubs");
        values.push_str(&format!("{}\t{}", self.trampolines(), self.deferred_stubs()));
        format!("{}\n{}", header, values)
    }
}
