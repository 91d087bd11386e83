//! Barrier code generation for a region-based, concurrently marking collector.
//!
//! Two barriers guard every reference store:
//!
//! * The *pre-barrier* keeps the snapshot-at-the-beginning (SATB) invariant while marking is
//!   active: the value about to be overwritten is recorded in the thread's SATB queue.
//! * The *post-barrier* keeps the remembered sets complete: a store that creates a
//!   cross-region reference dirties the card of the stored-to field and records the card
//!   in the thread's dirty card queue.
//!
//! Both are built from three layers: a fast path that is always inline, a slow path that
//! inserts into a thread-owned queue, and a runtime path that calls into the collector when
//! the queue is full. [`BarrierSet`] emits them in the interpreter shape, with the runtime
//! call made directly at the site. The compiler tiers in [`crate::tier`] reuse the same
//! pieces with different call-site shapes.

pub mod access;
pub mod call;
pub mod fast_path;
pub mod post;
pub mod pre;
pub mod queue;

use enum_map::{Enum, EnumMap};
use strum_macros::{Display, EnumIter};

use crate::asm::{CallStyle, CodeEntry, CodeInstaller, MacroAssembler, Reg, RegSet, RegisterConventions};
use crate::tier::baseline::{self, BaselineBarriers, Trampolines};
use crate::tier::optimizing::OptimizingBarriers;
use crate::util::options::Options;
use crate::util::statistics::BarrierStats;
use crate::vm::{BarrierLayout, RuntimeEntries, RuntimeEntry};

pub use access::ReferenceStrength;
use call::RuntimeTail;

/// The kinds of barrier code the generator emits, for statistics and logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BarrierKind {
    Pre,
    ArrayPre,
    Post,
    ArrayPost,
    ReferenceLoad,
}

/// The symbolic operands of barrier code. A call site binds each operand it uses to a
/// register with [`OperandBindings`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter, Display)]
pub enum Operand {
    /// Address of the reference field the previous value is loaded from. Leave it unbound
    /// when the previous value is already in `PreVal`.
    Obj,
    /// The overwritten value.
    PreVal,
    /// The value being stored.
    NewVal,
    /// Address of the field stored to, or the start of a reference array.
    StoreAddr,
    /// The thread register. Defaults to the convention's thread register when unbound.
    Thread,
    Tmp1,
    Tmp2,
    Tmp3,
    /// Number of elements of a reference array.
    Count,
}

/// Which register holds each operand at one barrier site.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OperandBindings(EnumMap<Operand, Option<Reg>>);

impl OperandBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`OperandBindings::bind`].
    pub fn with(mut self, operand: Operand, reg: Reg) -> Self {
        self.bind(operand, reg);
        self
    }

    pub fn bind(&mut self, operand: Operand, reg: Reg) {
        self.0[operand] = Some(reg);
    }

    pub fn get(&self, operand: Operand) -> Option<Reg> {
        self.0[operand]
    }

    /// The register bound to `operand`. Panics if the operand is unbound.
    pub fn require(&self, operand: Operand) -> Reg {
        match self.0[operand] {
            Some(reg) => reg,
            None => panic!("barrier operand {} is not bound", operand),
        }
    }

    pub(crate) fn thread_or(&self, conventions: &RegisterConventions) -> Reg {
        self.get(Operand::Thread).unwrap_or(conventions.thread)
    }

    /// All bound registers.
    pub fn registers(&self) -> RegSet {
        self.0.values().flatten().copied().collect()
    }
}

/// Per-site configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarrierFlags {
    /// The destination is freshly allocated and has never been observed, so there is no
    /// previous value to record. Pre-barriers emit nothing.
    pub destination_uninitialized: bool,
    /// When false, the post-barrier omits its null test.
    pub new_value_may_be_null: bool,
    /// References are stored in compressed form.
    pub compressed_references: bool,
    /// The site has a full call frame, so runtime calls may use the checked call sequence.
    pub has_call_frame: bool,
}

impl Default for BarrierFlags {
    fn default() -> Self {
        BarrierFlags {
            destination_uninitialized: false,
            new_value_may_be_null: true,
            compressed_references: false,
            has_call_frame: true,
        }
    }
}

impl BarrierFlags {
    pub fn from_options(options: &Options) -> Self {
        BarrierFlags {
            compressed_references: options.compressed_references,
            ..Default::default()
        }
    }

    pub(crate) fn call_style(&self) -> CallStyle {
        if self.has_call_frame {
            CallStyle::Checked
        } else {
            CallStyle::Expanded
        }
    }
}

/// The barrier code generator. One instance serves every compiler of the process.
pub struct BarrierSet {
    layout: BarrierLayout,
    runtime: RuntimeEntries,
    conventions: RegisterConventions,
    options: Options,
    stats: BarrierStats,
    trampolines: spin::Once<Trampolines>,
}

impl BarrierSet {
    /// Validate the collector's constants and create the generator.
    pub fn new(
        layout: BarrierLayout,
        runtime: RuntimeEntries,
        conventions: RegisterConventions,
        options: Options,
    ) -> Self {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("The barrier generator initialized the logger."),
            Err(_) => debug!(
                "The barrier generator failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        layout.validate();
        runtime.validate();
        conventions.validate();
        info!(
            "Barrier set: regions of {} bytes, cards of {} bytes, card table base {}",
            layout.bytes_in_region(),
            layout.bytes_in_card(),
            layout.card_table_base
        );
        BarrierSet {
            layout,
            runtime,
            conventions,
            options,
            stats: BarrierStats::default(),
            trampolines: spin::Once::new(),
        }
    }

    pub fn layout(&self) -> &BarrierLayout {
        &self.layout
    }

    pub fn conventions(&self) -> &RegisterConventions {
        &self.conventions
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn stats(&self) -> &BarrierStats {
        &self.stats
    }

    pub(crate) fn runtime_entry(&self, entry: RuntimeEntry) -> CodeEntry {
        self.runtime.get(entry)
    }

    pub(crate) fn record_site(&self, kind: BarrierKind, flags: &BarrierFlags) {
        trace!("Emitting {} barrier with {:?}", kind, flags);
        if self.options.count_sites {
            self.stats.record_site(kind);
        }
    }

    pub(crate) fn verify(&self, regs: &[Reg]) {
        if self.options.verify_operands {
            crate::asm::reg::assert_different(regs);
        }
    }

    /// Generate the shared trampolines of the baseline tier. Only the first call generates
    /// code; later calls return the trampolines that already exist.
    pub fn generate_trampolines<I: CodeInstaller>(&self, installer: &mut I) -> &Trampolines {
        self.trampolines
            .call_once(|| baseline::generate_trampolines(self, installer))
    }

    pub fn trampolines(&self) -> Option<&Trampolines> {
        self.trampolines.get()
    }

    /// The baseline tier's barriers. Panics if the trampolines have not been generated.
    pub fn baseline(&self) -> BaselineBarriers<'_> {
        match self.trampolines.get() {
            Some(trampolines) => BaselineBarriers::new(self, trampolines),
            None => panic!("baseline barriers requested before the trampolines were generated"),
        }
    }

    /// The optimizing tier's barriers.
    pub fn optimizing(&self) -> OptimizingBarriers<'_> {
        OptimizingBarriers::new(self)
    }

    /// Emit the SATB pre-barrier for a reference field store.
    ///
    /// Operands: `PreVal`, `Tmp1`, `Tmp2`, optionally `Obj` (the field address; when bound the
    /// previous value is loaded from it into `PreVal`) and `Thread`. Every call-clobbered
    /// register is preserved across the runtime call.
    pub fn pre_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        bindings: &OperandBindings,
        flags: BarrierFlags,
    ) {
        let regs = pre::PreBarrierRegs::from_bindings(self, bindings);
        let tail = RuntimeTail::Call {
            saved: self.conventions.call_clobbered,
            style: flags.call_style(),
        };
        pre::emit_pre_barrier(self, asm, &regs, flags, BarrierKind::Pre, tail);
    }

    /// Emit the SATB pre-barrier for a whole reference array about to be overwritten by a bulk copy.
    ///
    /// Operands: `StoreAddr` (array start) and `Count`. `saved` are the registers the caller
    /// needs preserved across the runtime call.
    pub fn array_pre_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        bindings: &OperandBindings,
        saved: RegSet,
        flags: BarrierFlags,
    ) {
        pre::emit_array_pre_barrier(self, asm, bindings, saved, flags);
    }

    /// Emit the card-marking post-barrier for a reference field store.
    ///
    /// Operands: `StoreAddr`, `NewVal`, `Tmp1`, `Tmp2`, optionally `Thread`. Only `StoreAddr`
    /// is preserved across the runtime call; the other operands are dead after the barrier.
    pub fn post_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        bindings: &OperandBindings,
        flags: BarrierFlags,
    ) {
        let regs = post::PostBarrierRegs::from_bindings(self, bindings);
        self.verify(&[
            regs.store_addr,
            regs.new_val,
            regs.thread,
            regs.tmp1,
            regs.tmp2,
            self.conventions.scratch1,
        ]);
        let tail = RuntimeTail::Call {
            saved: RegSet::of(&[regs.store_addr]),
            style: flags.call_style(),
        };
        post::emit_post_barrier(self, asm, &regs, flags, tail);
    }

    /// Emit the post-barrier for a bulk reference array copy.
    ///
    /// Operands: `StoreAddr` (array start) and `Count`.
    pub fn array_post_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        bindings: &OperandBindings,
        saved: RegSet,
        flags: BarrierFlags,
    ) {
        post::emit_array_post_barrier(self, asm, bindings, saved, flags);
    }

    /// See [`access::load_reference_at`].
    pub fn load_reference_at<A: MacroAssembler>(
        &self,
        asm: &mut A,
        strength: ReferenceStrength,
        dst: Reg,
        src: crate::asm::Mem,
        bindings: &OperandBindings,
        flags: BarrierFlags,
    ) {
        access::load_reference_at(self, asm, strength, dst, src, bindings, flags);
    }

    /// See [`access::store_reference_at`].
    pub fn store_reference_at<A: MacroAssembler>(
        &self,
        asm: &mut A,
        dst: crate::asm::Mem,
        bindings: &OperandBindings,
        flags: BarrierFlags,
    ) {
        access::store_reference_at(self, asm, dst, bindings, flags);
    }
}
