//! Barriers for the optimizing compiler.
//!
//! At the store site only the fast-path test is emitted, followed by a branch to an
//! out-of-line stub. The stub holds the slow path and the runtime call, and is emitted
//! after the method body when the compiler flushes its [`DeferredStubs`]. Each stub records
//! the registers the site's register allocation chose, and the registers live across the
//! site, so the runtime call saves only what is actually live.

use crate::asm::{Label, MacroAssembler, Reg, RegSet};
use crate::barrier::call::{self, RuntimeTail};
use crate::barrier::fast_path;
use crate::barrier::post::{self, CardLogRegs};
use crate::barrier::pre;
use crate::barrier::queue::QueueRegs;
use crate::barrier::{BarrierFlags, BarrierKind, BarrierSet, Operand, OperandBindings};
use crate::vm::RuntimeEntry;

/// The out-of-line part of one pre-barrier site.
#[derive(Debug)]
pub struct PreBarrierStub {
    entry: Label,
    continuation: Label,
    /// Field to load the previous value from, or `None` if `pre_val` holds it.
    obj: Option<Reg>,
    pre_val: Reg,
    thread: Reg,
    live: RegSet,
    flags: BarrierFlags,
}

/// The out-of-line part of one post-barrier site.
#[derive(Debug)]
pub struct PostBarrierStub {
    entry: Label,
    continuation: Label,
    store_addr: Reg,
    new_val: Reg,
    thread: Reg,
    tmp1: Reg,
    tmp2: Reg,
    live: RegSet,
    flags: BarrierFlags,
}

#[derive(Debug)]
pub enum BarrierStub {
    Pre(PreBarrierStub),
    Post(PostBarrierStub),
}

impl BarrierStub {
    /// Where the site branches when its fast path fails.
    pub fn entry(&self) -> Label {
        match self {
            BarrierStub::Pre(stub) => stub.entry,
            BarrierStub::Post(stub) => stub.entry,
        }
    }

    /// Where the stub resumes the method.
    pub fn continuation(&self) -> Label {
        match self {
            BarrierStub::Pre(stub) => stub.continuation,
            BarrierStub::Post(stub) => stub.continuation,
        }
    }

    /// The registers the site needs preserved across the stub.
    pub fn live(&self) -> RegSet {
        match self {
            BarrierStub::Pre(stub) => stub.live,
            BarrierStub::Post(stub) => stub.live,
        }
    }
}

/// The barrier stubs of one compiled method that still have to be emitted.
///
/// Stubs are consumed when they are emitted, so none can be emitted twice. Dropping a
/// non-empty list is a bug in the compiler, as the sites would branch to unbound labels.
#[derive(Debug, Default)]
pub struct DeferredStubs {
    stubs: Vec<BarrierStub>,
}

impl DeferredStubs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn stubs(&self) -> &[BarrierStub] {
        &self.stubs
    }

    fn push(&mut self, bs: &BarrierSet, stub: BarrierStub) {
        self.stubs.push(stub);
        if self.stubs.len() == bs.options().stub_warning_threshold {
            warn!(
                "{} barrier stubs are pending for one method",
                self.stubs.len()
            );
        }
        if bs.options().count_sites {
            bs.stats().record_deferred_stub();
        }
    }

    /// Emit every pending stub, in the order the sites were emitted.
    pub fn emit_all<A: MacroAssembler>(mut self, bs: &BarrierSet, asm: &mut A) {
        let stubs = std::mem::take(&mut self.stubs);
        debug!("Emitting {} deferred barrier stubs", stubs.len());
        for stub in stubs {
            match stub {
                BarrierStub::Pre(stub) => generate_pre_barrier_stub(bs, asm, stub),
                BarrierStub::Post(stub) => generate_post_barrier_stub(bs, asm, stub),
            }
        }
    }
}

impl Drop for DeferredStubs {
    fn drop(&mut self) {
        if !self.stubs.is_empty() && !std::thread::panicking() {
            panic!("{} barrier stubs were never emitted", self.stubs.len());
        }
    }
}

/// Emit the slow and runtime paths of a pre-barrier site.
///
/// Uses both scratch registers for the queue insertion. The runtime call saves
/// `live & call_clobbered` and continues at the site's continuation label.
pub fn generate_pre_barrier_stub<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    stub: PreBarrierStub,
) {
    let conv = bs.conventions();
    let runtime = asm.new_label();
    asm.bind(stub.entry);
    let queue_regs = QueueRegs {
        thread: stub.thread,
        value: stub.pre_val,
        index_tmp: conv.scratch1,
        buffer_tmp: conv.scratch2,
    };
    pre::emit_slow_path(
        bs,
        asm,
        stub.obj,
        stub.pre_val,
        queue_regs,
        stub.flags.compressed_references,
        runtime,
        stub.continuation,
    );

    asm.bind(runtime);
    call::emit_runtime_tail(
        bs,
        asm,
        RuntimeEntry::LogPreviousValue,
        stub.pre_val,
        stub.thread,
        RuntimeTail::Call {
            saved: stub.live & conv.call_clobbered,
            style: stub.flags.call_style(),
        },
    );
    asm.jump(stub.continuation);
}

/// Emit the slow and runtime paths of a post-barrier site.
///
/// Uses the first scratch register for the queue index. The runtime call saves
/// `live & call_clobbered` and continues at the site's continuation label.
pub fn generate_post_barrier_stub<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    stub: PostBarrierStub,
) {
    let conv = bs.conventions();
    let runtime = asm.new_label();
    asm.bind(stub.entry);
    let log_regs = CardLogRegs {
        store_addr: stub.store_addr,
        new_val: stub.new_val,
        thread: stub.thread,
        card: stub.tmp1,
        tmp: stub.tmp2,
        index_tmp: conv.scratch1,
    };
    post::emit_card_logging(
        bs,
        asm,
        log_regs,
        stub.flags.new_value_may_be_null,
        runtime,
        stub.continuation,
    );

    asm.bind(runtime);
    call::emit_runtime_tail(
        bs,
        asm,
        RuntimeEntry::LogDirtiedCard,
        stub.tmp1,
        stub.thread,
        RuntimeTail::Call {
            saved: stub.live & conv.call_clobbered,
            style: stub.flags.call_style(),
        },
    );
    asm.jump(stub.continuation);
}

/// Emits optimizing-tier barriers. Obtained from [`BarrierSet::optimizing`].
pub struct OptimizingBarriers<'a> {
    bs: &'a BarrierSet,
}

impl<'a> OptimizingBarriers<'a> {
    pub(crate) fn new(bs: &'a BarrierSet) -> Self {
        OptimizingBarriers { bs }
    }

    /// Emit the marking check of a pre-barrier and defer the rest to a stub.
    ///
    /// Operands: `PreVal`, `Tmp1` (for the flag), optionally `Obj` and `Thread`. `live` are the
    /// registers holding values needed after the site. None of the operands may be a scratch
    /// register.
    pub fn pre_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        stubs: &mut DeferredStubs,
        bindings: &OperandBindings,
        live: RegSet,
        flags: BarrierFlags,
    ) {
        if flags.destination_uninitialized {
            return;
        }
        let conv = self.bs.conventions();
        let obj = bindings.get(Operand::Obj);
        let pre_val = bindings.require(Operand::PreVal);
        let thread = bindings.thread_or(conv);
        let tmp = bindings.require(Operand::Tmp1);
        let mut all = vec![pre_val, thread, tmp, conv.scratch1, conv.scratch2];
        all.extend(obj);
        self.bs.verify(&all);
        self.bs.record_site(BarrierKind::Pre, &flags);

        let entry = asm.new_label();
        let continuation = asm.new_label();
        fast_path::marking_active_branch(asm, self.bs.layout(), thread, tmp, entry);
        asm.bind(continuation);

        stubs.push(
            self.bs,
            BarrierStub::Pre(PreBarrierStub {
                entry,
                continuation,
                obj,
                pre_val,
                thread,
                live,
                flags,
            }),
        );
    }

    /// Emit the same-region test of a post-barrier and defer the rest to a stub.
    ///
    /// Operands: `StoreAddr`, `NewVal`, `Tmp1`, `Tmp2`, optionally `Thread`. `live` are the
    /// registers holding values needed after the site. None of the operands may be the first
    /// scratch register.
    pub fn post_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        stubs: &mut DeferredStubs,
        bindings: &OperandBindings,
        live: RegSet,
        flags: BarrierFlags,
    ) {
        let conv = self.bs.conventions();
        let store_addr = bindings.require(Operand::StoreAddr);
        let new_val = bindings.require(Operand::NewVal);
        let thread = bindings.thread_or(conv);
        let tmp1 = bindings.require(Operand::Tmp1);
        let tmp2 = bindings.require(Operand::Tmp2);
        self.bs
            .verify(&[store_addr, new_val, thread, tmp1, tmp2, conv.scratch1]);
        self.bs.record_site(BarrierKind::Post, &flags);

        let entry = asm.new_label();
        let continuation = asm.new_label();
        fast_path::cross_region_branch(asm, self.bs.layout(), store_addr, new_val, tmp1, entry);
        asm.bind(continuation);

        stubs.push(
            self.bs,
            BarrierStub::Post(PostBarrierStub {
                entry,
                continuation,
                store_addr,
                new_val,
                thread,
                tmp1,
                tmp2,
                live,
                flags,
            }),
        );
    }
}
