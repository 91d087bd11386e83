//! The SATB pre-barrier.
//!
//! While concurrent marking is active, every reference about to be overwritten is recorded
//! in the thread's SATB queue, so that marking still sees the object graph as it was when
//! the cycle started.

use crate::asm::{Label, MacroAssembler, Mem, Reg, RegSet};
use crate::barrier::call::{self, RuntimeTail};
use crate::barrier::fast_path;
use crate::barrier::queue::{self, QueueRegs};
use crate::barrier::{BarrierFlags, BarrierKind, BarrierSet, Operand, OperandBindings};
use crate::vm::{QueueKind, RuntimeEntry};

/// The registers of one field pre-barrier.
#[derive(Copy, Clone, Debug)]
pub struct PreBarrierRegs {
    /// Field to load the previous value from. `None` if `pre_val` already holds it.
    pub obj: Option<Reg>,
    pub pre_val: Reg,
    pub thread: Reg,
    pub tmp1: Reg,
    pub tmp2: Reg,
}

impl PreBarrierRegs {
    pub fn from_bindings(bs: &BarrierSet, bindings: &OperandBindings) -> Self {
        let regs = PreBarrierRegs {
            obj: bindings.get(Operand::Obj),
            pre_val: bindings.require(Operand::PreVal),
            thread: bindings.thread_or(bs.conventions()),
            tmp1: bindings.require(Operand::Tmp1),
            tmp2: bindings.require(Operand::Tmp2),
        };
        let mut all = vec![regs.pre_val, regs.thread, regs.tmp1, regs.tmp2];
        all.extend(regs.obj);
        bs.verify(&all);
        regs
    }
}

/// Emit the slow path: load the previous value if needed, skip null, insert into the SATB
/// queue and jump to `done`. Branches to `runtime` if the queue is full.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_slow_path<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    obj: Option<Reg>,
    pre_val: Reg,
    queue_regs: QueueRegs,
    compressed: bool,
    runtime: Label,
    done: Label,
) {
    if let Some(obj) = obj {
        asm.load_reference(pre_val, Mem::base(obj), compressed);
    }
    fast_path::null_check(asm, pre_val, done);
    queue::enqueue(asm, bs.layout(), QueueKind::Satb, queue_regs, runtime);
    asm.jump(done);
}

/// Emit the whole pre-barrier inline at the site, with the given runtime path. The site is
/// counted as `kind`.
pub(crate) fn emit_pre_barrier<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    regs: &PreBarrierRegs,
    flags: BarrierFlags,
    kind: BarrierKind,
    tail: RuntimeTail,
) {
    if flags.destination_uninitialized {
        return;
    }
    bs.record_site(kind, &flags);

    let done = asm.new_label();
    let runtime = asm.new_label();

    fast_path::marking_active_check(asm, bs.layout(), regs.thread, regs.tmp1, done);
    let queue_regs = QueueRegs {
        thread: regs.thread,
        value: regs.pre_val,
        index_tmp: regs.tmp1,
        buffer_tmp: regs.tmp2,
    };
    emit_slow_path(
        bs,
        asm,
        regs.obj,
        regs.pre_val,
        queue_regs,
        flags.compressed_references,
        runtime,
        done,
    );

    asm.bind(runtime);
    call::emit_runtime_tail(
        bs,
        asm,
        RuntimeEntry::LogPreviousValue,
        regs.pre_val,
        regs.thread,
        tail,
    );
    asm.bind(done);
}

/// Emit the pre-barrier for a reference array about to be overwritten in bulk: one marking
/// check, then one runtime call covering the whole range.
pub(crate) fn emit_array_pre_barrier<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    bindings: &OperandBindings,
    saved: RegSet,
    flags: BarrierFlags,
) {
    if flags.destination_uninitialized {
        return;
    }
    let conv = bs.conventions();
    let start = bindings.require(Operand::StoreAddr);
    let count = bindings.require(Operand::Count);
    let thread = bindings.thread_or(conv);
    bs.verify(&[start, count, thread, conv.scratch1, conv.scratch2]);
    bs.record_site(BarrierKind::ArrayPre, &flags);

    let done = asm.new_label();
    fast_path::marking_active_check(asm, bs.layout(), thread, conv.scratch1, done);
    call::call_runtime(
        bs,
        asm,
        RuntimeEntry::previous_value_range(flags.compressed_references),
        &[start, count, thread],
        saved,
        flags.call_style(),
    );
    asm.bind(done);
}
