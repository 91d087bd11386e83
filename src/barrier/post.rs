//! The card-marking post-barrier.
//!
//! A store that puts a non-null reference to region B into a field in region A makes the
//! card of that field dirty and logs the card, so that A's incoming references can be
//! found from the remembered set of B without scanning the heap. Young regions are scanned
//! in full anyway, so stores into young cards are not logged. Racing threads may dirty and
//! log the same card twice, which is harmless.

use crate::asm::{Label, MacroAssembler, Mem, Reg, RegSet, Width};
use crate::barrier::call::{self, RuntimeTail};
use crate::barrier::fast_path::{self, FencedRecheck};
use crate::barrier::queue::{self, QueueRegs};
use crate::barrier::{BarrierFlags, BarrierKind, BarrierSet, Operand, OperandBindings};
use crate::vm::{QueueKind, RuntimeEntry};

/// The registers of one field post-barrier.
#[derive(Copy, Clone, Debug)]
pub struct PostBarrierRegs {
    pub store_addr: Reg,
    pub new_val: Reg,
    pub thread: Reg,
    /// Holds the card address on the runtime path.
    pub tmp1: Reg,
    pub tmp2: Reg,
}

impl PostBarrierRegs {
    pub fn from_bindings(bs: &BarrierSet, bindings: &OperandBindings) -> Self {
        PostBarrierRegs {
            store_addr: bindings.require(Operand::StoreAddr),
            new_val: bindings.require(Operand::NewVal),
            thread: bindings.thread_or(bs.conventions()),
            tmp1: bindings.require(Operand::Tmp1),
            tmp2: bindings.require(Operand::Tmp2),
        }
    }
}

/// Registers for dirtying and logging a card.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CardLogRegs {
    pub store_addr: Reg,
    pub new_val: Reg,
    pub thread: Reg,
    /// Receives the card address.
    pub card: Reg,
    /// Card value, then queue buffer.
    pub tmp: Reg,
    /// Queue index.
    pub index_tmp: Reg,
}

/// Emit everything after the same-region test: the null test (if the value may be null),
/// the card computation, the young and dirty checks, dirtying and the enqueue. Jumps to
/// `done` when finished, branches to `runtime` with the card address in `regs.card` if the
/// dirty card queue is full.
pub(crate) fn emit_card_logging<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    regs: CardLogRegs,
    may_be_null: bool,
    runtime: Label,
    done: Label,
) {
    let layout = bs.layout();
    let cards = layout.card_values;

    if may_be_null {
        fast_path::null_check(asm, regs.new_val, done);
    }
    fast_path::card_address(asm, layout, regs.store_addr, regs.card, regs.tmp);

    let check = FencedRecheck {
        location: Mem::base(regs.card),
        width: Width::Byte,
        tmp: regs.tmp,
        optimistic_skip: cards.young as usize,
        authoritative_skip: cards.dirty as usize,
    };
    fast_path::fenced_recheck(asm, &check, done, |asm| {
        asm.mov_imm(regs.tmp, cards.dirty as usize);
        asm.store(Width::Byte, regs.tmp, Mem::base(regs.card));
    });

    let queue_regs = QueueRegs {
        thread: regs.thread,
        value: regs.card,
        index_tmp: regs.index_tmp,
        buffer_tmp: regs.tmp,
    };
    queue::enqueue(asm, layout, QueueKind::DirtyCard, queue_regs, runtime);
    asm.jump(done);
}

/// Emit the whole post-barrier inline at the site, with the given runtime path.
pub(crate) fn emit_post_barrier<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    regs: &PostBarrierRegs,
    flags: BarrierFlags,
    tail: RuntimeTail,
) {
    bs.record_site(BarrierKind::Post, &flags);

    let done = asm.new_label();
    let runtime = asm.new_label();

    fast_path::same_region_check(
        asm,
        bs.layout(),
        regs.store_addr,
        regs.new_val,
        regs.tmp1,
        done,
    );
    let log_regs = CardLogRegs {
        store_addr: regs.store_addr,
        new_val: regs.new_val,
        thread: regs.thread,
        card: regs.tmp1,
        tmp: regs.tmp2,
        index_tmp: bs.conventions().scratch1,
    };
    emit_card_logging(bs, asm, log_regs, flags.new_value_may_be_null, runtime, done);

    asm.bind(runtime);
    call::emit_runtime_tail(
        bs,
        asm,
        RuntimeEntry::LogDirtiedCard,
        regs.tmp1,
        regs.thread,
        tail,
    );
    asm.bind(done);
}

/// Emit the post-barrier of a bulk reference array copy: log the whole range with one call.
pub(crate) fn emit_array_post_barrier<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    bindings: &OperandBindings,
    saved: RegSet,
    flags: BarrierFlags,
) {
    let start = bindings.require(Operand::StoreAddr);
    let count = bindings.require(Operand::Count);
    bs.verify(&[start, count, bs.conventions().scratch1, bs.conventions().scratch2]);
    bs.record_site(BarrierKind::ArrayPost, &flags);
    call::call_runtime(
        bs,
        asm,
        RuntimeEntry::LogDirtiedRange,
        &[start, count],
        saved,
        flags.call_style(),
    );
}
