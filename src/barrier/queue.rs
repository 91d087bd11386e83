//! Insertion into a thread-owned queue buffer.
//!
//! A queue is a pair of fields in the thread block: a byte index that counts down to zero,
//! and a pointer to the entry storage. Entries are written back to front, so the first
//! entry lands at the top of the buffer and `index == 0` means the buffer is full. Only the
//! owning thread touches the fields outside of pauses and handshakes, so no atomics are
//! needed.

use crate::asm::{Cond, Label, MacroAssembler, Mem, Reg, Width};
use crate::util::constants::BYTES_IN_WORD;
use crate::vm::{BarrierLayout, QueueKind};

/// Registers used by [`enqueue`].
#[derive(Copy, Clone, Debug)]
pub struct QueueRegs {
    pub thread: Reg,
    /// The entry to insert. Not modified.
    pub value: Reg,
    /// Clobbered.
    pub index_tmp: Reg,
    /// Clobbered.
    pub buffer_tmp: Reg,
}

/// Emit an insertion of `regs.value` into the `kind` queue of the thread.
///
/// Falls through after a successful insertion. If the buffer is full, branches to `full`
/// without having written to the queue fields or the buffer.
pub fn enqueue<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    kind: QueueKind,
    regs: QueueRegs,
    full: Label,
) {
    assert_different_registers!(regs.thread, regs.value, regs.index_tmp, regs.buffer_tmp);
    let queue = layout.queue(kind);
    let index = Mem::at(regs.thread, queue.index as isize);
    let buffer = Mem::at(regs.thread, queue.buffer as isize);

    asm.load(Width::Word, regs.index_tmp, index);
    asm.branch_cmp_imm(Cond::Eq, regs.index_tmp, 0, full);
    asm.sub_imm(regs.index_tmp, regs.index_tmp, BYTES_IN_WORD);
    asm.store(Width::Word, regs.index_tmp, index);
    asm.load(Width::Word, regs.buffer_tmp, buffer);
    asm.store(
        Width::Word,
        regs.value,
        Mem::indexed(regs.buffer_tmp, regs.index_tmp),
    );
}
