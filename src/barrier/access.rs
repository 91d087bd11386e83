//! Whole reference accesses with their barriers, in the shape the interpreter uses them.

use crate::asm::{MacroAssembler, Mem, Reg};
use crate::barrier::call::RuntimeTail;
use crate::barrier::post::{self, PostBarrierRegs};
use crate::barrier::pre::{self, PreBarrierRegs};
use crate::barrier::{BarrierFlags, BarrierKind, BarrierSet, Operand, OperandBindings};

/// The strength of a reference being loaded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReferenceStrength {
    Strong,
    /// The referent of a weak reference object.
    Weak,
    /// The referent of a phantom reference object.
    Phantom,
}

impl ReferenceStrength {
    /// Loading the referent of a weak or phantom reference makes it strongly reachable, so
    /// during marking the loaded value has to be recorded like an overwritten one.
    pub const fn needs_keep_alive(self) -> bool {
        !matches!(self, ReferenceStrength::Strong)
    }
}

/// Load the reference at `src` into `dst`.
///
/// For weak and phantom referents, the loaded value is then passed through the SATB
/// pre-barrier inside its own frame, with `dst` as the previous value and the bare call
/// sequence, since the site need not have a complete frame. Operands: `Tmp1`, `Tmp2`,
/// optionally `Thread`.
pub fn load_reference_at<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    strength: ReferenceStrength,
    dst: Reg,
    src: Mem,
    bindings: &OperandBindings,
    flags: BarrierFlags,
) {
    asm.load_reference(dst, src, flags.compressed_references);
    if !strength.needs_keep_alive() {
        return;
    }
    let regs = PreBarrierRegs {
        obj: None,
        pre_val: dst,
        thread: bindings.thread_or(bs.conventions()),
        tmp1: bindings.require(Operand::Tmp1),
        tmp2: bindings.require(Operand::Tmp2),
    };
    bs.verify(&[regs.pre_val, regs.thread, regs.tmp1, regs.tmp2]);
    let flags = BarrierFlags {
        destination_uninitialized: false,
        has_call_frame: false,
        ..flags
    };

    asm.enter();
    let tail = RuntimeTail::Call {
        saved: bs.conventions().call_clobbered,
        style: flags.call_style(),
    };
    pre::emit_pre_barrier(bs, asm, &regs, flags, BarrierKind::ReferenceLoad, tail);
    asm.leave();
}

/// Store a reference to the field at `dst`, with both barriers.
///
/// The destination address is first flattened into `Tmp3`, which then serves as the field
/// address of the pre-barrier and the store address of the post-barrier. `NewVal` holds the
/// value to store; when it is unbound, null is stored and the post-barrier is omitted.
/// Operands: `Tmp1`, `Tmp2`, `Tmp3`, optionally `NewVal` and `Thread`. Both scratch
/// registers are clobbered. When the dirty card queue is full the post-barrier's runtime
/// call saves only `Tmp3`, so `NewVal`, `Tmp1`, `Tmp2` and every other call-clobbered
/// register may also be clobbered on that path, as for [`BarrierSet::post_barrier`].
pub fn store_reference_at<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    dst: Mem,
    bindings: &OperandBindings,
    flags: BarrierFlags,
) {
    let conv = bs.conventions();
    let thread = bindings.thread_or(conv);
    let tmp1 = bindings.require(Operand::Tmp1);
    let tmp2 = bindings.require(Operand::Tmp2);
    let tmp3 = bindings.require(Operand::Tmp3);
    let val = bindings.get(Operand::NewVal);
    let mut all = vec![thread, tmp1, tmp2, tmp3, conv.scratch1, conv.scratch2];
    all.extend(val);
    bs.verify(&all);

    match dst {
        Mem::Base { base, offset: 0 } => {
            if base != tmp3 {
                asm.mov(tmp3, base);
            }
        }
        _ => asm.lea(tmp3, dst),
    }

    let pre_regs = PreBarrierRegs {
        obj: Some(tmp3),
        pre_val: tmp2,
        thread,
        tmp1,
        tmp2: conv.scratch2,
    };
    pre::emit_pre_barrier(
        bs,
        asm,
        &pre_regs,
        flags,
        BarrierKind::Pre,
        RuntimeTail::Call {
            saved: conv.call_clobbered,
            style: flags.call_style(),
        },
    );

    let Some(val) = val else {
        asm.store_reference(None, Mem::base(tmp3), flags.compressed_references);
        return;
    };
    // The encoding store may clobber its input, and the post-barrier needs the plain address.
    let new_val = if flags.compressed_references {
        asm.mov(conv.scratch2, val);
        conv.scratch2
    } else {
        val
    };
    asm.store_reference(Some(val), Mem::base(tmp3), flags.compressed_references);

    let post_regs = PostBarrierRegs {
        store_addr: tmp3,
        new_val,
        thread,
        tmp1,
        tmp2,
    };
    post::emit_post_barrier(
        bs,
        asm,
        &post_regs,
        flags,
        RuntimeTail::Call {
            saved: crate::asm::RegSet::of(&[tmp3]),
            style: flags.call_style(),
        },
    );
}
