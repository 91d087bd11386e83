//! Barriers for the baseline compiler.
//!
//! The baseline compiler emits both barriers completely inline at every store. The only
//! out-of-line part is the runtime call taken when a queue is full: every site passes its
//! value through the stub parameter area to one of two process-wide trampolines, which save
//! the call-clobbered registers, call the runtime and restore them. The trampolines are
//! generated once, before the first baseline method is compiled, and never change.

use crate::asm::{CallStyle, CodeEntry, CodeInstaller, MacroAssembler, Reg};
use crate::barrier::call::{self, RuntimeTail};
use crate::barrier::post::{self, PostBarrierRegs};
use crate::barrier::pre::{self, PreBarrierRegs};
use crate::barrier::{BarrierFlags, BarrierKind, BarrierSet, OperandBindings};
use crate::vm::RuntimeEntry;

/// The shared runtime-call trampolines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Trampolines {
    /// Logs the previous value passed in parameter slot 0.
    pub pre: CodeEntry,
    /// Logs the card address passed in parameter slot 0.
    pub post: CodeEntry,
}

/// Generate both trampolines. Called once per process, through [`BarrierSet::generate_trampolines`].
pub(crate) fn generate_trampolines<I: CodeInstaller>(
    bs: &BarrierSet,
    installer: &mut I,
) -> Trampolines {
    let pre = generate_trampoline(
        bs,
        installer,
        "satb_log_previous_value",
        RuntimeEntry::LogPreviousValue,
    );
    let post = generate_trampoline(
        bs,
        installer,
        "card_log_dirtied_card",
        RuntimeEntry::LogDirtiedCard,
    );
    info!("Generated barrier trampolines: pre at {}, post at {}", pre, post);
    Trampolines { pre, post }
}

fn generate_trampoline<I: CodeInstaller>(
    bs: &BarrierSet,
    installer: &mut I,
    name: &'static str,
    entry: RuntimeEntry,
) -> CodeEntry {
    let conv = bs.conventions();
    let mut asm = installer.new_stub(name);
    asm.stub_prologue(name);
    asm.push(conv.call_clobbered);
    // The thread register survives calls, so the first argument can be loaded in place.
    asm.load_parameter(conv.arg(0), 0);
    call::marshal_arguments(&mut asm, conv, &[conv.arg(0), conv.thread]);
    asm.call_leaf(bs.runtime_entry(entry), entry.arity(), CallStyle::Checked);
    asm.pop(conv.call_clobbered);
    asm.stub_epilogue();
    if bs.options().count_sites {
        bs.stats().record_trampoline();
    }
    installer.install(name, asm)
}

/// Emits baseline barriers. Obtained from [`BarrierSet::baseline`] once the trampolines exist.
pub struct BaselineBarriers<'a> {
    bs: &'a BarrierSet,
    trampolines: &'a Trampolines,
}

impl<'a> BaselineBarriers<'a> {
    pub(crate) fn new(bs: &'a BarrierSet, trampolines: &'a Trampolines) -> Self {
        BaselineBarriers { bs, trampolines }
    }

    // The trampolines pass the convention's thread register to the runtime.
    fn check_thread(&self, thread: Reg) {
        let expected = self.bs.conventions().thread;
        assert!(
            thread == expected,
            "baseline barriers must use the thread register {}, not {}",
            expected,
            thread
        );
    }

    /// Emit the full pre-barrier at the site. Operands as for [`BarrierSet::pre_barrier`].
    /// All registers survive the runtime path.
    pub fn pre_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        bindings: &OperandBindings,
        flags: BarrierFlags,
    ) {
        let regs = PreBarrierRegs::from_bindings(self.bs, bindings);
        self.check_thread(regs.thread);
        pre::emit_pre_barrier(
            self.bs,
            asm,
            &regs,
            flags,
            BarrierKind::Pre,
            RuntimeTail::Trampoline(self.trampolines.pre),
        );
    }

    /// Emit the full post-barrier at the site. Operands as for [`BarrierSet::post_barrier`].
    /// All registers survive the runtime path.
    pub fn post_barrier<A: MacroAssembler>(
        &self,
        asm: &mut A,
        bindings: &OperandBindings,
        flags: BarrierFlags,
    ) {
        let regs = PostBarrierRegs::from_bindings(self.bs, bindings);
        self.check_thread(regs.thread);
        let conv = self.bs.conventions();
        let used: [Reg; 6] = [
            regs.store_addr,
            regs.new_val,
            regs.thread,
            regs.tmp1,
            regs.tmp2,
            conv.scratch1,
        ];
        self.bs.verify(&used);
        post::emit_post_barrier(
            self.bs,
            asm,
            &regs,
            flags,
            RuntimeTail::Trampoline(self.trampolines.post),
        );
    }
}
