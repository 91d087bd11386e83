//! Calls from barrier code into the collector's runtime.

use crate::asm::{CallStyle, CodeEntry, MacroAssembler, Reg, RegSet, RegisterConventions};
use crate::barrier::BarrierSet;
use crate::vm::RuntimeEntry;

/// How a barrier's runtime path reaches the runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuntimeTail {
    /// Save `saved`, call the runtime directly from the site, restore.
    Call { saved: RegSet, style: CallStyle },
    /// Hand the value to a shared trampoline, which does the saving and calling. The thread
    /// is implicit in the trampoline's convention.
    Trampoline(CodeEntry),
}

/// Move `sources[i]` into argument register `i`, for all `i`, as one parallel assignment.
///
/// A source may already sit in another argument register, even in a cycle such as the
/// fully swapped two-register case. Cycles are broken through a scratch register, which
/// must not be one of the sources.
pub fn marshal_arguments<A: MacroAssembler>(
    asm: &mut A,
    conventions: &RegisterConventions,
    sources: &[Reg],
) {
    assert!(
        sources.len() <= conventions.args.len(),
        "{} arguments do not fit in {} argument registers",
        sources.len(),
        conventions.args.len()
    );
    // (destination, source) pairs still to do.
    let mut pending: Vec<(Reg, Reg)> = conventions
        .args
        .iter()
        .zip(sources)
        .filter(|(dst, src)| dst != src)
        .map(|(dst, src)| (*dst, *src))
        .collect();

    let source_set: RegSet = sources.iter().copied().collect();
    let scratch = [conventions.scratch1, conventions.scratch2]
        .into_iter()
        .find(|r| !source_set.contains(*r));

    while !pending.is_empty() {
        // A move is safe once no other pending move still reads its destination.
        let ready = pending
            .iter()
            .position(|(dst, _)| !pending.iter().any(|(_, src)| src == dst));
        match ready {
            Some(i) => {
                let (dst, src) = pending.remove(i);
                asm.mov(dst, src);
            }
            None => {
                // Every remaining destination is still needed: park one in the scratch register.
                let scratch = match scratch {
                    Some(r) => r,
                    None => panic!("no free scratch register to marshal {:?}", sources),
                };
                let (blocked, _) = pending[0];
                asm.mov(scratch, blocked);
                for (_, src) in pending.iter_mut() {
                    if *src == blocked {
                        *src = scratch;
                    }
                }
            }
        }
    }
}

/// Emit the runtime path of a barrier: deliver `value` and the thread to `entry`.
pub fn emit_runtime_tail<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    entry: RuntimeEntry,
    value: Reg,
    thread: Reg,
    tail: RuntimeTail,
) {
    debug_assert_eq!(entry.arity(), 2);
    match tail {
        RuntimeTail::Call { saved, style } => {
            call_runtime(bs, asm, entry, &[value, thread], saved, style);
        }
        RuntimeTail::Trampoline(code) => {
            asm.store_parameter(value, 0);
            asm.far_call(code);
        }
    }
}

/// Save `saved`, marshal `args`, call `entry`, restore.
pub fn call_runtime<A: MacroAssembler>(
    bs: &BarrierSet,
    asm: &mut A,
    entry: RuntimeEntry,
    args: &[Reg],
    saved: RegSet,
    style: CallStyle,
) {
    assert_eq!(
        args.len(),
        entry.arity(),
        "{} takes {} arguments",
        entry,
        entry.arity()
    );
    if !saved.is_empty() {
        asm.push(saved);
    }
    marshal_arguments(asm, bs.conventions(), args);
    asm.call_leaf(bs.runtime_entry(entry), args.len(), style);
    if !saved.is_empty() {
        asm.pop(saved);
    }
}
