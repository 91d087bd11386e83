//! The cheap inline tests that gate the barriers' slow paths.
//!
//! All reads here are plain, unfenced loads. A stale value only sends a store down a slow
//! path it did not need, or skips work that the collector covers by other means, see
//! [`fenced_recheck`].

use crate::asm::{Cond, Label, MacroAssembler, Mem, Reg, Width};
use crate::vm::BarrierLayout;

fn load_marking_flag<A: MacroAssembler>(asm: &mut A, layout: &BarrierLayout, thread: Reg, tmp: Reg) {
    asm.load(
        layout.marking_active_width.as_width(),
        tmp,
        Mem::at(thread, layout.marking_active_offset as isize),
    );
}

/// Branch to `inactive` unless concurrent marking is active for this thread. Clobbers `tmp`.
pub fn marking_active_check<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    thread: Reg,
    tmp: Reg,
    inactive: Label,
) {
    load_marking_flag(asm, layout, thread, tmp);
    asm.branch_cmp_imm(Cond::Eq, tmp, 0, inactive);
}

/// The inverse of [`marking_active_check`]: branch to `active` if marking is active.
pub fn marking_active_branch<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    thread: Reg,
    tmp: Reg,
    active: Label,
) {
    load_marking_flag(asm, layout, thread, tmp);
    asm.branch_cmp_imm(Cond::Ne, tmp, 0, active);
}

fn region_difference<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    store_addr: Reg,
    new_val: Reg,
    tmp: Reg,
) {
    asm.xor(tmp, store_addr, new_val);
    asm.shr_imm(tmp, tmp, layout.log_bytes_in_region as u32);
}

/// Branch to `same` if `store_addr` and `new_val` lie in the same region. Clobbers `tmp`.
///
/// Null compares as a different region unless the store is to the region at address zero,
/// so a separate null test has to follow.
pub fn same_region_check<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    store_addr: Reg,
    new_val: Reg,
    tmp: Reg,
    same: Label,
) {
    region_difference(asm, layout, store_addr, new_val, tmp);
    asm.branch_cmp_imm(Cond::Eq, tmp, 0, same);
}

/// The inverse of [`same_region_check`]: branch to `cross` if the regions differ.
pub fn cross_region_branch<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    store_addr: Reg,
    new_val: Reg,
    tmp: Reg,
    cross: Label,
) {
    region_difference(asm, layout, store_addr, new_val, tmp);
    asm.branch_cmp_imm(Cond::Ne, tmp, 0, cross);
}

/// Branch to `is_null` if `reg` holds null.
pub fn null_check<A: MacroAssembler>(asm: &mut A, reg: Reg, is_null: Label) {
    asm.branch_cmp_imm(Cond::Eq, reg, 0, is_null);
}

/// Compute the address of the card covering `store_addr` into `card`. Clobbers `tmp`.
pub fn card_address<A: MacroAssembler>(
    asm: &mut A,
    layout: &BarrierLayout,
    store_addr: Reg,
    card: Reg,
    tmp: Reg,
) {
    assert_different_registers!(card, tmp);
    asm.shr_imm(card, store_addr, layout.log_bytes_in_card as u32);
    asm.mov_imm(tmp, layout.card_table_base.as_usize());
    asm.add(card, card, tmp);
}

/// An optimistic read followed by a fenced, authoritative re-read of the same location.
#[derive(Copy, Clone, Debug)]
pub struct FencedRecheck {
    pub location: Mem,
    pub width: Width,
    /// Holds the value read. Free again once the mutation runs.
    pub tmp: Reg,
    /// Skip if the unfenced read sees this value.
    pub optimistic_skip: usize,
    /// Skip if the fenced re-read sees this value.
    pub authoritative_skip: usize,
}

/// Emit "optimistic read, fence, authoritative re-read, mutate".
///
/// The unfenced read filters out the common case cheaply. Acting on a stale value there
/// must only ever cause a skip that something else makes up for. The store-load fence
/// then orders this thread's preceding store before the re-read, so a decision based on
/// the re-read cannot miss a concurrent transition. `mutate` is emitted last and runs only
/// if neither read said to skip; when it runs, `check.tmp` may be reused.
pub fn fenced_recheck<A, F>(asm: &mut A, check: &FencedRecheck, skip: Label, mutate: F)
where
    A: MacroAssembler,
    F: FnOnce(&mut A),
{
    asm.load(check.width, check.tmp, check.location);
    asm.branch_cmp_imm(Cond::Eq, check.tmp, check.optimistic_skip, skip);
    asm.fence_store_load();
    asm.load(check.width, check.tmp, check.location);
    asm.branch_cmp_imm(Cond::Eq, check.tmp, check.authoritative_skip, skip);
    mutate(asm);
}
