use super::mock_test_prelude::*;

use crate::util::constants::BYTES_IN_WORD;

const OBJ: Reg = Reg::new(3);
const PRE_VAL: Reg = Reg::new(4);
const STORE_ADDR: Reg = Reg::new(5);
const NEW_VAL: Reg = Reg::new(6);
const TMP1: Reg = Reg::new(7);
const TMP2: Reg = Reg::new(10);
const LIVE: Reg = Reg::new(11);
const DEAD: Reg = Reg::new(12);
const LIVE_CALLEE_SAVED: Reg = Reg::new(20);
/// Set by the method after the barrier site, to show that execution resumed there.
const RESUMED: Reg = Reg::new(21);

fn field() -> Address {
    heap_address(1, 0x40)
}

fn previous() -> Address {
    heap_address(2, 0x80)
}

fn pre_bindings() -> OperandBindings {
    OperandBindings::new()
        .with(Operand::Obj, OBJ)
        .with(Operand::PreVal, PRE_VAL)
        .with(Operand::Tmp1, TMP1)
}

fn post_bindings() -> OperandBindings {
    OperandBindings::new()
        .with(Operand::StoreAddr, STORE_ADDR)
        .with(Operand::NewVal, NEW_VAL)
        .with(Operand::Tmp1, TMP1)
        .with(Operand::Tmp2, TMP2)
}

fn live() -> RegSet {
    RegSet::of(&[LIVE, LIVE_CALLEE_SAVED])
}

/// Compile a method: the barrier sites, a marker store, then the deferred stubs behind a halt.
fn method<F>(fixture: &BarrierFixture, sites: F) -> MockCode
where
    F: FnOnce(&OptimizingBarriers, &mut MockAssembler, &mut DeferredStubs),
{
    let mut asm = MockAssembler::new();
    let mut stubs = DeferredStubs::new();
    sites(&fixture.bs.optimizing(), &mut asm, &mut stubs);
    asm.mov_imm(RESUMED, 1);
    asm.halt();
    stubs.emit_all(&fixture.bs, &mut asm);
    asm.finish()
}

fn pre_method(fixture: &BarrierFixture) -> MockCode {
    method(fixture, |b, asm, stubs| {
        b.pre_barrier(asm, stubs, &pre_bindings(), live(), BarrierFlags::default())
    })
}

fn post_method(fixture: &BarrierFixture) -> MockCode {
    method(fixture, |b, asm, stubs| {
        b.post_barrier(asm, stubs, &post_bindings(), live(), BarrierFlags::default())
    })
}

fn pre_machine(fixture: &BarrierFixture, marking: bool) -> MockMachine {
    let mut m = fixture.machine();
    fixture.set_marking(&mut m, marking);
    m.memory.write_word(field(), previous().as_usize());
    m.set_reg(OBJ, field().as_usize());
    m.set_reg(LIVE, 0x11);
    m.set_reg(DEAD, 0x22);
    m.set_reg(LIVE_CALLEE_SAVED, 0x33);
    m
}

fn post_machine(fixture: &BarrierFixture, new_val: Address) -> MockMachine {
    let mut m = fixture.machine();
    m.set_reg(STORE_ADDR, field().as_usize());
    m.set_reg(NEW_VAL, new_val.as_usize());
    m.set_reg(LIVE, 0x11);
    m.set_reg(DEAD, 0x22);
    m.set_reg(LIVE_CALLEE_SAVED, 0x33);
    m
}

fn halt_position(code: &MockCode) -> usize {
    code.position(|i| matches!(i, Inst::Halt)).unwrap()
}

#[test]
fn pre_site_is_flag_test_only() {
    let fixture = BarrierFixture::new();
    let code = pre_method(&fixture);
    // Flag load, branch, marker.
    assert_eq!(halt_position(&code), 3);
    assert!(matches!(
        code.insts()[1],
        Inst::BranchCmpImm { cond: Cond::Ne, imm: 0, .. }
    ));
}

#[test]
fn post_site_is_region_test_only() {
    let fixture = BarrierFixture::new();
    let code = post_method(&fixture);
    // Xor, shift, branch, marker.
    assert_eq!(halt_position(&code), 4);
    assert!(matches!(
        code.insts()[2],
        Inst::BranchCmpImm { cond: Cond::Ne, imm: 0, .. }
    ));
}

#[test]
fn pre_marking_inactive() {
    let fixture = BarrierFixture::new();
    let code = pre_method(&fixture);
    let mut m = pre_machine(&fixture, false);
    m.run(&code);
    assert_eq!(m.reg(RESUMED), 1);
    assert_eq!(m.memory.accesses().len(), 1);
}

#[test]
fn pre_stub_records_and_resumes() {
    let fixture = BarrierFixture::new();
    let code = pre_method(&fixture);
    let mut m = pre_machine(&fixture, true);
    m.run(&code);
    assert_eq!(m.reg(RESUMED), 1);
    assert_eq!(
        fixture.queue_entries(&m, QueueKind::Satb),
        vec![previous().as_usize()]
    );
    assert!(m.runtime_calls().is_empty());
}

#[test]
fn pre_stub_saves_only_live_registers() {
    let fixture = BarrierFixture::new();
    let code = pre_method(&fixture);
    let saves: Vec<&Inst> = code
        .insts()
        .iter()
        .filter(|i| matches!(i, Inst::Push { .. }))
        .collect();
    assert_eq!(saves, vec![&Inst::Push { regs: RegSet::of(&[LIVE]) }]);

    let mut m = pre_machine(&fixture, true);
    fixture.set_queue_index(&mut m, QueueKind::Satb, 0);
    m.run(&code);
    assert_eq!(m.reg(RESUMED), 1);
    assert_eq!(
        m.runtime_calls(),
        &[RuntimeCall {
            entry: RuntimeEntry::LogPreviousValue,
            args: vec![previous().as_usize(), THREAD_BLOCK.as_usize()],
            style: CallStyle::Checked,
        }]
    );
    assert_eq!(m.reg(LIVE), 0x11);
    assert_eq!(m.reg(LIVE_CALLEE_SAVED), 0x33);
    assert_eq!(m.reg(DEAD), POISON);
}

#[test]
fn post_same_region_never_enters_stub() {
    let fixture = BarrierFixture::new();
    let code = post_method(&fixture);
    let mut m = post_machine(&fixture, heap_address(1, 0x100));
    m.run(&code);
    assert_eq!(m.reg(RESUMED), 1);
    assert!(m.memory.accesses().is_empty());
}

#[test]
fn post_stub_logs_card_and_resumes() {
    let fixture = BarrierFixture::new();
    let code = post_method(&fixture);
    for (new_val, logged) in [(heap_address(4, 0), true), (Address::ZERO, false)] {
        let mut m = post_machine(&fixture, new_val);
        m.run(&code);
        assert_eq!(m.reg(RESUMED), 1);
        assert_eq!(
            !fixture.queue_entries(&m, QueueKind::DirtyCard).is_empty(),
            logged
        );
        assert_eq!(fixture.card(&m, field()) == DIRTY_CARD, logged);
    }
}

#[test]
fn post_stub_saves_only_live_registers() {
    let fixture = BarrierFixture::new();
    let code = post_method(&fixture);
    let mut m = post_machine(&fixture, heap_address(4, 0));
    fixture.set_queue_index(&mut m, QueueKind::DirtyCard, 0);
    m.run(&code);
    let card = fixture.layout().card_address(field());
    assert_eq!(
        m.runtime_calls(),
        &[RuntimeCall {
            entry: RuntimeEntry::LogDirtiedCard,
            args: vec![card.as_usize(), THREAD_BLOCK.as_usize()],
            style: CallStyle::Checked,
        }]
    );
    assert_eq!(m.reg(RESUMED), 1);
    assert_eq!(m.reg(LIVE), 0x11);
    assert_eq!(m.reg(LIVE_CALLEE_SAVED), 0x33);
    assert_eq!(m.reg(DEAD), POISON);
}

#[test]
fn several_sites_share_one_flush() {
    let fixture = BarrierFixture::new();
    let other_field = heap_address(3, 0x10);
    let mut asm = MockAssembler::new();
    let mut stubs = DeferredStubs::new();
    let b = fixture.bs.optimizing();
    b.pre_barrier(&mut asm, &mut stubs, &pre_bindings(), live(), BarrierFlags::default());
    b.post_barrier(&mut asm, &mut stubs, &post_bindings(), live(), BarrierFlags::default());
    // A second pre-barrier for another field, reusing the registers.
    asm.mov_imm(OBJ, other_field.as_usize());
    b.pre_barrier(&mut asm, &mut stubs, &pre_bindings(), live(), BarrierFlags::default());
    assert_eq!(stubs.len(), 3);
    assert!(matches!(stubs.stubs()[1], BarrierStub::Post(_)));
    let entries: Vec<Label> = stubs.stubs().iter().map(|s| s.entry()).collect();
    asm.mov_imm(RESUMED, 1);
    asm.halt();
    stubs.emit_all(&fixture.bs, &mut asm);
    let code = asm.finish();
    // Stubs are laid out in site order.
    let positions: Vec<usize> = entries.iter().map(|l| code.label_position(*l)).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    let mut m = pre_machine(&fixture, true);
    m.memory.write_word(other_field, heap_address(5, 0).as_usize());
    m.set_reg(STORE_ADDR, field().as_usize());
    m.set_reg(NEW_VAL, heap_address(4, 0).as_usize());
    m.run(&code);
    assert_eq!(m.reg(RESUMED), 1);
    assert_eq!(
        fixture.queue_entries(&m, QueueKind::Satb),
        vec![heap_address(5, 0).as_usize(), previous().as_usize()]
    );
    assert_eq!(
        fixture.queue_index(&m, QueueKind::Satb),
        QUEUE_CAPACITY_BYTES - 2 * BYTES_IN_WORD
    );
    assert_eq!(fixture.queue_entries(&m, QueueKind::DirtyCard).len(), 1);
}

#[test]
fn uninitialized_destination_defers_nothing() {
    let fixture = BarrierFixture::new();
    let mut asm = MockAssembler::new();
    let mut stubs = DeferredStubs::new();
    let flags = BarrierFlags {
        destination_uninitialized: true,
        ..Default::default()
    };
    fixture
        .bs
        .optimizing()
        .pre_barrier(&mut asm, &mut stubs, &pre_bindings(), live(), flags);
    assert!(stubs.is_empty());
    assert!(asm.insts().is_empty());
}

#[test]
#[should_panic(expected = "barrier stubs were never emitted")]
fn dropped_stubs_panic() {
    let fixture = BarrierFixture::new();
    let mut asm = MockAssembler::new();
    let mut stubs = DeferredStubs::new();
    fixture.bs.optimizing().pre_barrier(
        &mut asm,
        &mut stubs,
        &pre_bindings(),
        live(),
        BarrierFlags::default(),
    );
    drop(stubs);
}

#[test]
#[should_panic(expected = "is bound twice")]
fn operands_must_avoid_scratch() {
    let fixture = BarrierFixture::new();
    let mut asm = MockAssembler::new();
    let mut stubs = DeferredStubs::new();
    let scratch2 = fixture.conventions().scratch2;
    fixture.bs.optimizing().pre_barrier(
        &mut asm,
        &mut stubs,
        &pre_bindings().with(Operand::PreVal, scratch2),
        live(),
        BarrierFlags::default(),
    );
}
