use std::sync::Arc;

use super::mock_test_prelude::*;

use crate::util::options::Options;
use crate::util::test_util::panic_after;

const OBJ: Reg = Reg::new(3);
const PRE_VAL: Reg = Reg::new(4);
const STORE_ADDR: Reg = Reg::new(5);
const NEW_VAL: Reg = Reg::new(6);
const TMP1: Reg = Reg::new(7);
const TMP2: Reg = Reg::new(10);

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
        .with(Operand::Tmp2, TMP2)
}

fn post_bindings() -> OperandBindings {
    OperandBindings::new()
        .with(Operand::StoreAddr, STORE_ADDR)
        .with(Operand::NewVal, NEW_VAL)
        .with(Operand::Tmp1, TMP1)
        .with(Operand::Tmp2, TMP2)
}

fn fixture() -> BarrierFixture {
    let mut fixture = BarrierFixture::new();
    fixture.generate_trampolines();
    fixture
}

#[test]
fn trampolines_are_generated_once() {
    let mut fixture = BarrierFixture::new();
    assert!(fixture.bs.trampolines().is_none());
    fixture.generate_trampolines();
    let first = *fixture.bs.trampolines().unwrap();
    fixture.generate_trampolines();
    assert_eq!(*fixture.bs.trampolines().unwrap(), first);
    assert_eq!(fixture.code_cache.len(), 2);
    assert_ne!(first.pre, first.post);

    let names: Vec<&str> = fixture.code_cache.blobs().map(|(name, _, _)| name).collect();
    assert_eq!(names, vec!["satb_log_previous_value", "card_log_dirtied_card"]);
    for (name, _, code) in fixture.code_cache.blobs() {
        assert_eq!(code.insts().first(), Some(&Inst::StubPrologue { name }));
        assert_eq!(code.insts().last(), Some(&Inst::StubEpilogue));
    }
}

#[test]
#[should_panic(expected = "baseline barriers requested before the trampolines were generated")]
fn baseline_before_trampolines() {
    let fixture = BarrierFixture::new();
    fixture.bs.baseline();
}

#[test]
#[should_panic(expected = "baseline barriers must use the thread register")]
fn other_thread_register() {
    let fixture = fixture();
    let mut asm = MockAssembler::new();
    fixture.bs.baseline().pre_barrier(
        &mut asm,
        &pre_bindings().with(Operand::Thread, Reg::new(19)),
        BarrierFlags::default(),
    );
}

#[test]
fn sites_call_the_trampoline() {
    let fixture = fixture();
    let trampolines = *fixture.bs.trampolines().unwrap();
    let mut asm = MockAssembler::new();
    let baseline = fixture.bs.baseline();
    baseline.pre_barrier(&mut asm, &pre_bindings(), BarrierFlags::default());
    baseline.post_barrier(&mut asm, &post_bindings(), BarrierFlags::default());
    let code = asm.finish();

    // No direct runtime calls and no register saving at the site.
    assert!(!code.contains(|i| matches!(i, Inst::CallLeaf { .. } | Inst::Push { .. })));
    assert!(code.contains(|i| *i == Inst::FarCall { entry: trampolines.pre }));
    assert!(code.contains(|i| *i == Inst::FarCall { entry: trampolines.post }));
}

#[test]
fn pre_barrier_records_inline() {
    let fixture = fixture();
    let mut asm = MockAssembler::new();
    fixture
        .bs
        .baseline()
        .pre_barrier(&mut asm, &pre_bindings(), BarrierFlags::default());
    let code = asm.finish();

    let mut m = fixture.machine();
    fixture.set_marking(&mut m, true);
    m.memory.write_word(field(), previous().as_usize());
    m.set_reg(OBJ, field().as_usize());
    m.run(&code);
    assert_eq!(
        fixture.queue_entries(&m, QueueKind::Satb),
        vec![previous().as_usize()]
    );
    assert!(m.far_calls().is_empty());
}

#[test]
fn pre_trampoline_preserves_all_registers() {
    let fixture = fixture();
    let mut asm = MockAssembler::new();
    fixture
        .bs
        .baseline()
        .pre_barrier(&mut asm, &pre_bindings(), BarrierFlags::default());
    let code = asm.finish();

    let mut m = fixture.machine();
    fixture.set_marking(&mut m, true);
    fixture.set_queue_index(&mut m, QueueKind::Satb, 0);
    m.memory.write_word(field(), previous().as_usize());
    let mut before = fill_registers(&mut m);
    m.set_reg(OBJ, field().as_usize());
    before[OBJ.encoding()] = field().as_usize();
    m.run(&code);

    assert_eq!(m.far_calls(), &[fixture.bs.trampolines().unwrap().pre]);
    assert_eq!(
        m.runtime_calls(),
        &[RuntimeCall {
            entry: RuntimeEntry::LogPreviousValue,
            args: vec![previous().as_usize(), THREAD_BLOCK.as_usize()],
            style: CallStyle::Checked,
        }]
    );
    assert_preserved(&m, &before, RegSet::of(&[PRE_VAL, TMP1, TMP2]));
}

#[test]
fn post_trampoline_preserves_all_registers() {
    let fixture = fixture();
    let mut asm = MockAssembler::new();
    fixture
        .bs
        .baseline()
        .post_barrier(&mut asm, &post_bindings(), BarrierFlags::default());
    let code = asm.finish();

    let mut m = fixture.machine();
    fixture.set_queue_index(&mut m, QueueKind::DirtyCard, 0);
    let mut before = fill_registers(&mut m);
    m.set_reg(STORE_ADDR, field().as_usize());
    m.set_reg(NEW_VAL, heap_address(6, 0).as_usize());
    before[STORE_ADDR.encoding()] = field().as_usize();
    before[NEW_VAL.encoding()] = heap_address(6, 0).as_usize();
    m.run(&code);

    let card = fixture.layout().card_address(field());
    assert_eq!(m.far_calls(), &[fixture.bs.trampolines().unwrap().post]);
    assert_eq!(
        m.runtime_calls(),
        &[RuntimeCall {
            entry: RuntimeEntry::LogDirtiedCard,
            args: vec![card.as_usize(), THREAD_BLOCK.as_usize()],
            style: CallStyle::Checked,
        }]
    );
    assert_eq!(fixture.card(&m, field()), DIRTY_CARD);
    let scratch1 = fixture.conventions().scratch1;
    assert_preserved(&m, &before, RegSet::of(&[TMP1, TMP2, scratch1]));
}

#[test]
fn concurrent_generation_installs_once() {
    let bs = Arc::new(BarrierSet::new(
        layout(FlagWidth::Byte),
        runtime_entries(),
        RegisterConventions::aarch64(),
        Options::builtin_defaults(),
    ));
    let results = panic_after(5000, move || {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bs = bs.clone();
                std::thread::spawn(move || {
                    let mut cache = MockCodeCache::new();
                    let trampolines = *bs.generate_trampolines(&mut cache);
                    (trampolines, cache.len())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });
    let installed: usize = results.iter().map(|(_, n)| n).sum();
    assert_eq!(installed, 2);
    assert!(results.iter().all(|(t, _)| *t == results[0].0));
}
