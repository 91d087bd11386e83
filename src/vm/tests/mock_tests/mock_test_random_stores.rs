// Random reference stores, run through every call-site shape, checked against a model of
// what the collector must observe.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::mock_test_prelude::*;

use crate::util::constants::BYTES_IN_WORD;

const FIELD: Reg = Reg::new(19);
const NEW_VAL: Reg = Reg::new(20);
const PRE_VAL: Reg = Reg::new(21);
const TMP1: Reg = Reg::new(22);
const TMP2: Reg = Reg::new(23);
const TMP3: Reg = Reg::new(24);

const STORES: usize = 400;
const FIELDS_PER_REGION: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Shape {
    Interpreter,
    StoreHelper,
    Baseline,
    Optimizing,
}

const SHAPES: [Shape; 4] = [
    Shape::Interpreter,
    Shape::StoreHelper,
    Shape::Baseline,
    Shape::Optimizing,
];

fn pre_bindings() -> OperandBindings {
    OperandBindings::new()
        .with(Operand::Obj, FIELD)
        .with(Operand::PreVal, PRE_VAL)
        .with(Operand::Tmp1, TMP1)
        .with(Operand::Tmp2, TMP2)
}

fn post_bindings() -> OperandBindings {
    OperandBindings::new()
        .with(Operand::StoreAddr, FIELD)
        .with(Operand::NewVal, NEW_VAL)
        .with(Operand::Tmp1, TMP1)
        .with(Operand::Tmp2, TMP2)
}

/// The code of one store of `NEW_VAL` to the field at `FIELD`, in the given shape.
fn store_code(fixture: &BarrierFixture, shape: Shape) -> MockCode {
    let bs = &fixture.bs;
    let flags = BarrierFlags::default();
    let mut asm = MockAssembler::new();
    let store = |asm: &mut MockAssembler| {
        asm.store_reference(Some(NEW_VAL), Mem::base(FIELD), false)
    };
    match shape {
        Shape::Interpreter => {
            bs.pre_barrier(&mut asm, &pre_bindings(), flags);
            store(&mut asm);
            bs.post_barrier(&mut asm, &post_bindings(), flags);
        }
        Shape::StoreHelper => {
            let bindings = OperandBindings::new()
                .with(Operand::NewVal, NEW_VAL)
                .with(Operand::Tmp1, TMP1)
                .with(Operand::Tmp2, TMP2)
                .with(Operand::Tmp3, TMP3);
            bs.store_reference_at(&mut asm, Mem::base(FIELD), &bindings, flags);
        }
        Shape::Baseline => {
            let baseline = bs.baseline();
            baseline.pre_barrier(&mut asm, &pre_bindings(), flags);
            store(&mut asm);
            baseline.post_barrier(&mut asm, &post_bindings(), flags);
        }
        Shape::Optimizing => {
            let optimizing = bs.optimizing();
            let mut stubs = DeferredStubs::new();
            let live = RegSet::of(&[FIELD, NEW_VAL]);
            optimizing.pre_barrier(&mut asm, &mut stubs, &pre_bindings(), live, flags);
            store(&mut asm);
            let post = post_bindings();
            optimizing.post_barrier(&mut asm, &mut stubs, &post, RegSet::empty(), flags);
            asm.halt();
            stubs.emit_all(bs, &mut asm);
        }
    }
    asm.finish()
}

/// What the collector has been told.
#[derive(Debug, Default, PartialEq, Eq)]
struct Observed {
    /// Entries taken out of the SATB queue plus those still in it, oldest first.
    satb: Vec<usize>,
    dirty_cards: Vec<usize>,
    runtime_calls: Vec<RuntimeCall>,
    cards: Vec<u8>,
    fields: Vec<usize>,
}

struct Model {
    fields: HashMap<Address, usize>,
    cards: HashMap<Address, u8>,
    satb_free: usize,
    dirty_free: usize,
    observed: Observed,
}

impl Model {
    fn new(young_regions: &[usize]) -> Self {
        let layout = layout(FlagWidth::Byte);
        let mut cards = HashMap::new();
        for region in young_regions {
            for offset in (0..REGION_BYTES).step_by(1 << LOG_CARD_BYTES) {
                cards.insert(layout.card_address(heap_address(*region, offset)), YOUNG_CARD);
            }
        }
        Model {
            fields: HashMap::new(),
            cards,
            satb_free: QUEUE_CAPACITY,
            dirty_free: QUEUE_CAPACITY,
            observed: Observed::default(),
        }
    }

    fn store(&mut self, field: Address, value: usize, marking: bool) {
        let old = self.fields.insert(field, value).unwrap_or(0);
        if marking && old != 0 {
            if self.satb_free > 0 {
                self.satb_free -= 1;
                self.observed.satb.push(old);
            } else {
                self.observed.runtime_calls.push(RuntimeCall {
                    entry: RuntimeEntry::LogPreviousValue,
                    args: vec![old, THREAD_BLOCK.as_usize()],
                    style: CallStyle::Checked,
                });
            }
        }
        let layout = layout(FlagWidth::Byte);
        if value == 0 || layout.in_same_region(field, Address::from_usize(value)) {
            return;
        }
        let card = layout.card_address(field);
        let state = self.cards.entry(card).or_insert(CLEAN_CARD);
        if *state == YOUNG_CARD || *state == DIRTY_CARD {
            return;
        }
        *state = DIRTY_CARD;
        if self.dirty_free > 0 {
            self.dirty_free -= 1;
            self.observed.dirty_cards.push(card.as_usize());
        } else {
            self.observed.runtime_calls.push(RuntimeCall {
                entry: RuntimeEntry::LogDirtiedCard,
                args: vec![card.as_usize(), THREAD_BLOCK.as_usize()],
                style: CallStyle::Checked,
            });
        }
    }

    /// The collector empties both queues and cleans every dirty card.
    fn drain(&mut self) {
        self.satb_free = QUEUE_CAPACITY;
        self.dirty_free = QUEUE_CAPACITY;
        for state in self.cards.values_mut() {
            if *state == DIRTY_CARD {
                *state = CLEAN_CARD;
            }
        }
    }
}

/// The machine side of [`Model`].
struct Run<'a> {
    fixture: &'a BarrierFixture,
    machine: MockMachine,
    code: MockCode,
    satb: Vec<usize>,
    dirty_cards: Vec<usize>,
}

impl<'a> Run<'a> {
    fn new(fixture: &'a BarrierFixture, shape: Shape, young_regions: &[usize]) -> Self {
        let mut machine = fixture.machine();
        for region in young_regions {
            for offset in (0..REGION_BYTES).step_by(1 << LOG_CARD_BYTES) {
                fixture.set_card(&mut machine, heap_address(*region, offset), YOUNG_CARD);
            }
        }
        Run {
            fixture,
            machine,
            code: store_code(fixture, shape),
            satb: vec![],
            dirty_cards: vec![],
        }
    }

    fn store(&mut self, field: Address, value: usize, marking: bool) {
        self.fixture.set_marking(&mut self.machine, marking);
        self.machine.set_reg(FIELD, field.as_usize());
        self.machine.set_reg(NEW_VAL, value);
        self.machine.run(&self.code);
    }

    /// Take the queued entries out, oldest first.
    fn take(&mut self, kind: QueueKind) -> Vec<usize> {
        let mut entries = self.fixture.queue_entries(&self.machine, kind);
        entries.reverse();
        self.fixture
            .set_queue_index(&mut self.machine, kind, QUEUE_CAPACITY_BYTES);
        entries
    }

    fn drain(&mut self) {
        let satb = self.take(QueueKind::Satb);
        self.satb.extend(satb);
        let dirty = self.take(QueueKind::DirtyCard);
        self.dirty_cards.extend(dirty);
        for i in 0..CARDS {
            if self.machine.memory.read_byte(CARD_TABLE + i) == DIRTY_CARD {
                self.machine.memory.write_byte(CARD_TABLE + i, CLEAN_CARD);
            }
        }
    }

    fn observed(mut self, fields: &[Address]) -> Observed {
        self.drain();
        let cards = (0..CARDS)
            .map(|i| self.machine.memory.read_byte(CARD_TABLE + i))
            .collect();
        Observed {
            satb: self.satb,
            dirty_cards: self.dirty_cards,
            runtime_calls: self.machine.runtime_calls().to_vec(),
            cards,
            fields: fields
                .iter()
                .map(|f| self.machine.memory.read_word(*f))
                .collect(),
        }
    }
}

fn check_shape(shape: Shape, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut fixture = BarrierFixture::new();
    fixture.generate_trampolines();

    let young_regions: Vec<usize> = (0..HEAP_REGIONS).filter(|_| rng.random_bool(0.25)).collect();
    let fields: Vec<Address> = (0..HEAP_REGIONS)
        .flat_map(|r| (0..FIELDS_PER_REGION).map(move |i| heap_address(r, i * 0x208)))
        .collect();

    let mut model = Model::new(&young_regions);
    let mut run = Run::new(&fixture, shape, &young_regions);
    let mut marking = false;
    for _ in 0..STORES {
        if rng.random_bool(0.05) {
            marking = !marking;
        }
        if rng.random_bool(0.03) {
            model.drain();
            run.drain();
        }
        let field = fields[rng.random_range(0..fields.len())];
        let value = if rng.random_bool(0.2) {
            0
        } else {
            let region = rng.random_range(0..HEAP_REGIONS);
            heap_address(region, rng.random_range(0..REGION_BYTES / BYTES_IN_WORD) * BYTES_IN_WORD)
                .as_usize()
        };
        model.store(field, value, marking);
        run.store(field, value, marking);
    }

    model.drain();
    let mut expected = model.observed;
    expected.cards = (0..CARDS)
        .map(|i| {
            *model
                .cards
                .get(&(CARD_TABLE + i))
                .unwrap_or(&CLEAN_CARD)
        })
        .collect();
    expected.fields = fields
        .iter()
        .map(|f| *model.fields.get(f).unwrap_or(&0))
        .collect();

    let observed = run.observed(&fields);
    assert_eq!(observed, expected, "{:?} with seed {}", shape, seed);
}

#[test]
fn every_shape_matches_the_model() {
    for shape in SHAPES {
        for seed in 0..4 {
            check_shape(shape, seed);
        }
    }
}
