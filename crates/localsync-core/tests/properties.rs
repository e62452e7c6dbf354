//! Property-based tests for the replicated types.
//!
//! These tests verify the laws convergence depends on:
//!  - Replicas that saw the same deltas agree, whatever the delivery order
//!  - Text edits that arrive before their field are redelivered, not lost
//!  - Re-delivering a delta changes nothing
//!  - Full-state merge is commutative, associative and idempotent
//!  - Positions survive a round trip through anchors
//!  - Clock stamps strictly increase

use localsync_core::{Crdt, DeltaOps, Hlc, NestedValue, Stamp, TextDelta, TextTree, Timestamp, ValueDelta};
use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::json;

const SITES: [&str; 3] = ["alpha", "bravo", "charlie"];

#[derive(Debug, Clone)]
enum TextOp {
    Insert(Index, String),
    Delete(Index, usize),
}

fn text_op() -> impl Strategy<Value = TextOp> {
    prop_oneof![
        3 => (any::<Index>(), "[a-z]{1,4}").prop_map(|(at, text)| TextOp::Insert(at, text)),
        1 => (any::<Index>(), 1usize..4).prop_map(|(at, len)| TextOp::Delete(at, len)),
    ]
}

/// Rounds of `(site, op)`; sites exchange deltas at the end of each round.
fn text_rounds() -> impl Strategy<Value = Vec<Vec<(usize, TextOp)>>> {
    prop::collection::vec(prop::collection::vec((0..SITES.len(), text_op()), 0..8), 1..5)
}

/// Deterministic Fisher-Yates driven by a seed.
fn permute<T>(items: &mut [T], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let j = usize::try_from(seed % (i as u64 + 1)).unwrap();
        items.swap(i, j);
    }
}

fn run_text_op(tree: &mut TextTree, clock: &mut Hlc, op: &TextOp) -> Option<TextDelta> {
    let stamp = clock.tick_at(0).pack();
    match op {
        TextOp::Insert(at, text) => {
            let pos = at.index(tree.len() + 1);
            Some(tree.insert_at(pos, text, &stamp).unwrap())
        }
        TextOp::Delete(at, len) => {
            if tree.is_empty() {
                return None;
            }
            let pos = at.index(tree.len());
            let len = (*len).min(tree.len() - pos);
            Some(tree.delete(pos, len, &stamp).unwrap())
        }
    }
}

/// Interleave per-site queues, keeping each queue's own order.
fn interleave(mut queues: Vec<Vec<TextDelta>>, seed: u64) -> Vec<TextDelta> {
    let mut picks: Vec<usize> = queues
        .iter()
        .enumerate()
        .flat_map(|(site, queue)| std::iter::repeat(site).take(queue.len()))
        .collect();
    permute(&mut picks, seed);
    for queue in &mut queues {
        queue.reverse();
    }
    picks
        .into_iter()
        .filter_map(|site| queues[site].pop())
        .collect()
}

fn simulate_text(rounds: &[Vec<(usize, TextOp)>], seed: u64) -> Vec<TextTree> {
    let mut trees = vec![TextTree::new(); SITES.len()];
    let mut clocks: Vec<Hlc> = SITES.iter().map(|site| Hlc::init(*site, 0)).collect();

    for (round, ops) in rounds.iter().enumerate() {
        let mut outboxes: Vec<Vec<TextDelta>> = vec![Vec::new(); SITES.len()];
        for (site, op) in ops {
            if let Some(delta) = run_text_op(&mut trees[*site], &mut clocks[*site], op) {
                outboxes[*site].push(delta);
            }
        }
        for (receiver, tree) in trees.iter_mut().enumerate() {
            let queues = outboxes
                .iter()
                .enumerate()
                .map(|(site, queue)| if site == receiver { Vec::new() } else { queue.clone() })
                .collect();
            let salt = seed.wrapping_add((round * SITES.len() + receiver) as u64) | 1;
            for delta in interleave(queues, salt) {
                tree.apply_delta(&delta).unwrap();
            }
        }
        // duplicate delivery of the whole round
        for tree in &mut trees {
            for delta in outboxes.iter().flatten() {
                tree.apply_delta(delta).unwrap();
            }
        }
    }
    trees
}

proptest! {
    #[test]
    fn text_replicas_converge(rounds in text_rounds(), seed in any::<u64>()) {
        let trees = simulate_text(&rounds, seed);
        for tree in &trees {
            prop_assert!(tree.check_invariants().is_ok());
            prop_assert_eq!(tree.text(), trees[0].text());
            prop_assert_eq!(tree.len(), trees[0].len());
        }
    }

    #[test]
    fn text_state_merge_matches_delta_sync(rounds in text_rounds(), seed in any::<u64>()) {
        let trees = simulate_text(&rounds, seed);
        let mut merged = TextTree::new();
        for tree in trees.iter().rev() {
            merged.merge(tree).unwrap();
        }
        prop_assert!(merged.check_invariants().is_ok());
        prop_assert_eq!(merged.text(), trees[0].text());
    }

    #[test]
    fn text_positions_roundtrip(rounds in text_rounds(), seed in any::<u64>()) {
        let trees = simulate_text(&rounds, seed);
        let tree = &trees[0];
        for pos in 0..=tree.len() {
            for anchor_left in [true, false] {
                let loc = tree.pos_to_loc(pos, anchor_left).unwrap();
                prop_assert_eq!(tree.loc_to_pos(&loc).unwrap(), pos);
            }
        }
    }

    #[test]
    fn text_apply_is_idempotent(ops in prop::collection::vec(text_op(), 1..20)) {
        let mut source = TextTree::new();
        let mut clock = Hlc::init("alpha", 0);
        let deltas: Vec<TextDelta> = ops
            .iter()
            .filter_map(|op| run_text_op(&mut source, &mut clock, op))
            .collect();

        let mut once = TextTree::new();
        let mut twice = TextTree::new();
        for delta in &deltas {
            once.apply_delta(delta).unwrap();
            twice.apply_delta(delta).unwrap();
            twice.apply_delta(delta).unwrap();
        }
        prop_assert_eq!(once.text(), source.text());
        prop_assert_eq!(&twice, &once);
    }
}

#[derive(Debug, Clone)]
enum ValueOp {
    Set(Vec<String>, i64),
    SetObject(Vec<String>, Vec<(String, i64)>),
    Remove(Vec<String>),
}

fn key_path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]).prop_map(String::from), 0..3)
}

fn value_op() -> impl Strategy<Value = ValueOp> {
    prop_oneof![
        3 => (key_path(), any::<i64>()).prop_map(|(path, n)| ValueOp::Set(path, n)),
        1 => (key_path(), prop::collection::vec(("[abc]", any::<i64>()), 0..3))
            .prop_map(|(path, fields)| ValueOp::SetObject(path, fields)),
        1 => key_path().prop_map(ValueOp::Remove),
    ]
}

fn value_deltas() -> impl Strategy<Value = Vec<ValueDelta>> {
    prop::collection::vec((0..SITES.len(), 0u64..5, value_op()), 1..25).prop_map(|ops| {
        let mut clocks: Vec<Hlc> = SITES.iter().map(|site| Hlc::init(*site, 0)).collect();
        ops.into_iter()
            .map(|(site, now, op)| {
                let stamp = clocks[site].tick_at(now).pack();
                match op {
                    ValueOp::Set(path, n) => {
                        ValueDelta::set(path, NestedValue::create_value(&json!(n), &stamp))
                    }
                    ValueOp::SetObject(path, fields) => {
                        let raw: serde_json::Map<String, serde_json::Value> =
                            fields.into_iter().map(|(k, v)| (k, json!(v))).collect();
                        ValueDelta::set(path, NestedValue::create_deep_map(&raw.into(), &stamp))
                    }
                    ValueOp::Remove(path) if path.is_empty() => ValueDelta::remove(stamp),
                    ValueOp::Remove(path) => ValueDelta::remove_at(path, stamp),
                }
            })
            .collect()
    })
}

fn apply_all(deltas: &[ValueDelta]) -> NestedValue {
    let mut value = NestedValue::create_empty();
    for delta in deltas {
        value.apply_delta(delta).unwrap();
    }
    value
}

proptest! {
    #[test]
    fn value_replicas_converge(deltas in value_deltas(), seed in any::<u64>()) {
        let in_order = apply_all(&deltas);

        let mut shuffled = deltas.clone();
        shuffled.extend(deltas.iter().take(3).cloned());
        permute(&mut shuffled, seed | 1);
        let out_of_order = apply_all(&shuffled);

        prop_assert_eq!(in_order.value(), out_of_order.value());
        prop_assert_eq!(&in_order, &out_of_order);
    }

    #[test]
    fn value_merge_is_a_lattice(
        a in value_deltas(),
        b in value_deltas(),
        c in value_deltas(),
    ) {
        let (a, b, c) = (apply_all(&a), apply_all(&b), apply_all(&c));
        let join = |x: &NestedValue, y: &NestedValue| {
            let mut out = x.clone();
            out.merge(y).unwrap();
            out
        };

        prop_assert_eq!(join(&a, &b), join(&b, &a));
        prop_assert_eq!(join(&join(&a, &b), &c), join(&a, &join(&b, &c)));
        prop_assert_eq!(join(&a, &a), a.clone());
        prop_assert_eq!(join(&a, &NestedValue::create_empty()), a);
    }

    #[test]
    fn lww_higher_stamp_wins(x in any::<i64>(), y in any::<i64>(), t1 in 1u64..1000, gap in 1u64..1000) {
        let early = Timestamp { physical_ms: t1, logical: 0, site: "alpha".into() }.pack();
        let late = Timestamp { physical_ms: t1 + gap, logical: 0, site: "bravo".into() }.pack();
        let first = ValueDelta::set(vec!["title".into()], NestedValue::create_value(&json!(x), &early));
        let second = ValueDelta::set(vec!["title".into()], NestedValue::create_value(&json!(y), &late));

        for order in [[&first, &second], [&second, &first]] {
            let mut value: NestedValue = NestedValue::create_empty();
            for delta in order {
                value.apply_delta(delta).unwrap();
            }
            prop_assert_eq!(value.value(), Some(json!({ "title": y })));
        }
    }
}

#[derive(Debug, Clone)]
enum DocOp {
    Title(i64),
    Body(String),
    Edit(TextOp),
    ClearBody,
}

fn doc_op() -> impl Strategy<Value = DocOp> {
    prop_oneof![
        1 => any::<i64>().prop_map(DocOp::Title),
        1 => "[a-z]{1,4}".prop_map(DocOp::Body),
        6 => text_op().prop_map(DocOp::Edit),
        1 => Just(DocOp::ClearBody),
    ]
}

fn doc_rounds() -> impl Strategy<Value = Vec<Vec<(usize, DocOp)>>> {
    prop::collection::vec(prop::collection::vec((0..SITES.len(), doc_op()), 0..8), 1..5)
}

fn run_doc_op(doc: &mut NestedValue, clock: &mut Hlc, op: &DocOp) -> Option<ValueDelta> {
    let body = vec!["body".to_string()];
    let stamp = clock.tick_at(0).pack();
    let delta = match op {
        DocOp::Title(n) => {
            ValueDelta::set(vec!["title".to_string()], NestedValue::create_value(&json!(n), &stamp))
        }
        DocOp::Body(text) => {
            let tree = TextTree::from_text(text, &stamp).unwrap();
            ValueDelta::set(body, NestedValue::create_embedded(tree, &stamp))
        }
        DocOp::ClearBody => ValueDelta::remove_at(body, stamp),
        DocOp::Edit(op) => {
            let len = doc.text_at(&body)?.len();
            // edits apply locally as they are made
            return match op {
                TextOp::Insert(at, text) => {
                    Some(doc.insert_text(&body, at.index(len + 1), text, &stamp).unwrap())
                }
                TextOp::Delete(_, _) if len == 0 => None,
                TextOp::Delete(at, n) => {
                    let pos = at.index(len);
                    Some(doc.delete_text(&body, pos, (*n).min(len - pos), &stamp).unwrap())
                }
            };
        }
    };
    doc.apply_delta(&delta).unwrap();
    Some(delta)
}

/// Apply `queue`, redelivering rejected deltas while that makes progress.
/// Returns the deltas that never applied.
fn deliver(doc: &mut NestedValue, mut queue: Vec<ValueDelta>) -> Vec<ValueDelta> {
    loop {
        let before = queue.len();
        queue.retain(|delta| doc.apply_delta(delta).is_err());
        if queue.is_empty() || queue.len() == before {
            return queue;
        }
    }
}

/// Sites edit one document with a rich-text body; every receiver gets the
/// round's deltas in arbitrary order, creations included.
fn simulate_docs(rounds: &[Vec<(usize, DocOp)>], seed: u64) -> Result<Vec<NestedValue>, TestCaseError> {
    let mut docs: Vec<NestedValue> = vec![NestedValue::create_empty(); SITES.len()];
    let mut clocks: Vec<Hlc> = SITES.iter().map(|site| Hlc::init(*site, 0)).collect();

    for (round, ops) in rounds.iter().enumerate() {
        let mut outboxes: Vec<Vec<ValueDelta>> = vec![Vec::new(); SITES.len()];
        for (site, op) in ops {
            if let Some(delta) = run_doc_op(&mut docs[*site], &mut clocks[*site], op) {
                outboxes[*site].push(delta);
            }
        }
        for (receiver, doc) in docs.iter_mut().enumerate() {
            let mut queue: Vec<ValueDelta> = outboxes
                .iter()
                .enumerate()
                .filter(|(site, _)| *site != receiver)
                .flat_map(|(_, queue)| queue.iter().cloned())
                .collect();
            permute(&mut queue, seed.wrapping_add((round * SITES.len() + receiver) as u64) | 1);
            let stuck = deliver(doc, queue);
            prop_assert!(stuck.is_empty(), "undeliverable: {:?}", stuck);
        }
        for doc in &mut docs {
            for delta in outboxes.iter().flatten() {
                prop_assert!(doc.apply_delta(delta).is_ok());
            }
        }
    }
    Ok(docs)
}

proptest! {
    #[test]
    fn rich_text_documents_converge(rounds in doc_rounds(), seed in any::<u64>()) {
        let docs = simulate_docs(&rounds, seed)?;
        for doc in &docs {
            prop_assert_eq!(doc.value(), docs[0].value());
        }

        let mut merged: NestedValue = NestedValue::create_empty();
        for doc in docs.iter().rev() {
            merged.merge(doc).unwrap();
        }
        prop_assert_eq!(merged.value(), docs[0].value());
    }
}

#[derive(Debug, Clone)]
enum ClockOp {
    Tick(u64),
    Receive(u64, u32, usize, u64),
}

fn clock_op() -> impl Strategy<Value = ClockOp> {
    prop_oneof![
        (0u64..50).prop_map(ClockOp::Tick),
        (0u64..50, 0u32..10, 0..SITES.len(), 0u64..50)
            .prop_map(|(physical, logical, site, now)| ClockOp::Receive(physical, logical, site, now)),
    ]
}

proptest! {
    #[test]
    fn clock_stamps_strictly_increase(ops in prop::collection::vec(clock_op(), 1..60)) {
        let mut clock = Hlc::init("local", 0);
        let mut previous = Stamp::zero();
        for op in ops {
            let stamp = match op {
                ClockOp::Tick(now) => clock.tick_at(now).pack(),
                ClockOp::Receive(physical, logical, site, now) => {
                    let remote = Timestamp { physical_ms: physical, logical, site: SITES[site].into() };
                    clock.update_at(&remote, now);
                    let current = clock.current().pack();
                    prop_assert!(current > remote.pack());
                    current
                }
            };
            prop_assert!(stamp > previous, "{} <= {}", stamp, previous);
            previous = stamp;
        }
    }
}
