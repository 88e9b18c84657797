#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewind_cell::{JsonPatcher, PatchOp, Patcher, PathSegment};
use serde_json::{Value, json};

#[derive(Debug, Arbitrary)]
enum Segment {
    Key(u8),
    Index(u8),
}

#[derive(Debug, Arbitrary)]
enum Kind {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Arbitrary)]
struct Op {
    kind: Kind,
    path: Vec<Segment>,
    value: Option<i32>,
}

fuzz_target!(|ops: Vec<Op>| {
    // Structured patch lists against a small nested document. Applying must
    // never panic, and a failing list must not be partially observable.
    let start = json!({"a": [1, 2, {"b": 3}], "c": {"d": [4]}});

    let list: Vec<PatchOp> = ops
        .iter()
        .take(32)
        .map(|op| {
            let path: Vec<PathSegment> = op
                .path
                .iter()
                .take(6)
                .map(|segment| match segment {
                    Segment::Key(k) => PathSegment::from(["a", "b", "c", "d"][usize::from(*k % 4)]),
                    Segment::Index(i) => PathSegment::from(usize::from(*i % 5)),
                })
                .collect();
            let value = json!(op.value);
            match op.kind {
                Kind::Add => PatchOp::add(path, value),
                Kind::Replace => PatchOp::replace(path, value),
                Kind::Remove => PatchOp::remove(path),
            }
        })
        .collect();
    let payload = Value::Array(list.iter().map(PatchOp::to_value).collect());

    // Wire form must parse back to the same ops.
    for (raw, op) in payload.as_array().into_iter().flatten().zip(&list) {
        assert_eq!(PatchOp::from_value(raw).as_ref(), Ok(op));
    }

    let _ = JsonPatcher.apply_patch(start, &payload);
});
