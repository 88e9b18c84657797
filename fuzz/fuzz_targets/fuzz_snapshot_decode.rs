#![no_main]

use libfuzzer_sys::fuzz_target;
use rewind_cell::Observable;
use rewind_history::{HistoryConfig, StoreMap, UndoStack};
use serde_json::{Value, json};

fuzz_target!(|data: &[u8]| {
    // Arbitrary text as snapshot JSON. Loading must either fail cleanly or
    // produce a stack that can be walked end to end without panicking.
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let counter = Observable::new(0_i64);
    let doc = Observable::new(json!({"value": 0, "items": []}));
    let stores = StoreMap::new()
        .with_observable("counter", &counter)
        .with_observable("doc", &doc);

    let config = HistoryConfig::default().with_max_snapshot_actions(256);
    let mut stack: UndoStack<Value> = UndoStack::with_config(Value::Null, config);
    if stack.load_snapshot_json(text, &stores).is_err() {
        assert_eq!(stack.len(), 1, "failed load must leave the stack untouched");
        return;
    }

    assert!(stack.index() < stack.len());
    assert_eq!(stack.ticker(), stack.len() as u64);

    // Walk to both ends; individual actions may fail, the walk may not panic.
    let first = stack.actions()[0].seq_nbr();
    let last = stack.actions()[stack.len() - 1].seq_nbr();
    let _ = stack.goto(last);
    assert!(stack.index() < stack.len());
    let _ = stack.goto(first);
    assert!(stack.index() < stack.len());
    while let Ok(true) = stack.redo() {}
    while let Ok(true) = stack.undo() {}
});
