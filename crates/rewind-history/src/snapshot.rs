#![forbid(unsafe_code)]

//! Portable snapshots of a history.
//!
//! A snapshot replaces live store handles with string ids so the history can
//! be persisted and later rebuilt against a different set of stores. The
//! wire shape is
//!
//! ```text
//! { "actions": [ { "type": "set", "storeId": "c1", "msg": "inc", "data": 1 }, ... ],
//!   "index": 1 }
//! ```
//!
//! | `type` | `storeId` | `data` |
//! |--------|-----------|--------|
//! | `init`   | absent   | absent |
//! | `group`  | absent   | nested action records |
//! | `set`    | required | next value |
//! | `mutate` | required | `{ patches, inversePatches }` |
//!
//! # Rebuilding previous values
//!
//! A set record only carries its next value. While decoding, the codec keeps
//! a shadow value per store: the first record touching a store starts from
//! the store's live value, every set advances the shadow to its next value
//! and every mutate advances it through its forward patch. Each decoded set
//! takes the shadow as its previous value, so a history loaded against stores
//! holding its starting values reverts exactly like the original. If a
//! forward patch cannot be applied the shadow is dropped and the next record
//! falls back to the live value; the patch error itself surfaces when the
//! action is applied.
//!
//! # Failure Modes
//!
//! Encode and decode are all-or-nothing: the first [`SnapshotError`] aborts
//! the call and no partial result is returned.

use std::collections::HashMap;
use std::rc::Rc;

use rewind_cell::patch::forward_ops;
use rewind_cell::{JsonPatcher, Observable, Patcher, StoreKey, StoreRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, ActionBody, ActionType};
use crate::error::SnapshotError;

// ============================================================================
// Wire records
// ============================================================================

/// Serialized form of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSnapshot<M> {
    /// Tag from the action type table.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "storeId", default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    pub msg: M,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Serialized form of a whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoStackSnapshot<M> {
    pub actions: Vec<ActionSnapshot<M>>,
    pub index: usize,
}

impl<M: Serialize> UndoStackSnapshot<M> {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<M> ActionSnapshot<M> {
    /// This record plus every record nested in it through group `data`.
    #[must_use]
    pub fn record_count(&self) -> usize {
        let nested = match (self.kind.as_str(), &self.data) {
            ("group", Some(data)) => nested_record_count(data),
            _ => 0,
        };
        1 + nested
    }
}

/// Records inside a raw group payload, counted before they are decoded.
fn nested_record_count(data: &Value) -> usize {
    data.as_array().map_or(0, |items| {
        items
            .iter()
            .map(|item| {
                let is_group = item.get("type").and_then(Value::as_str) == Some("group");
                let nested = match item.get("data") {
                    Some(inner) if is_group => nested_record_count(inner),
                    _ => 0,
                };
                1 + nested
            })
            .sum()
    })
}

impl<M> UndoStackSnapshot<M> {
    /// Action records at every nesting level, Init included.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.actions.iter().map(ActionSnapshot::record_count).sum()
    }
}

impl<M: DeserializeOwned> UndoStackSnapshot<M> {
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Store map
// ============================================================================

/// Bidirectional mapping between persistent ids and live stores.
///
/// Ids must be stable across runs for snapshots to stay loadable; the map
/// itself is never persisted.
#[derive(Debug, Clone, Default)]
pub struct StoreMap {
    by_id: HashMap<String, StoreRef>,
    by_key: HashMap<StoreKey, String>,
}

impl StoreMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under `id`, returning the store previously
    /// registered under that id.
    pub fn insert(&mut self, id: impl Into<String>, store: StoreRef) -> Option<StoreRef> {
        let id = id.into();
        let key = store.key();
        let previous = self.by_id.insert(id.clone(), store);
        self.by_key.insert(key, id.clone());
        if let Some(old) = &previous {
            let old_key = old.key();
            if old_key != key && self.by_key.get(&old_key) == Some(&id) {
                // The displaced store stays nameable through any other id.
                let other = self
                    .by_id
                    .iter()
                    .find(|(_, s)| s.key() == old_key)
                    .map(|(other, _)| other.clone());
                match other {
                    Some(other) => self.by_key.insert(old_key, other),
                    None => self.by_key.remove(&old_key),
                };
            }
        }
        previous
    }

    /// Builder form of [`StoreMap::insert`].
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, store: StoreRef) -> Self {
        self.insert(id, store);
        self
    }

    /// Register a typed observable.
    #[must_use]
    pub fn with_observable<T>(self, id: impl Into<String>, store: &Observable<T>) -> Self
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
    {
        self.with(id, store.store_ref())
    }

    /// Live store registered under `id`.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&StoreRef> {
        self.by_id.get(id)
    }

    /// Id a live store is registered under.
    #[must_use]
    pub fn id_of(&self, key: StoreKey) -> Option<&str> {
        self.by_key.get(&key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, StoreRef)> for StoreMap {
    fn from_iter<I: IntoIterator<Item = (S, StoreRef)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (id, store) in iter {
            map.insert(id, store);
        }
        map
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Converts between [`Action`] sequences and [`ActionSnapshot`] records.
#[derive(Clone)]
pub struct SnapshotCodec {
    patcher: Rc<dyn Patcher>,
}

impl std::fmt::Debug for SnapshotCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCodec").finish_non_exhaustive()
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new(Rc::new(JsonPatcher))
    }
}

impl SnapshotCodec {
    /// Codec handing `patcher` to every decoded mutate action.
    #[must_use]
    pub fn new(patcher: Rc<dyn Patcher>) -> Self {
        Self { patcher }
    }

    #[must_use]
    pub fn patcher(&self) -> &Rc<dyn Patcher> {
        &self.patcher
    }

    /// Encode `actions` in order, resolving stores through `stores`.
    pub fn encode<M>(
        &self,
        actions: &[Action<M>],
        stores: &StoreMap,
    ) -> Result<Vec<ActionSnapshot<M>>, SnapshotError>
    where
        M: Clone + Serialize,
    {
        actions
            .iter()
            .map(|action| encode_action(action, stores))
            .collect()
    }

    /// Rebuild actions from `records`, resolving ids through `stores`.
    ///
    /// Decoded actions are not applied and their sequence numbers are 0.
    pub fn decode<M>(
        &self,
        records: Vec<ActionSnapshot<M>>,
        stores: &StoreMap,
    ) -> Result<Vec<Action<M>>, SnapshotError>
    where
        M: DeserializeOwned,
    {
        let mut decoder = Decoder {
            stores,
            patcher: &self.patcher,
            shadow: HashMap::new(),
        };
        records
            .into_iter()
            .map(|record| decoder.decode(record))
            .collect()
    }
}

fn encode_action<M>(action: &Action<M>, stores: &StoreMap) -> Result<ActionSnapshot<M>, SnapshotError>
where
    M: Clone + Serialize,
{
    let kind = action.action_type();
    let store_id = match action.store() {
        Some(store) => {
            let key = store.key();
            let id = stores.id_of(key).ok_or(SnapshotError::MissingStoreId {
                action: kind,
                key: Some(key),
            })?;
            Some(id.to_owned())
        }
        None => None,
    };
    let data = match action.body() {
        ActionBody::Init => None,
        ActionBody::Group(children) => {
            let nested = children
                .iter()
                .map(|child| encode_action(child, stores))
                .collect::<Result<Vec<_>, _>>()?;
            Some(serde_json::to_value(nested)?)
        }
        ActionBody::Set { next, .. } => Some(next.clone()),
        ActionBody::Mutate { patch, .. } => Some(patch.clone()),
    };
    Ok(ActionSnapshot {
        kind: kind.as_str().to_owned(),
        store_id,
        msg: action.msg().clone(),
        data,
    })
}

struct Decoder<'a> {
    stores: &'a StoreMap,
    patcher: &'a Rc<dyn Patcher>,
    /// Value each store holds at the current decode position.
    shadow: HashMap<StoreKey, Value>,
}

impl Decoder<'_> {
    fn decode<M: DeserializeOwned>(
        &mut self,
        record: ActionSnapshot<M>,
    ) -> Result<Action<M>, SnapshotError> {
        let kind: ActionType = record.kind.parse()?;
        match kind {
            ActionType::Init => Ok(Action::init(record.msg)),
            ActionType::Group => {
                let data = record.data.ok_or_else(|| {
                    SnapshotError::MalformedGroup("group record has no data".into())
                })?;
                let nested: Vec<ActionSnapshot<M>> = serde_json::from_value(data)
                    .map_err(|e| SnapshotError::MalformedGroup(e.to_string()))?;
                let children = nested
                    .into_iter()
                    .map(|child| self.decode(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Action::group(record.msg, children))
            }
            ActionType::Set => {
                let store = self.resolve(kind, record.store_id.as_deref())?;
                let key = store.key();
                let next = record.data.unwrap_or(Value::Null);
                let previous = match self.shadow.remove(&key) {
                    Some(value) => value,
                    None => store.read()?,
                };
                self.shadow.insert(key, next.clone());
                Ok(Action::from_body(
                    record.msg,
                    ActionBody::Set {
                        store,
                        next,
                        previous,
                    },
                ))
            }
            ActionType::Mutate => {
                let store = self.resolve(kind, record.store_id.as_deref())?;
                let key = store.key();
                let patch = record.data.unwrap_or(Value::Null);
                let base = match self.shadow.remove(&key) {
                    Some(value) => value,
                    None => store.read()?,
                };
                if let Ok(ops) = forward_ops(&patch)
                    && let Ok(advanced) = self.patcher.apply_patch(base, ops)
                {
                    self.shadow.insert(key, advanced);
                }
                Ok(Action::mutate_with(
                    record.msg,
                    store,
                    patch,
                    Rc::clone(self.patcher),
                ))
            }
        }
    }

    fn resolve(&self, kind: ActionType, id: Option<&str>) -> Result<StoreRef, SnapshotError> {
        let id = id.ok_or(SnapshotError::MissingStoreId {
            action: kind,
            key: None,
        })?;
        self.stores
            .resolve(id)
            .cloned()
            .ok_or_else(|| SnapshotError::UnresolvedStoreId(id.to_owned()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::GroupAction;
    use crate::action::ActionSink;
    use rewind_cell::{MutatePatch, PatchOp, PathSegment};
    use serde_json::json;

    fn record(kind: &str, store_id: Option<&str>, msg: &str, data: Option<Value>) -> ActionSnapshot<String> {
        ActionSnapshot {
            kind: kind.into(),
            store_id: store_id.map(Into::into),
            msg: msg.into(),
            data,
        }
    }

    fn bump_patch() -> MutatePatch {
        MutatePatch::new(
            vec![PatchOp::replace([PathSegment::from("value")], json!(1))],
            vec![PatchOp::replace([PathSegment::from("value")], json!(0))],
        )
    }

    // ---- encode ----------------------------------------------------------

    #[test]
    fn encodes_init_without_store_or_data() {
        let codec = SnapshotCodec::default();
        let records = codec
            .encode(&[Action::init("InitAction".to_string())], &StoreMap::new())
            .unwrap();
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([{"type": "init", "msg": "InitAction"}])
        );
    }

    #[test]
    fn encodes_group_as_nested_records() {
        let store1 = Observable::new(0);
        let mut group = GroupAction::new("GroupAction".to_string());
        group.push(Action::set_observable("SetAction".to_string(), &store1, 1).unwrap());
        let stores = StoreMap::new().with_observable("store1", &store1);

        let records = SnapshotCodec::default()
            .encode(&[group.into_action()], &stores)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([{
                "type": "group",
                "msg": "GroupAction",
                "data": [{"type": "set", "storeId": "store1", "msg": "SetAction", "data": 1}]
            }])
        );
    }

    #[test]
    fn encodes_set_with_next_value() {
        let store1 = Observable::new(0);
        let stores = StoreMap::new().with_observable("store1", &store1);
        let action = Action::set_observable("SetAction".to_string(), &store1, 1).unwrap();

        let records = SnapshotCodec::default().encode(&[action], &stores).unwrap();
        assert_eq!(records, vec![record("set", Some("store1"), "SetAction", Some(json!(1)))]);
    }

    #[test]
    fn encodes_mutate_with_patch_payload() {
        let store1 = Observable::new(json!({"value": 0}));
        let stores = StoreMap::new().with_observable("store1", &store1);
        let action = Action::mutate("MutateAction".to_string(), store1.store_ref(), bump_patch());

        let records = SnapshotCodec::default().encode(&[action], &stores).unwrap();
        assert_eq!(
            records,
            vec![record(
                "mutate",
                Some("store1"),
                "MutateAction",
                Some(bump_patch().to_value())
            )]
        );
    }

    #[test]
    fn encode_fails_when_store_is_not_mapped() {
        let store1 = Observable::new(0);
        let action = Action::set_observable("SetAction".to_string(), &store1, 1).unwrap();

        let err = SnapshotCodec::default()
            .encode(&[action], &StoreMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::MissingStoreId { action: ActionType::Set, key: Some(k) } if k == store1.key()
        ));
    }

    #[test]
    fn encode_fails_for_unmapped_store_inside_group() {
        let store1 = Observable::new(0);
        let group = Action::group(
            "g".to_string(),
            vec![Action::set_observable("s".to_string(), &store1, 1).unwrap()],
        );
        let err = SnapshotCodec::default()
            .encode(&[group], &StoreMap::new())
            .unwrap_err();
        assert!(matches!(err, SnapshotError::MissingStoreId { .. }));
    }

    // ---- decode ----------------------------------------------------------

    #[test]
    fn decodes_init() {
        let actions = SnapshotCodec::default()
            .decode(vec![record("init", None, "InitAction", None)], &StoreMap::new())
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Init);
        assert!(actions[0].store().is_none());
        assert_eq!(actions[0].msg(), "InitAction");
        actions[0].apply().unwrap();
        actions[0].revert().unwrap();
    }

    #[test]
    fn decodes_group_and_applies_children() {
        let store1 = Observable::new(0);
        let stores = StoreMap::new().with_observable("store1", &store1);
        let group = record(
            "group",
            None,
            "GroupAction",
            Some(json!([{"type": "set", "storeId": "store1", "msg": "SetAction", "data": 1}])),
        );

        let actions = SnapshotCodec::default().decode(vec![group], &stores).unwrap();
        assert_eq!(actions[0].action_type(), ActionType::Group);
        assert!(actions[0].store().is_none());

        actions[0].apply().unwrap();
        assert_eq!(store1.get(), 1);
        actions[0].revert().unwrap();
        assert_eq!(store1.get(), 0);
    }

    #[test]
    fn decodes_set_and_mutate() {
        let counter = Observable::new(0);
        let doc = Observable::new(json!({"value": 0}));
        let stores = StoreMap::new()
            .with_observable("counter", &counter)
            .with_observable("doc", &doc);

        let actions = SnapshotCodec::default()
            .decode(
                vec![
                    record("set", Some("counter"), "SetAction", Some(json!(1))),
                    record("mutate", Some("doc"), "MutateAction", Some(bump_patch().to_value())),
                ],
                &stores,
            )
            .unwrap();

        assert_eq!(actions[0].store_key(), Some(counter.key()));
        actions[0].apply().unwrap();
        assert_eq!(counter.get(), 1);
        actions[0].revert().unwrap();
        assert_eq!(counter.get(), 0);

        actions[1].apply().unwrap();
        assert_eq!(doc.get(), json!({"value": 1}));
        actions[1].revert().unwrap();
        assert_eq!(doc.get(), json!({"value": 0}));
    }

    #[test]
    fn decode_rebuilds_previous_values_along_the_chain() {
        let counter = Observable::new(0);
        let stores = StoreMap::new().with_observable("c", &counter);
        let actions = SnapshotCodec::default()
            .decode(
                vec![
                    record("set", Some("c"), "one", Some(json!(1))),
                    record("set", Some("c"), "two", Some(json!(2))),
                ],
                &stores,
            )
            .unwrap();

        actions[0].apply().unwrap();
        actions[1].apply().unwrap();
        assert_eq!(counter.get(), 2);
        actions[1].revert().unwrap();
        assert_eq!(counter.get(), 1, "second set reverts to the first set's value");
        actions[0].revert().unwrap();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn decode_rejects_store_backed_records_without_store_id() {
        let stores = StoreMap::new().with_observable("store1", &Observable::new(0));
        for kind in ["set", "mutate"] {
            let err = SnapshotCodec::default()
                .decode(vec![record(kind, None, "x", Some(json!(1)))], &stores)
                .unwrap_err();
            assert!(
                matches!(err, SnapshotError::MissingStoreId { key: None, .. }),
                "{kind}: {err}"
            );
        }
    }

    #[test]
    fn decode_rejects_unknown_ids_and_types() {
        let stores = StoreMap::new().with_observable("store1", &Observable::new(0));

        let err = SnapshotCodec::default()
            .decode(vec![record("set", Some("nope"), "x", Some(json!(1)))], &stores)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::UnresolvedStoreId(id) if id == "nope"));

        let err = SnapshotCodec::default()
            .decode(vec![record("foo", Some("store1"), "FooAction", None)], &stores)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::UnknownActionType(tag) if tag == "foo"));
    }

    #[test]
    fn decode_rejects_group_without_record_list() {
        let err = SnapshotCodec::default()
            .decode(vec![record("group", None, "g", Some(json!(3)))], &StoreMap::new())
            .unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedGroup(_)));

        let err = SnapshotCodec::default()
            .decode(vec![record("group", None, "g", None)], &StoreMap::new())
            .unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedGroup(_)));
    }

    #[test]
    fn decode_accepts_malformed_mutate_payload_until_applied() {
        let doc = Observable::new(json!({"value": 0}));
        let stores = StoreMap::new().with_observable("doc", &doc);
        let actions = SnapshotCodec::default()
            .decode(vec![record("mutate", Some("doc"), "m", Some(json!("garbage")))], &stores)
            .unwrap();
        assert!(actions[0].apply().is_err());
    }

    // ---- store map -------------------------------------------------------

    #[test]
    fn store_map_resolves_both_directions() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let map: StoreMap = [("a", a.store_ref()), ("b", b.store_ref())]
            .into_iter()
            .collect();

        assert_eq!(map.len(), 2);
        assert_eq!(map.id_of(a.key()), Some("a"));
        assert_eq!(map.resolve("b").map(|s| s.key()), Some(b.key()));
        assert!(map.resolve("c").is_none());
    }

    #[test]
    fn store_map_reregistering_an_id_forgets_the_old_store() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let mut map = StoreMap::new();
        map.insert("x", a.store_ref());
        let old = map.insert("x", b.store_ref());

        assert_eq!(old.map(|s| s.key()), Some(a.key()));
        assert_eq!(map.id_of(a.key()), None);
        assert_eq!(map.id_of(b.key()), Some("x"));
    }

    #[test]
    fn store_map_rebinding_an_alias_keeps_the_other_id() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let mut map = StoreMap::new();
        map.insert("y", a.store_ref());
        map.insert("x", a.store_ref());
        map.insert("x", b.store_ref());

        assert_eq!(map.resolve("y").map(|s| s.key()), Some(a.key()));
        assert_eq!(map.id_of(a.key()), Some("y"));
        assert_eq!(map.id_of(b.key()), Some("x"));

        let action = Action::set_observable("s".to_string(), &a, 5).unwrap();
        let records = SnapshotCodec::default().encode(&[action], &map).unwrap();
        assert_eq!(records[0].store_id.as_deref(), Some("y"));
    }

    #[test]
    fn record_count_includes_nested_group_records() {
        let inner_group = json!({
            "type": "group",
            "msg": "inner",
            "data": [{"type": "init", "msg": "a"}, {"type": "init", "msg": "b"}]
        });
        let snapshot = UndoStackSnapshot {
            actions: vec![
                record("init", None, "start", None),
                record("group", None, "outer", Some(json!([inner_group, {"type": "init", "msg": "c"}]))),
                record("set", Some("s"), "set", Some(json!([1, 2]))),
            ],
            index: 0,
        };
        // start, outer, inner, a, b, c, set
        assert_eq!(snapshot.record_count(), 7);
        assert_eq!(snapshot.actions[2].record_count(), 1, "set data is never nested records");
    }

    #[test]
    fn snapshot_json_omits_absent_fields() {
        let snapshot = UndoStackSnapshot {
            actions: vec![record("init", None, "start", None)],
            index: 0,
        };
        let text = snapshot.to_json().unwrap();
        assert_eq!(text, r#"{"actions":[{"type":"init","msg":"start"}],"index":0}"#);
        assert_eq!(UndoStackSnapshot::<String>::from_json(&text).unwrap(), snapshot);
        assert!(matches!(
            UndoStackSnapshot::<String>::from_json("{"),
            Err(SnapshotError::Json(_))
        ));
    }
}
