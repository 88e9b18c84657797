#![forbid(unsafe_code)]

//! Reversible actions recorded by the history stack.
//!
//! An [`Action`] is one undoable step. Its [`ActionBody`] is a closed set of
//! variants, and [`ActionType`] is the tag table shared by apply dispatch and
//! the snapshot codec:
//!
//! | Variant | Store | Payload | apply | revert |
//! |---------|-------|---------|-------|--------|
//! | `Init`   | -   | -                         | no-op | no-op |
//! | `Group`  | -   | child actions             | children in order | children in reverse |
//! | `Set`    | yes | next + previous value     | write next | write previous |
//! | `Mutate` | yes | forward + inverse patches | patch forward | patch inverse |
//!
//! # Invariants
//!
//! - "Previous" state (the value for `Set`, the inverse patch for `Mutate`)
//!   is captured when the action is built, never when it is applied.
//! - `apply()` followed by `revert()` restores the store exactly, provided
//!   nothing else wrote the store in between.
//! - Group child order is preserved through snapshots.
//!
//! # Failure Modes
//!
//! - **Store type mismatch**: a `Set` whose value does not deserialize into
//!   the store's type fails with [`ActionError::Store`] and leaves the store
//!   untouched.
//! - **Bad patch**: a `Mutate` payload the [`Patcher`] rejects fails with
//!   [`ActionError::Patch`]. Payload shape is only checked here, not when a
//!   snapshot is decoded.
//! - **Partial group**: if a child fails while a group applies, the children
//!   already applied are reverted before the error is returned.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use rewind_cell::patch::{forward_ops, inverse_ops};
use rewind_cell::{
    JsonPatcher, MutatePatch, Observable, Patcher, StoreError, StoreKey, StoreRef,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ActionError, SnapshotError};

// ============================================================================
// Tag table
// ============================================================================

/// Discriminant of an [`ActionBody`], with its snapshot tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Init,
    Group,
    Set,
    Mutate,
}

impl ActionType {
    /// Every action type, in tag-table order.
    pub const ALL: [ActionType; 4] = [Self::Init, Self::Group, Self::Set, Self::Mutate];

    /// Snapshot tag written to the `type` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Group => "group",
            Self::Set => "set",
            Self::Mutate => "mutate",
        }
    }

    /// Whether actions of this type reference a store.
    #[must_use]
    pub const fn requires_store(self) -> bool {
        match self {
            Self::Init | Self::Group => false,
            Self::Set | Self::Mutate => true,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = SnapshotError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| SnapshotError::UnknownActionType(tag.to_owned()))
    }
}

// ============================================================================
// Action
// ============================================================================

/// Variant-specific data of an action.
#[derive(Clone)]
pub enum ActionBody<M> {
    /// Root of every history. Does nothing.
    Init,
    /// Several actions undone and redone as one step.
    Group(Vec<Action<M>>),
    /// Whole-value replacement of a store.
    Set {
        store: StoreRef,
        next: Value,
        previous: Value,
    },
    /// Structural change of a store value through forward/inverse patches.
    Mutate {
        store: StoreRef,
        /// Raw `{ patches, inversePatches }` payload.
        patch: Value,
        patcher: Rc<dyn Patcher>,
    },
}

impl<M: fmt::Debug> fmt::Debug for ActionBody<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("Init"),
            Self::Group(children) => f.debug_tuple("Group").field(children).finish(),
            Self::Set {
                store,
                next,
                previous,
            } => f
                .debug_struct("Set")
                .field("store", &store.key())
                .field("next", next)
                .field("previous", previous)
                .finish(),
            Self::Mutate { store, patch, .. } => f
                .debug_struct("Mutate")
                .field("store", &store.key())
                .field("patch", patch)
                .finish_non_exhaustive(),
        }
    }
}

/// One reversible operation with a label and a sequence number.
///
/// The sequence number is 0 until the action is pushed onto an
/// [`UndoStack`](crate::UndoStack), which is the only place it is assigned.
#[derive(Clone)]
pub struct Action<M> {
    msg: M,
    seq_nbr: u64,
    body: ActionBody<M>,
}

impl<M: fmt::Debug> fmt::Debug for Action<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("msg", &self.msg)
            .field("seq_nbr", &self.seq_nbr)
            .field("body", &self.body)
            .finish()
    }
}

impl<M> Action<M> {
    /// Build an action from its parts.
    #[must_use]
    pub fn from_body(msg: M, body: ActionBody<M>) -> Self {
        Self {
            msg,
            seq_nbr: 0,
            body,
        }
    }

    /// The no-op root action.
    #[must_use]
    pub fn init(msg: M) -> Self {
        Self::from_body(msg, ActionBody::Init)
    }

    /// A group of already-built children.
    #[must_use]
    pub fn group(msg: M, children: Vec<Action<M>>) -> Self {
        Self::from_body(msg, ActionBody::Group(children))
    }

    /// Replace the value of `store` with `next`.
    ///
    /// The store's current value is read now and kept for `revert`.
    pub fn set(msg: M, store: StoreRef, next: Value) -> Result<Self, StoreError> {
        let previous = store.read()?;
        Ok(Self::from_body(
            msg,
            ActionBody::Set {
                store,
                next,
                previous,
            },
        ))
    }

    /// Typed variant of [`Action::set`] for an [`Observable`].
    pub fn set_observable<T>(msg: M, store: &Observable<T>, next: T) -> Result<Self, StoreError>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
    {
        let next = serde_json::to_value(&next).map_err(|source| StoreError::Encode {
            key: store.key(),
            source,
        })?;
        Self::set(msg, store.store_ref(), next)
    }

    /// Build a set action whose next value is computed from the current one.
    pub fn update_observable<T>(
        msg: M,
        store: &Observable<T>,
        f: impl FnOnce(&T) -> T,
    ) -> Result<Self, StoreError>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
    {
        let next = store.with(f);
        Self::set_observable(msg, store, next)
    }

    /// Patch `store` with the default [`JsonPatcher`].
    #[must_use]
    pub fn mutate(msg: M, store: StoreRef, patch: MutatePatch) -> Self {
        Self::mutate_with(msg, store, patch.to_value(), Rc::new(JsonPatcher))
    }

    /// Patch `store` with a raw payload and a caller-supplied patcher.
    #[must_use]
    pub fn mutate_with(msg: M, store: StoreRef, patch: Value, patcher: Rc<dyn Patcher>) -> Self {
        Self::from_body(
            msg,
            ActionBody::Mutate {
                store,
                patch,
                patcher,
            },
        )
    }

    #[must_use]
    pub fn msg(&self) -> &M {
        &self.msg
    }

    #[must_use]
    pub fn seq_nbr(&self) -> u64 {
        self.seq_nbr
    }

    pub(crate) fn set_seq_nbr(&mut self, seq_nbr: u64) {
        self.seq_nbr = seq_nbr;
    }

    #[must_use]
    pub fn body(&self) -> &ActionBody<M> {
        &self.body
    }

    #[must_use]
    pub fn action_type(&self) -> ActionType {
        match &self.body {
            ActionBody::Init => ActionType::Init,
            ActionBody::Group(_) => ActionType::Group,
            ActionBody::Set { .. } => ActionType::Set,
            ActionBody::Mutate { .. } => ActionType::Mutate,
        }
    }

    /// The store this action writes, if it is store-backed.
    #[must_use]
    pub fn store(&self) -> Option<&StoreRef> {
        match &self.body {
            ActionBody::Set { store, .. } | ActionBody::Mutate { store, .. } => Some(store),
            ActionBody::Init | ActionBody::Group(_) => None,
        }
    }

    #[must_use]
    pub fn store_key(&self) -> Option<StoreKey> {
        self.store().map(|store| store.key())
    }

    /// Child actions of a group; empty for every other variant.
    #[must_use]
    pub fn children(&self) -> &[Action<M>] {
        match &self.body {
            ActionBody::Group(children) => children,
            _ => &[],
        }
    }

    /// Apply the action's effect.
    pub fn apply(&self) -> Result<(), ActionError> {
        match &self.body {
            ActionBody::Init => Ok(()),
            ActionBody::Group(children) => {
                for (done, child) in children.iter().enumerate() {
                    if let Err(err) = child.apply() {
                        for applied in children[..done].iter().rev() {
                            if let Err(rollback) = applied.revert() {
                                tracing::warn!(
                                    error = %rollback,
                                    "group rollback left a child applied"
                                );
                            }
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
            ActionBody::Set { store, next, .. } => Ok(store.write(next.clone())?),
            ActionBody::Mutate {
                store,
                patch,
                patcher,
            } => patch_store(store, patcher.as_ref(), forward_ops(patch)),
        }
    }

    /// Undo the action's effect.
    pub fn revert(&self) -> Result<(), ActionError> {
        match &self.body {
            ActionBody::Init => Ok(()),
            ActionBody::Group(children) => {
                for child in children.iter().rev() {
                    child.revert()?;
                }
                Ok(())
            }
            ActionBody::Set {
                store, previous, ..
            } => Ok(store.write(previous.clone())?),
            ActionBody::Mutate {
                store,
                patch,
                patcher,
            } => patch_store(store, patcher.as_ref(), inverse_ops(patch)),
        }
    }
}

fn patch_store(
    store: &StoreRef,
    patcher: &dyn Patcher,
    ops: Result<&Value, rewind_cell::PatchError>,
) -> Result<(), ActionError> {
    let key = store.key();
    let ops = ops.map_err(|source| ActionError::Patch { key, source })?;
    let current = store.read()?;
    let patched = patcher
        .apply_patch(current, ops)
        .map_err(|source| ActionError::Patch { key, source })?;
    store.write(patched)?;
    Ok(())
}

// ============================================================================
// Recording targets
// ============================================================================

/// Something actions can be recorded into: a history stack or a group under
/// construction.
pub trait ActionSink<M> {
    fn push(&mut self, action: Action<M>);
}

/// Builder for a [`ActionBody::Group`] action.
#[derive(Debug, Clone)]
pub struct GroupAction<M> {
    msg: M,
    children: Vec<Action<M>>,
}

impl<M> GroupAction<M> {
    #[must_use]
    pub fn new(msg: M) -> Self {
        Self {
            msg,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn into_action(self) -> Action<M> {
        Action::group(self.msg, self.children)
    }
}

impl<M> ActionSink<M> for GroupAction<M> {
    fn push(&mut self, action: Action<M>) {
        self.children.push(action);
    }
}

impl<M> From<GroupAction<M>> for Action<M> {
    fn from(group: GroupAction<M>) -> Self {
        group.into_action()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_cell::{PatchOp, PathSegment, Store};
    use serde_json::json;
    use std::cell::RefCell;

    /// Store that records every write, for ordering assertions.
    struct RecordingStore {
        key: StoreKey,
        value: RefCell<Value>,
        writes: RefCell<Vec<Value>>,
    }

    impl RecordingStore {
        fn new(value: Value) -> Rc<Self> {
            Rc::new(Self {
                key: StoreKey::next(),
                value: RefCell::new(value),
                writes: RefCell::new(Vec::new()),
            })
        }
    }

    impl Store for RecordingStore {
        fn key(&self) -> StoreKey {
            self.key
        }

        fn read(&self) -> Result<Value, StoreError> {
            Ok(self.value.borrow().clone())
        }

        fn write(&self, value: Value) -> Result<(), StoreError> {
            self.writes.borrow_mut().push(value.clone());
            *self.value.borrow_mut() = value;
            Ok(())
        }
    }

    #[test]
    fn tag_table_is_total_and_round_trips() {
        for kind in ActionType::ALL {
            assert_eq!(kind.as_str().parse::<ActionType>().unwrap(), kind);
        }
        assert!(matches!(
            "foo".parse::<ActionType>(),
            Err(SnapshotError::UnknownActionType(tag)) if tag == "foo"
        ));
        assert!(!ActionType::Init.requires_store());
        assert!(!ActionType::Group.requires_store());
        assert!(ActionType::Set.requires_store());
        assert!(ActionType::Mutate.requires_store());
    }

    #[test]
    fn init_is_a_no_op() {
        let action = Action::init("start");
        assert_eq!(action.action_type(), ActionType::Init);
        assert!(action.store().is_none());
        action.apply().unwrap();
        action.revert().unwrap();
    }

    #[test]
    fn set_captures_previous_at_construction() {
        let cell = Observable::new(0_i32);
        let action = Action::set_observable("inc", &cell, 1).unwrap();

        // External change after construction must not affect revert.
        cell.set(5);
        action.apply().unwrap();
        assert_eq!(cell.get(), 1);
        action.revert().unwrap();
        assert_eq!(cell.get(), 0);
        assert_eq!(action.store_key(), Some(cell.key()));
    }

    #[test]
    fn update_observable_reads_current_value() {
        let cell = Observable::new(vec![1, 2]);
        let action = Action::update_observable("push", &cell, |v| {
            let mut next = v.clone();
            next.push(3);
            next
        })
        .unwrap();

        action.apply().unwrap();
        assert_eq!(cell.get(), vec![1, 2, 3]);
        action.revert().unwrap();
        assert_eq!(cell.get(), vec![1, 2]);
    }

    #[test]
    fn mutate_applies_forward_and_inverse_patches() {
        let cell = Observable::new(json!({"value": 0, "other": "kept"}));
        let action = Action::mutate(
            "bump",
            cell.store_ref(),
            MutatePatch::new(
                vec![PatchOp::replace([PathSegment::from("value")], json!(1))],
                vec![PatchOp::replace([PathSegment::from("value")], json!(0))],
            ),
        );

        action.apply().unwrap();
        assert_eq!(cell.get(), json!({"value": 1, "other": "kept"}));
        action.revert().unwrap();
        assert_eq!(cell.get(), json!({"value": 0, "other": "kept"}));
    }

    #[test]
    fn malformed_mutate_payload_fails_at_apply_time() {
        let cell = Observable::new(json!({"value": 0}));
        let action = Action::mutate_with(
            "broken",
            cell.store_ref(),
            json!({"patches": "nope"}),
            Rc::new(JsonPatcher),
        );

        assert!(matches!(action.apply(), Err(ActionError::Patch { .. })));
        assert!(matches!(action.revert(), Err(ActionError::Patch { .. })));
        assert_eq!(cell.get(), json!({"value": 0}));
    }

    #[test]
    fn group_applies_in_order_and_reverts_in_reverse() {
        let store = RecordingStore::new(json!(0));
        let erased: StoreRef = store.clone();
        let mut group = GroupAction::new("both");
        group.push(Action::set("a", Rc::clone(&erased), json!(1)).unwrap());
        group.push(
            Action::from_body(
                "b",
                ActionBody::Set {
                    store: Rc::clone(&erased),
                    next: json!(2),
                    previous: json!(1),
                },
            ),
        );
        assert_eq!(group.len(), 2);
        let action: Action<&str> = group.into();

        action.apply().unwrap();
        action.revert().unwrap();
        assert_eq!(
            *store.writes.borrow(),
            vec![json!(1), json!(2), json!(1), json!(0)]
        );
        assert_eq!(action.children().len(), 2);
        assert_eq!(action.children()[0].msg(), &"a");
    }

    #[test]
    fn failing_child_rolls_back_applied_siblings() {
        let good = Observable::new(0_i32);
        let strict = Observable::new(0_i32);
        let children = vec![
            Action::set_observable("good", &good, 7).unwrap(),
            Action::set("bad", strict.store_ref(), json!("not an int")).unwrap(),
        ];
        let group = Action::group("all", children);

        let err = group.apply().unwrap_err();
        assert!(matches!(err, ActionError::Store(StoreError::Decode { .. })));
        assert_eq!(good.get(), 0, "first child rolled back");
    }

    #[test]
    fn fresh_actions_have_zero_seq_nbr() {
        let mut action = Action::init(());
        assert_eq!(action.seq_nbr(), 0);
        action.set_seq_nbr(9);
        assert_eq!(action.seq_nbr(), 9);
    }

    #[test]
    fn debug_shows_variant_and_store_key() {
        let cell = Observable::new(1_u8);
        let action = Action::set_observable("x", &cell, 2).unwrap();
        let text = format!("{action:?}");
        assert!(text.contains("Set"));
        assert!(text.contains("seq_nbr"));
    }
}
