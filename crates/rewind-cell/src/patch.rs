#![forbid(unsafe_code)]

//! Structural patches over JSON store values.
//!
//! A mutate action carries a forward patch list and an inverse patch list.
//! Each entry is a [`PatchOp`] with the wire shape
//!
//! ```text
//! { "op": "replace", "path": ["items", 0, "done"], "value": true }
//! ```
//!
//! where path segments are object keys (strings) or array indices
//! (non-negative integers). The [`Patcher`] trait applies such a list to a
//! value; [`JsonPatcher`] is the default implementation.
//!
//! Computing patches (diffing two values) is out of scope: callers hand in
//! pre-computed forward and inverse lists.
//!
//! # Semantics of [`JsonPatcher`]
//!
//! | op | object parent | array parent | empty path |
//! |----|---------------|--------------|------------|
//! | `replace` | set key (inserting if absent) | overwrite index `< len` | replace root |
//! | `add` | set key | insert at index `<= len` | replace root |
//! | `remove` | delete existing key | remove index `< len` | error |
//!
//! Ops apply in list order; the first failing op aborts the whole list and
//! the input value is discarded.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Kind of a single patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

impl PatchKind {
    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        }
    }
}

/// One step of a path into a JSON value: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// A single structural change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    #[serde(rename = "op")]
    pub kind: PatchKind,
    pub path: Vec<PathSegment>,
    /// New value for `add`/`replace`; ignored by `remove`. An explicit
    /// `null` on the wire is a value, not an absence.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

fn present_value<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(de).map(Some)
}

impl PatchOp {
    #[must_use]
    pub fn replace(path: impl IntoIterator<Item = PathSegment>, value: Value) -> Self {
        Self {
            kind: PatchKind::Replace,
            path: path.into_iter().collect(),
            value: Some(value),
        }
    }

    #[must_use]
    pub fn add(path: impl IntoIterator<Item = PathSegment>, value: Value) -> Self {
        Self {
            kind: PatchKind::Add,
            path: path.into_iter().collect(),
            value: Some(value),
        }
    }

    #[must_use]
    pub fn remove(path: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            kind: PatchKind::Remove,
            path: path.into_iter().collect(),
            value: None,
        }
    }

    /// Render the op in its wire shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Parse and validate one op from its wire shape.
    pub fn from_value(raw: &Value) -> Result<Self, PatchError> {
        let op = Self::deserialize(raw).map_err(|e| PatchError::Malformed(format!("{e} in {raw}")))?;
        op.validate()?;
        Ok(op)
    }

    /// `add` and `replace` must carry a value.
    pub fn validate(&self) -> Result<(), PatchError> {
        if self.kind != PatchKind::Remove && self.value.is_none() {
            return Err(PatchError::Malformed(format!(
                "{} op without value at {}",
                self.kind.as_str(),
                display_path(&self.path)
            )));
        }
        Ok(())
    }
}

/// Parse and validate a JSON array of ops.
pub fn parse_ops(raw: &Value) -> Result<Vec<PatchOp>, PatchError> {
    let ops = Vec::<PatchOp>::deserialize(raw)
        .map_err(|e| PatchError::Malformed(format!("patch list: {e}")))?;
    ops.iter().try_for_each(PatchOp::validate)?;
    Ok(ops)
}

/// Payload of a mutate action: the forward list and the list that undoes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutatePatch {
    pub patches: Vec<PatchOp>,
    pub inverse_patches: Vec<PatchOp>,
}

impl MutatePatch {
    #[must_use]
    pub fn new(patches: Vec<PatchOp>, inverse_patches: Vec<PatchOp>) -> Self {
        Self {
            patches,
            inverse_patches,
        }
    }

    /// Wire shape `{ "patches": [...], "inversePatches": [...] }`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_value(raw: &Value) -> Result<Self, PatchError> {
        let patch = Self::deserialize(raw)
            .map_err(|e| PatchError::Malformed(format!("mutate payload: {e}")))?;
        patch
            .patches
            .iter()
            .chain(&patch.inverse_patches)
            .try_for_each(PatchOp::validate)?;
        Ok(patch)
    }
}

impl From<MutatePatch> for Value {
    fn from(patch: MutatePatch) -> Self {
        patch.to_value()
    }
}

/// The forward list inside a raw mutate payload.
pub fn forward_ops(payload: &Value) -> Result<&Value, PatchError> {
    payload
        .get("patches")
        .ok_or_else(|| PatchError::Malformed("mutate payload has no `patches`".into()))
}

/// The inverse list inside a raw mutate payload.
pub fn inverse_ops(payload: &Value) -> Result<&Value, PatchError> {
    payload
        .get("inversePatches")
        .ok_or_else(|| PatchError::Malformed("mutate payload has no `inversePatches`".into()))
}

/// Errors raised while applying a patch list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The payload does not have the patch wire shape.
    Malformed(String),
    /// An object key along the path does not exist.
    PathNotFound(String),
    /// An array index along the path is out of range.
    IndexOutOfBounds { path: String, index: usize, len: usize },
    /// A path step addresses into a scalar, or a key into an array.
    NotAContainer(String),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed patch: {msg}"),
            Self::PathNotFound(path) => write!(f, "patch path not found: {path}"),
            Self::IndexOutOfBounds { path, index, len } => {
                write!(f, "patch index {index} out of bounds (length {len}) at {path}")
            }
            Self::NotAContainer(path) => write!(f, "patch path addresses into a scalar: {path}"),
        }
    }
}

impl std::error::Error for PatchError {}

/// Applies a patch list to a store value.
pub trait Patcher {
    /// Apply `ops` (a JSON array in [`PatchOp`] wire shape) to `value`.
    fn apply_patch(&self, value: Value, ops: &Value) -> Result<Value, PatchError>;
}

/// Default [`Patcher`] for the op shape documented at module level.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPatcher;

impl Patcher for JsonPatcher {
    fn apply_patch(&self, mut value: Value, ops: &Value) -> Result<Value, PatchError> {
        for op in parse_ops(ops)? {
            apply_op(&mut value, &op)?;
        }
        Ok(value)
    }
}

fn display_path(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("/{}", parts.join("/"))
}

fn apply_op(root: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let Some((last, parents)) = op.path.split_last() else {
        return match op.kind {
            PatchKind::Remove => Err(PatchError::Malformed("cannot remove the root value".into())),
            PatchKind::Add | PatchKind::Replace => {
                *root = op.value.clone().unwrap_or(Value::Null);
                Ok(())
            }
        };
    };

    let mut target = root;
    for (depth, segment) in parents.iter().enumerate() {
        let here = || display_path(&op.path[..=depth]);
        target = match (target, segment) {
            (Value::Object(map), PathSegment::Key(key)) => {
                map.get_mut(key).ok_or_else(|| PatchError::PathNotFound(here()))?
            }
            (Value::Array(items), PathSegment::Index(index)) => {
                let len = items.len();
                items.get_mut(*index).ok_or(PatchError::IndexOutOfBounds {
                    path: here(),
                    index: *index,
                    len,
                })?
            }
            _ => return Err(PatchError::NotAContainer(here())),
        };
    }

    let path = || display_path(&op.path);
    let value = || op.value.clone().unwrap_or(Value::Null);
    match (target, last, op.kind) {
        (Value::Object(map), PathSegment::Key(key), PatchKind::Add | PatchKind::Replace) => {
            map.insert(key.clone(), value());
        }
        (Value::Object(map), PathSegment::Key(key), PatchKind::Remove) => {
            map.remove(key).ok_or_else(|| PatchError::PathNotFound(path()))?;
        }
        (Value::Array(items), PathSegment::Index(index), kind) => {
            let len = items.len();
            let limit = if kind == PatchKind::Add { len } else { len.saturating_sub(1) };
            if *index > limit || (kind != PatchKind::Add && len == 0) {
                return Err(PatchError::IndexOutOfBounds {
                    path: path(),
                    index: *index,
                    len,
                });
            }
            match kind {
                PatchKind::Add => items.insert(*index, value()),
                PatchKind::Replace => items[*index] = value(),
                PatchKind::Remove => {
                    items.remove(*index);
                }
            }
        }
        _ => return Err(PatchError::NotAContainer(path())),
    }
    Ok(())
}
