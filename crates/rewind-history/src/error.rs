#![forbid(unsafe_code)]

//! Error types for actions, snapshots and the history stack.
//!
//! Every failure here is structural: nothing is transient, so nothing is
//! retried. Snapshot save/load is all-or-nothing; a failing undo/redo leaves
//! the stack where it was.

use std::fmt;

use rewind_cell::{PatchError, StoreError, StoreKey};

use crate::action::ActionType;

/// Failure while applying or reverting a single action.
#[derive(Debug)]
pub enum ActionError {
    /// Reading or writing the store failed.
    Store(StoreError),
    /// The patch collaborator rejected a mutate payload.
    Patch { key: StoreKey, source: PatchError },
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store access failed: {e}"),
            Self::Patch { key, source } => write!(f, "cannot patch {key}: {source}"),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Patch { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Failure while encoding or decoding a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// A store-backed action has no id: the store is absent from the map
    /// (encode, `key` is set) or the record lacks `storeId` (decode).
    MissingStoreId {
        action: ActionType,
        key: Option<StoreKey>,
    },
    /// The record names a store id the map cannot resolve.
    UnresolvedStoreId(String),
    /// The record's `type` tag is not one of the known action types.
    UnknownActionType(String),
    /// A group record's `data` is not a list of action records.
    MalformedGroup(String),
    /// The snapshot's `index` does not address one of its actions.
    IndexOutOfRange { index: usize, len: usize },
    /// The snapshot holds more action records (nested ones included) than the
    /// configured limit.
    TooManyActions { len: usize, limit: usize },
    /// Reading a store's live value failed while rebuilding actions.
    Store(StoreError),
    /// JSON (de)serialisation of the snapshot failed.
    Json(serde_json::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStoreId {
                action,
                key: Some(key),
            } => write!(f, "missing store id for {key} ({} action)", action.as_str()),
            Self::MissingStoreId { action, key: None } => {
                write!(f, "{} record has no storeId", action.as_str())
            }
            Self::UnresolvedStoreId(id) => write!(f, "no store registered under id '{id}'"),
            Self::UnknownActionType(tag) => write!(f, "unknown action type '{tag}'"),
            Self::MalformedGroup(msg) => write!(f, "malformed group record: {msg}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "snapshot index {index} out of range ({len} actions)")
            }
            Self::TooManyActions { len, limit } => {
                write!(f, "snapshot has {len} action records, limit is {limit}")
            }
            Self::Store(e) => write!(f, "store access failed: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SnapshotError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Failure while moving through the history.
#[derive(Debug)]
pub enum HistoryError {
    /// Re-applying the action with this sequence number failed.
    Apply { seq_nbr: u64, source: ActionError },
    /// Reverting the action with this sequence number failed.
    Revert { seq_nbr: u64, source: ActionError },
}

impl HistoryError {
    /// Sequence number of the action that failed.
    #[must_use]
    pub fn seq_nbr(&self) -> u64 {
        match self {
            Self::Apply { seq_nbr, .. } | Self::Revert { seq_nbr, .. } => *seq_nbr,
        }
    }
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply { seq_nbr, source } => write!(f, "apply of action #{seq_nbr} failed: {source}"),
            Self::Revert { seq_nbr, source } => {
                write!(f, "revert of action #{seq_nbr} failed: {source}")
            }
        }
    }
}

impl std::error::Error for HistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Apply { source, .. } | Self::Revert { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn missing_store_id_messages_distinguish_direction() {
        let key = StoreKey::next();
        let encode = SnapshotError::MissingStoreId {
            action: ActionType::Set,
            key: Some(key),
        };
        assert!(encode.to_string().contains(&key.to_string()));

        let decode = SnapshotError::MissingStoreId {
            action: ActionType::Mutate,
            key: None,
        };
        assert_eq!(decode.to_string(), "mutate record has no storeId");
    }

    #[test]
    fn history_error_chains_to_action_error() {
        let err = HistoryError::Revert {
            seq_nbr: 4,
            source: ActionError::Patch {
                key: StoreKey::next(),
                source: PatchError::PathNotFound("/x".into()),
            },
        };
        assert_eq!(err.seq_nbr(), 4);
        let action = err.source().expect("action error source");
        assert!(action.source().is_some(), "patch error is chained");
    }
}
