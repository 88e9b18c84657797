#![forbid(unsafe_code)]

//! Unified error for hosts that do not care which subsystem failed.
//!
//! Each subsystem keeps its own typed error so callers can match on what
//! matters; [`Error`] wraps all of them and converts from each with `?`.

use std::fmt;

use rewind_cell::{PatchError, StoreError};
use rewind_history::{ActionError, ConfigError, HistoryError, SnapshotError};

/// Top-level error type for Rewind.
#[derive(Debug)]
pub enum Error {
    /// Undo, redo or goto failed part-way.
    History(HistoryError),
    /// Snapshot save/load failed.
    Snapshot(SnapshotError),
    /// Applying an action outside the stack failed.
    Action(ActionError),
    /// Loading or validating configuration failed.
    Config(ConfigError),
    /// A store rejected a read or write.
    Store(StoreError),
    /// A patch could not be applied.
    Patch(PatchError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::History(e) => write!(f, "history: {e}"),
            Self::Snapshot(e) => write!(f, "snapshot: {e}"),
            Self::Action(e) => write!(f, "action: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Patch(e) => write!(f, "patch: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::History(e) => Some(e),
            Self::Snapshot(e) => Some(e),
            Self::Action(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Patch(e) => Some(e),
        }
    }
}

impl From<HistoryError> for Error {
    fn from(e: HistoryError) -> Self {
        Self::History(e)
    }
}

impl From<SnapshotError> for Error {
    fn from(e: SnapshotError) -> Self {
        Self::Snapshot(e)
    }
}

impl From<ActionError> for Error {
    fn from(e: ActionError) -> Self {
        Self::Action(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<PatchError> for Error {
    fn from(e: PatchError) -> Self {
        Self::Patch(e)
    }
}

/// Standard result type for Rewind APIs.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn question_mark_converts_subsystem_errors() {
        fn load() -> Result<()> {
            Err(SnapshotError::UnresolvedStoreId("c1".into()))?;
            Ok(())
        }
        let err = load().unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
        assert_eq!(err.to_string(), "snapshot: no store registered under id 'c1'");
        assert!(err.source().is_some());
    }

    #[test]
    fn patch_errors_wrap_directly() {
        let err = Error::from(PatchError::PathNotFound("/a".into()));
        assert!(err.to_string().starts_with("patch: "));
    }
}
