#![forbid(unsafe_code)]

//! Rewind public facade crate.
//!
//! Re-exports the store layer (`rewind-cell`) and the history engine
//! (`rewind-history`) behind one dependency, with a unified [`Error`] and a
//! prelude for day-to-day use.
//!
//! ```
//! use rewind::prelude::*;
//!
//! fn run() -> rewind::Result<()> {
//!     let cell = Observable::new(0_i64);
//!     let mut history = UndoStack::new("init".to_string());
//!     history.execute(Action::set_observable("inc".to_string(), &cell, 1)?)?;
//!     history.undo()?;
//!     assert_eq!(cell.get(), 0);
//!
//!     let stores = StoreMap::new().with_observable("c1", &cell);
//!     let json = history.create_snapshot_json(&stores)?;
//!     history.load_snapshot_json(&json, &stores)?;
//!     assert!(history.can_redo());
//!     Ok(())
//! }
//! run().unwrap();
//! ```

mod error;

pub use error::{Error, Result};

// --- Cell re-exports -------------------------------------------------------

pub use rewind_cell::{
    BatchScope, JsonPatcher, MutatePatch, Observable, PatchError, PatchKind, PatchOp, PathSegment,
    Patcher, Store, StoreError, StoreKey, StoreRef, Subscription,
};

// --- History re-exports ----------------------------------------------------

pub use rewind_history::{
    Action, ActionBody, ActionError, ActionSink, ActionSnapshot, ActionType, ConfigError,
    GroupAction, HistoryConfig, HistoryError, SnapshotCodec, SnapshotError, StackStatus, StoreMap,
    UndoStack, UndoStackSnapshot,
};

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Action, ActionSink, Error, GroupAction, HistoryConfig, MutatePatch, Observable, PatchOp,
        PathSegment, Result, StoreMap, UndoStack,
    };
    pub use crate::{cell, history};
}

pub use rewind_cell as cell;
pub use rewind_history as history;
