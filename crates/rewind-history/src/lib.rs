#![forbid(unsafe_code)]

//! Rewind history engine.
//!
//! - [`Action`] - one reversible operation (init, group, set, mutate)
//! - [`UndoStack`] - linear history with undo, redo and goto
//! - [`SnapshotCodec`] / [`UndoStackSnapshot`] - portable form of a history
//!   with stores named by string ids
//! - [`HistoryConfig`] - depth bound, notification batching, load limits
//!
//! # Example
//!
//! ```
//! use rewind_cell::Observable;
//! use rewind_history::{Action, StoreMap, UndoStack};
//!
//! let cell = Observable::new(0_i64);
//! let mut history = UndoStack::new("init");
//! history.execute(Action::set_observable("inc", &cell, 1).unwrap()).unwrap();
//! assert_eq!(cell.get(), 1);
//!
//! history.undo().unwrap();
//! assert_eq!(cell.get(), 0);
//!
//! let stores = StoreMap::new().with_observable("c1", &cell);
//! let json = history.create_snapshot_json(&stores).unwrap();
//! assert!(json.contains(r#""storeId":"c1""#));
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod stack;

pub use action::{Action, ActionBody, ActionSink, ActionType, GroupAction};
pub use config::{ConfigError, HistoryConfig};
pub use error::{ActionError, HistoryError, SnapshotError};
pub use snapshot::{ActionSnapshot, SnapshotCodec, StoreMap, UndoStackSnapshot};
pub use stack::{StackStatus, UndoStack};
