#![forbid(unsafe_code)]

//! Linear undo/redo history over reversible actions.
//!
//! [`UndoStack`] owns an ordered list of [`Action`]s that always starts with
//! an Init action, a cursor (`index`) at the active action, and a `ticker`
//! that mints sequence numbers and is bumped on every move so observers can
//! tell otherwise identical states apart.
//!
//! ```text
//! push(A) push(B)         undo()                 push(C)  <-- drops B
//! [Init, A, B]            [Init, A, B]           [Init, A, C]
//!           ^ index              ^ index                   ^ index
//! ```
//!
//! # Invariants
//!
//! 1. `actions` is never empty and `actions[0]` is the Init action.
//! 2. `index < actions.len()`.
//! 3. `can_undo == (index > 0)`, `can_redo == (index < len - 1)`.
//! 4. Sequence numbers of live actions are unique; pushes mint increasing
//!    ones.
//! 5. Every push/execute/undo/redo/goto/clear/load that changes state
//!    publishes exactly one [`StackStatus`].
//!
//! # Failure Modes
//!
//! - A failing undo/redo leaves `index` and `ticker` untouched and publishes
//!   nothing.
//! - A failing goto stops at the last position it reached; the ticker is
//!   bumped and one status is published before the error is returned.
//! - A failing snapshot load leaves the stack unchanged.

use std::fmt;
use std::rc::Rc;

use rewind_cell::{BatchScope, Observable, Patcher, Subscription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, warn};

use crate::action::{Action, ActionSink};
use crate::config::HistoryConfig;
use crate::error::{ActionError, HistoryError, SnapshotError};
use crate::snapshot::{SnapshotCodec, StoreMap, UndoStackSnapshot};

// ============================================================================
// Status
// ============================================================================

/// Derived view of the stack published to subscribers after each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StackStatus {
    pub index: usize,
    pub ticker: u64,
    pub len: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Sequence number of the action at `index`.
    pub current_seq_nbr: u64,
}

// ============================================================================
// UndoStack
// ============================================================================

/// Undo/redo history with portable snapshots.
pub struct UndoStack<M> {
    actions: Vec<Action<M>>,
    index: usize,
    ticker: u64,
    init_msg: M,
    config: HistoryConfig,
    codec: SnapshotCodec,
    status: Observable<StackStatus>,
}

impl<M> fmt::Debug for UndoStack<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoStack")
            .field("len", &self.actions.len())
            .field("index", &self.index)
            .field("ticker", &self.ticker)
            .field("config", &self.config)
            .finish()
    }
}

impl<M: Clone> UndoStack<M> {
    /// Fresh history whose Init action carries `init_msg`.
    #[must_use]
    pub fn new(init_msg: M) -> Self {
        Self::with_config(init_msg, HistoryConfig::default())
    }

    #[must_use]
    pub fn with_config(init_msg: M, config: HistoryConfig) -> Self {
        let status = Observable::new(StackStatus {
            len: 1,
            ..StackStatus::default()
        });
        Self {
            actions: vec![Action::init(init_msg.clone())],
            index: 0,
            ticker: 0,
            init_msg,
            config,
            codec: SnapshotCodec::default(),
            status,
        }
    }

    /// Use `patcher` for mutate actions rebuilt from snapshots.
    #[must_use]
    pub fn with_patcher(mut self, patcher: Rc<dyn Patcher>) -> Self {
        self.codec = SnapshotCodec::new(patcher);
        self
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record an action whose effect has already been performed.
    ///
    /// Any redo branch is discarded.
    pub fn push(&mut self, mut action: Action<M>) {
        self.ticker += 1;
        action.set_seq_nbr(self.ticker);

        let discarded = self.actions.len() - (self.index + 1);
        self.actions.truncate(self.index + 1);
        self.actions.push(action);
        self.index = self.actions.len() - 1;
        self.evict();

        debug!(
            seq_nbr = self.ticker,
            index = self.index,
            ticker = self.ticker,
            discarded,
            "action pushed"
        );
        self.publish();
    }

    /// Apply `action` and record it.
    ///
    /// Nothing is recorded if applying fails.
    pub fn execute(&mut self, action: Action<M>) -> Result<(), ActionError> {
        let applied = self.batched(|| action.apply());
        if let Err(err) = applied {
            warn!(
                action = action.action_type().as_str(),
                error = %err,
                "execute failed; action not recorded"
            );
            return Err(err);
        }
        self.push(action);
        Ok(())
    }

    /// Drop the oldest non-Init actions beyond `max_depth`.
    fn evict(&mut self) {
        let max_depth = self.config.max_depth;
        if max_depth == 0 || self.actions.len() - 1 <= max_depth {
            return;
        }
        let excess = self.actions.len() - 1 - max_depth;
        let excess = excess.min(self.index);
        self.actions.drain(1..1 + excess);
        self.index -= excess;
        debug!(evicted = excess, len = self.actions.len(), "oldest actions evicted");
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Revert the active action and step back.
    ///
    /// Returns `Ok(false)` when already at the Init action.
    pub fn undo(&mut self) -> Result<bool, HistoryError> {
        if self.index == 0 {
            return Ok(false);
        }
        let action = &self.actions[self.index];
        let seq_nbr = action.seq_nbr();
        if let Err(source) = self.batched(|| action.revert()) {
            warn!(seq_nbr, error = %source, "undo failed");
            return Err(HistoryError::Revert { seq_nbr, source });
        }
        self.index -= 1;
        self.ticker += 1;
        debug!(seq_nbr, index = self.index, ticker = self.ticker, "undo");
        self.publish();
        Ok(true)
    }

    /// Step forward and re-apply the action reached.
    ///
    /// Returns `Ok(false)` when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, HistoryError> {
        if !self.can_redo() {
            return Ok(false);
        }
        let target = self.index + 1;
        let action = &self.actions[target];
        let seq_nbr = action.seq_nbr();
        if let Err(source) = self.batched(|| action.apply()) {
            warn!(seq_nbr, error = %source, "redo failed");
            return Err(HistoryError::Apply { seq_nbr, source });
        }
        self.index = target;
        self.ticker += 1;
        debug!(seq_nbr, index = self.index, ticker = self.ticker, "redo");
        self.publish();
        Ok(true)
    }

    /// Walk to the action with `seq_nbr`, reverting or applying one action
    /// per step.
    ///
    /// Moving back reverts the active action before stepping; moving forward
    /// steps before applying. Returns `Ok(false)` if no live action has
    /// `seq_nbr`.
    pub fn goto(&mut self, seq_nbr: u64) -> Result<bool, HistoryError> {
        let Some(target) = self.position_of(seq_nbr) else {
            return Ok(false);
        };
        let from = self.index;
        let span = debug_span!(
            "rewind.goto",
            from,
            to = target,
            steps = tracing::field::Empty
        )
        .entered();

        let outcome = {
            let _batch = self.config.batch_notifications.then(BatchScope::new);
            self.walk_to(target)
        };

        let steps = from.abs_diff(self.index);
        span.record("steps", steps);
        self.ticker += 1;
        if let Err(err) = &outcome {
            warn!(seq_nbr = err.seq_nbr(), index = self.index, error = %err, "goto stopped early");
        } else {
            debug!(index = self.index, ticker = self.ticker, steps, "goto");
        }
        drop(span);
        self.publish();
        outcome.map(|()| true)
    }

    fn walk_to(&mut self, target: usize) -> Result<(), HistoryError> {
        while self.index != target {
            if target < self.index {
                let action = &self.actions[self.index];
                action.revert().map_err(|source| HistoryError::Revert {
                    seq_nbr: action.seq_nbr(),
                    source,
                })?;
                self.index -= 1;
            } else {
                let action = &self.actions[self.index + 1];
                action.apply().map_err(|source| HistoryError::Apply {
                    seq_nbr: action.seq_nbr(),
                    source,
                })?;
                self.index += 1;
            }
        }
        Ok(())
    }

    /// Reset to a single Init action with the ticker at 0.
    ///
    /// Store values are left as they are.
    pub fn clear(&mut self) {
        let dropped = self.actions.len() - 1;
        self.actions = vec![Action::init(self.init_msg.clone())];
        self.index = 0;
        self.ticker = 0;
        debug!(dropped, "history cleared");
        self.publish();
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Encode the whole history, naming stores through `stores`.
    pub fn create_snapshot(&self, stores: &StoreMap) -> Result<UndoStackSnapshot<M>, SnapshotError>
    where
        M: Serialize,
    {
        let actions = self.codec.encode(&self.actions, stores)?;
        Ok(UndoStackSnapshot {
            actions,
            index: self.index,
        })
    }

    /// Replace the history with one rebuilt from `snapshot`.
    ///
    /// Actions are not re-applied: stores keep their current values. Sequence
    /// numbers are reassigned from 0 in record order. On error the stack is
    /// left unchanged.
    pub fn load_snapshot(
        &mut self,
        snapshot: UndoStackSnapshot<M>,
        stores: &StoreMap,
    ) -> Result<(), SnapshotError>
    where
        M: DeserializeOwned,
    {
        let len = snapshot.actions.len();
        let limit = self.config.max_snapshot_actions;
        if limit != 0 {
            let records = snapshot.record_count();
            if records > limit {
                return Err(SnapshotError::TooManyActions {
                    len: records,
                    limit,
                });
            }
        }
        if snapshot.index >= len {
            return Err(SnapshotError::IndexOutOfRange {
                index: snapshot.index,
                len,
            });
        }

        let mut actions = self.codec.decode(snapshot.actions, stores)?;
        for (seq_nbr, action) in (0u64..).zip(actions.iter_mut()) {
            action.set_seq_nbr(seq_nbr);
        }
        self.actions = actions;
        self.index = snapshot.index;
        self.ticker = len as u64;

        debug!(len, index = self.index, ticker = self.ticker, "snapshot loaded");
        self.publish();
        Ok(())
    }

    /// [`UndoStack::create_snapshot`] serialised to JSON.
    pub fn create_snapshot_json(&self, stores: &StoreMap) -> Result<String, SnapshotError>
    where
        M: Serialize,
    {
        self.create_snapshot(stores)?.to_json()
    }

    /// [`UndoStack::load_snapshot`] from JSON text.
    pub fn load_snapshot_json(&mut self, text: &str, stores: &StoreMap) -> Result<(), SnapshotError>
    where
        M: DeserializeOwned,
    {
        let snapshot = UndoStackSnapshot::from_json(text)?;
        self.load_snapshot(snapshot, stores)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn actions(&self) -> &[Action<M>] {
        &self.actions
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn ticker(&self) -> u64 {
        self.ticker
    }

    /// Number of actions, Init included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Always false: the Init action is never removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.actions.len()
    }

    /// The active action.
    #[must_use]
    pub fn current(&self) -> &Action<M> {
        &self.actions[self.index]
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Index of the live action carrying `seq_nbr`.
    #[must_use]
    pub fn position_of(&self, seq_nbr: u64) -> Option<usize> {
        self.actions.iter().position(|a| a.seq_nbr() == seq_nbr)
    }

    /// Messages of the actions undo would revert, most recent first.
    #[must_use]
    pub fn undo_messages(&self, limit: usize) -> Vec<&M> {
        self.actions[1..=self.index]
            .iter()
            .rev()
            .take(limit)
            .map(Action::msg)
            .collect()
    }

    /// Messages of the actions redo would re-apply, next first.
    #[must_use]
    pub fn redo_messages(&self, limit: usize) -> Vec<&M> {
        self.actions[self.index + 1..]
            .iter()
            .take(limit)
            .map(Action::msg)
            .collect()
    }

    #[must_use]
    pub fn status(&self) -> StackStatus {
        self.status.get()
    }

    /// Observe every published [`StackStatus`].
    pub fn subscribe(&self, callback: impl Fn(&StackStatus) + 'static) -> Subscription {
        self.status.subscribe(callback)
    }

    fn publish(&self) {
        self.status.replace(StackStatus {
            index: self.index,
            ticker: self.ticker,
            len: self.actions.len(),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            current_seq_nbr: self.current().seq_nbr(),
        });
    }

    fn batched<R>(&self, f: impl FnOnce() -> R) -> R {
        let _batch = self.config.batch_notifications.then(BatchScope::new);
        f()
    }
}

impl<M: Clone> ActionSink<M> for UndoStack<M> {
    fn push(&mut self, action: Action<M>) {
        UndoStack::push(self, action);
    }
}

// ============================================================================
// Tests
// ============================================================================
