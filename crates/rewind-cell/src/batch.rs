#![forbid(unsafe_code)]

//! Notification coalescing for [`Observable`](crate::Observable) stores.
//!
//! Undoing a group, or walking several steps with `goto`, may write the same
//! store many times. Without batching each write would notify subscribers
//! and expose intermediate states. A [`BatchScope`] defers all notifications
//! until the scope exits, then fires each unique callback at most once with
//! the latest value.
//!
//! # Usage
//!
//! ```ignore
//! use rewind_cell::{BatchScope, Observable};
//!
//! let x = Observable::new(0);
//! {
//!     let _batch = BatchScope::new();
//!     x.set(1);  // deferred
//!     x.set(3);  // deferred, coalesced with the first write
//! }  // x subscribers called once with 3
//! ```
//!
//! # Invariants
//!
//! 1. Nested batches are supported: only the outermost scope flushes.
//! 2. Within a batch, `Observable::get()` returns the latest value
//!    (values are updated immediately, only notifications are deferred).
//! 3. Flush notifies each written store once, in the order the stores were
//!    first written.
//!
//! # Failure Modes
//!
//! - **Callback panics during flush**: Remaining callbacks are still called.
//!   The first panic is re-raised after all callbacks have been attempted.

use std::cell::RefCell;
use tracing::{debug, debug_span};
use web_time::Instant;

use crate::store::StoreKey;

/// One pending notification per store written inside the batch.
struct PendingStore {
    key: StoreKey,
    notify: Box<dyn FnOnce()>,
}

/// Thread-local batch context.
struct BatchContext {
    /// Nesting depth. Only flush when this reaches 0.
    depth: u32,
    pending: Vec<PendingStore>,
    /// Store writes absorbed by this batch, repeats included.
    writes: u64,
}

thread_local! {
    static BATCH_CTX: RefCell<Option<BatchContext>> = const { RefCell::new(None) };
}

/// Returns true if a batch is currently active on this thread.
#[must_use]
pub fn is_batching() -> bool {
    BATCH_CTX.with(|ctx| ctx.borrow().is_some())
}

/// Run `notify` for the store `key` now, or queue it if a batch is active.
///
/// A store already queued keeps its position and its first queued
/// notification, which reads the store's value when the batch flushes.
/// Returns `true` if the notification was deferred.
pub(crate) fn defer_or_notify(key: StoreKey, notify: impl FnOnce() + 'static) -> bool {
    let mut notify = Some(notify);
    let deferred = BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        let Some(batch) = guard.as_mut() else {
            return false;
        };
        batch.writes = batch.writes.saturating_add(1);
        if !batch.pending.iter().any(|p| p.key == key)
            && let Some(f) = notify.take()
        {
            batch.pending.push(PendingStore {
                key,
                notify: Box::new(f),
            });
        }
        true
    });
    if !deferred && let Some(f) = notify.take() {
        f();
    }
    deferred
}

fn flush(batch: BatchContext) {
    if batch.pending.is_empty() {
        return;
    }

    let writes = batch.writes;
    let stores = batch.pending.len() as u64;
    let started = Instant::now();
    let _span = debug_span!(
        "rewind.batch.flush",
        stores,
        writes,
        duration_us = tracing::field::Empty
    )
    .entered();

    let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
    for pending in batch.pending {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(pending.notify));
        if let Err(payload) = result
            && first_panic.is_none()
        {
            first_panic = Some(payload);
        }
    }

    let duration_us = started.elapsed().as_micros() as u64;
    tracing::Span::current().record("duration_us", duration_us);
    debug!(stores, writes, duration_us, "batch flushed");

    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }
}

/// RAII guard that begins a batch scope.
///
/// While a `BatchScope` is alive, all observable notifications on this
/// thread are deferred. When the outermost `BatchScope` drops, all deferred
/// notifications fire.
pub struct BatchScope {
    is_root: bool,
}

impl BatchScope {
    /// Begin a new batch scope.
    ///
    /// If already inside a batch, this increments the nesting depth.
    #[must_use]
    pub fn new() -> Self {
        let is_root = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            match *guard {
                Some(ref mut batch) => {
                    batch.depth += 1;
                    false
                }
                None => {
                    *guard = Some(BatchContext {
                        depth: 1,
                        pending: Vec::new(),
                        writes: 0,
                    });
                    true
                }
            }
        });
        Self { is_root }
    }

    /// Whether this scope opened the batch (and will flush it).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Number of distinct stores waiting to notify in the current batch.
    #[must_use]
    pub fn pending_stores(&self) -> usize {
        BATCH_CTX.with(|ctx| ctx.borrow().as_ref().map_or(0, |b| b.pending.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let should_flush = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            if let Some(ref mut batch) = *guard {
                batch.depth -= 1;
                batch.depth == 0
            } else {
                false
            }
        });

        if should_flush {
            // Detach the context first so callbacks that write stores notify
            // immediately instead of queueing into a batch that is going away.
            if let Some(batch) = BATCH_CTX.with(|ctx| ctx.borrow_mut().take()) {
                flush(batch);
            }
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("is_root", &self.is_root)
            .field("pending_stores", &self.pending_stores())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
