#![forbid(unsafe_code)]

//! Observable store with change notification and version tracking.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). When the value changes (determined by
//! `PartialEq`), all live subscribers are notified in registration order.
//!
//! Each observable is stamped with a [`StoreKey`] when it is created. Clones
//! share the key, so the key is the identity used by history snapshots to map
//! a store to a persistent id.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: If `Subscription` guards are stored indefinitely
//!   without being dropped, callbacks accumulate. Dead weak references are
//!   cleaned lazily whenever the store notifies.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, debug_span};
use web_time::Instant;

use crate::store::StoreKey;

/// A subscriber callback stored as a strong `Rc` internally, handed out
/// as `Weak` to the observable.
type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

/// Shared interior for [`Observable<T>`].
struct ObservableInner<T> {
    value: T,
    version: u64,
    /// Subscribers stored as weak references. Dead entries are pruned on notify.
    subscribers: Vec<CallbackWeak<T>>,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** inner state:
/// both handles see the same value, share subscribers and carry the same
/// [`StoreKey`].
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing mutation.
/// 2. `set(v)` where `v == current` is a no-op.
/// 3. Subscribers are notified in registration order.
/// 4. Dead subscribers (dropped [`Subscription`] guards) are pruned lazily.
pub struct Observable<T> {
    key: StoreKey,
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("key", &self.key)
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a new observable with the given initial value.
    ///
    /// The initial version is 0, no subscribers are registered and a fresh
    /// [`StoreKey`] is minted.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            key: StoreKey::next(),
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Identity shared by every clone of this observable.
    #[must_use]
    pub fn key(&self) -> StoreKey {
        self.key
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Set a new value. Equal values (by `PartialEq`) are ignored;
    /// anything else bumps the version and notifies.
    pub fn set(&self, value: T) {
        self.commit(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Set a new value and notify subscribers even if it equals the current
    /// one.
    ///
    /// Used by publishers whose consumers count notifications rather than
    /// compare values.
    pub fn replace(&self, value: T) {
        self.commit(|current| {
            *current = value;
            true
        });
    }

    /// Modify the value in place. Notifies only if the result differs from
    /// the value before `f` ran.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.commit(|current| {
            let before = current.clone();
            f(current);
            *current != before
        });
    }

    /// Run `write` against the value; it reports whether the value changed.
    fn commit(&self, write: impl FnOnce(&mut T) -> bool) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let changed = write(&mut inner.value);
            if changed {
                inner.version += 1;
            }
            changed
        };
        if changed {
            let source = self.clone();
            crate::batch::defer_or_notify(self.key, move || source.notify_now());
        }
    }

    /// Subscribe to value changes. The callback is invoked with a reference
    /// to the new value each time it changes.
    ///
    /// Returns a [`Subscription`] guard. Dropping the guard unsubscribes
    /// the callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        let weak = Rc::downgrade(&strong);
        self.inner.borrow_mut().subscribers.push(weak);
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of currently registered subscribers (including dead ones
    /// not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Call live subscribers with the current value and prune dead ones.
    ///
    /// Inside a [`BatchScope`](crate::BatchScope) this runs once per store
    /// when the batch flushes, so it always sees the latest value.
    fn notify_now(&self) {
        // Collect live callbacks first so no borrow is held during calls.
        let callbacks: Vec<CallbackRc<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.iter().filter_map(|w| w.upgrade()).collect()
        };
        if callbacks.is_empty() {
            return;
        }

        let value = self.get();
        let subscribers = callbacks.len() as u64;
        let started = Instant::now();
        let _span = debug_span!(
            "rewind.cell.notify",
            store = self.key.raw(),
            subscribers,
            duration_us = tracing::field::Empty
        )
        .entered();

        for cb in &callbacks {
            cb(&value);
        }

        let duration_us = started.elapsed().as_micros() as u64;
        tracing::Span::current().record("duration_us", duration_us);
        debug!(store = self.key.raw(), subscribers, duration_us, "store notified");
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` drops the strong `Rc` holding the callback, so
/// the `Weak` in the observable's subscriber list fails to upgrade on the
/// next notification cycle.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
