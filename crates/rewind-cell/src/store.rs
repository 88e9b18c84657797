#![forbid(unsafe_code)]

//! Type-erased store capability.
//!
//! History actions and snapshots work with stores of many value types at
//! once. [`Store`] is the object-safe view of a cell: values cross it as
//! [`serde_json::Value`], and identity is a [`StoreKey`] rather than a
//! pointer comparison.
//!
//! # Invariants
//!
//! - Every [`Observable`] receives a key at construction; no two live
//!   observables created in the same process share one.
//! - `write(read()?)` leaves the store's typed value unchanged.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::observable::Observable;

static NEXT_STORE_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(u64);

impl StoreKey {
    /// Mint a key that has not been handed out before.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_STORE_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw key value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Errors crossing the erased store boundary.
#[derive(Debug)]
pub enum StoreError {
    /// The typed value could not be rendered as JSON.
    Encode {
        key: StoreKey,
        source: serde_json::Error,
    },
    /// A JSON value does not fit the store's value type.
    Decode {
        key: StoreKey,
        source: serde_json::Error,
    },
}

impl StoreError {
    /// The store the failure happened on.
    #[must_use]
    pub fn key(&self) -> StoreKey {
        match self {
            Self::Encode { key, .. } | Self::Decode { key, .. } => *key,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode { key, source } => write!(f, "cannot encode value of {key}: {source}"),
            Self::Decode { key, source } => {
                write!(f, "value does not fit {key}: {source}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode { source, .. } | Self::Decode { source, .. } => Some(source),
        }
    }
}

/// Object-safe read/write access to a cell.
pub trait Store {
    /// Identity of the underlying cell.
    fn key(&self) -> StoreKey;

    /// Current value rendered as JSON.
    fn read(&self) -> Result<Value, StoreError>;

    /// Replace the current value. Subscribers are notified as the cell
    /// defines.
    fn write(&self, value: Value) -> Result<(), StoreError>;
}

/// Shared handle to an erased store.
pub type StoreRef = Rc<dyn Store>;

impl fmt::Debug for dyn Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("key", &self.key()).finish()
    }
}

impl<T> Store for Observable<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    fn key(&self) -> StoreKey {
        Observable::key(self)
    }

    fn read(&self) -> Result<Value, StoreError> {
        self.with(|value| serde_json::to_value(value))
            .map_err(|source| StoreError::Encode {
                key: Observable::key(self),
                source,
            })
    }

    fn write(&self, value: Value) -> Result<(), StoreError> {
        let typed: T = serde_json::from_value(value).map_err(|source| StoreError::Decode {
            key: Observable::key(self),
            source,
        })?;
        self.set(typed);
        Ok(())
    }
}

impl<T> Observable<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    /// Erased handle to this observable, sharing its state and key.
    #[must_use]
    pub fn store_ref(&self) -> StoreRef {
        Rc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn keys_are_unique_and_ordered() {
        let a = StoreKey::next();
        let b = StoreKey::next();
        assert!(b > a);
        assert_eq!(format!("{a}"), format!("store#{}", a.raw()));
    }

    #[test]
    fn observable_reads_and_writes_json() {
        let obs = Observable::new(Point { x: 1, y: 2 });
        let store = obs.store_ref();

        assert_eq!(store.read().unwrap(), json!({"x": 1, "y": 2}));
        store.write(json!({"x": 5, "y": 6})).unwrap();
        assert_eq!(obs.get(), Point { x: 5, y: 6 });
        assert_eq!(store.key(), obs.key());
    }

    #[test]
    fn write_of_wrong_shape_is_decode_error() {
        let obs = Observable::new(0_i64);
        let store = obs.store_ref();

        let err = store.write(json!("not a number")).unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
        assert_eq!(err.key(), obs.key());
        assert_eq!(obs.get(), 0, "failed write leaves value untouched");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn erased_write_notifies_subscribers() {
        let obs = Observable::new(1_u32);
        let seen = Rc::new(std::cell::Cell::new(0));
        let seen_clone = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v| seen_clone.set(*v));

        obs.store_ref().write(json!(9)).unwrap();
        assert_eq!(seen.get(), 9);
    }
}
