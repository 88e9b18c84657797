#![forbid(unsafe_code)]

//! Rewind cells.
//!
//! Host-side building blocks the history engine operates on:
//!
//! - [`Observable`] - shared, version-tracked value with subscriptions
//! - [`BatchScope`] - coalesces notifications while several writes happen
//! - [`Store`] / [`StoreRef`] - type-erased view of a cell, keyed by [`StoreKey`]
//! - [`Patcher`] / [`JsonPatcher`] - applies forward/inverse patch lists
//!
//! # Role in Rewind
//! `rewind-history` records actions against [`StoreRef`] handles and routes
//! mutate payloads through a [`Patcher`]. Neither depends on a concrete cell
//! type, so hosts with their own reactive primitive implement [`Store`] and
//! skip [`Observable`] entirely.

pub mod batch;
pub mod observable;
pub mod patch;
pub mod store;

pub use batch::BatchScope;
pub use observable::{Observable, Subscription};
pub use patch::{JsonPatcher, MutatePatch, PatchError, PatchKind, PatchOp, PathSegment, Patcher};
pub use store::{Store, StoreError, StoreKey, StoreRef};
