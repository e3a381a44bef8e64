//! Keyed byte storage for plan records.
//!
//! The record manager persists each plan as an opaque byte envelope under its
//! `objectId`. This crate defines the storage contract and two backends.
//!
//! # Storage Backends
//!
//! All backends implement the [`KeyedStore`] trait:
//!
//! - [`InMemoryKeyedStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`DirectoryStore`] -- one file per key, temp-file + atomic rename writes
//!
//! # Design Rules
//!
//! 1. The store never interprets values -- it is a pure key-value store.
//! 2. `compare_and_set` is the only conditional write and is atomic per store.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod directory;
pub mod error;
pub mod memory;
pub mod traits;

pub use directory::DirectoryStore;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryKeyedStore;
pub use traits::{CasOutcome, KeyedStore};
