//! Canonical encoding and fingerprinting for the plan store.
//!
//! A document's fingerprint is the domain-separated BLAKE3 hash of its
//! canonical encoding. Fingerprints serve as entity tags for optimistic
//! concurrency: every operation fingerprints the canonical form, never the
//! raw bytes a client happened to send.

pub mod canonical;
pub mod hasher;

pub use canonical::{canonical_bytes, canonical_string};
pub use hasher::{fingerprint, Fingerprinter};
