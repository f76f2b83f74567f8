//! Snapshot persistence for bot state.
//!
//! ## Architectural Principles
//!
//! - **Layer 3 Adapter:** This crate is an adapter that encapsulates all
//!   on-disk persistence logic, hiding the file layout from the rest of the
//!   application behind [`SnapshotStore`].
//! - **Crash-safe writes:** every save goes through a temp-file-then-rename
//!   so a process killed mid-write never corrupts the previous snapshot.
//! - **Fail open on read:** a missing or corrupt snapshot is treated as "no
//!   prior state" rather than a startup error.
//!
//! ## Public API
//!
//! - `SnapshotStore`: opens a data directory and provides `save`/`load`/
//!   `delete`/`list_ids`.
//! - `StoreError`: the specific error types this crate can return.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::SnapshotStore;
