//! Incremental, persistent symbol index for compiled-class archives.
//!
//! This crate keeps a durable on-disk index of every archive (jar-like
//! container) and loose compiled-class file reachable from a workspace:
//! - Fingerprint-based change detection (size/mtime/content hash)
//! - Garbage collection of stale and crashed-partial entries
//! - Bounded write-lock hold times so long scans never starve readers
//! - Asynchronous rescan scheduling with enable/disable and wait semantics

pub mod cancel;
pub mod config;
pub mod converter;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod listener;
pub mod snapshot;
pub mod state_cache;
pub mod store;
pub mod types;

// Re-export main types
pub use cancel::ProgressToken;
pub use config::IndexerConfig;
pub use converter::{ClassNameConverter, ConvertError, Converter};
pub use error::{IndexError, Result};
pub use fingerprint::{Fingerprint, FingerprintTestResult};
pub use indexer::{Indexer, RescanStats, WaitPolicy};
pub use listener::{IndexerEvent, Listener};
pub use snapshot::{Enumerator, LocationInfo, WorkspaceSnapshot};
pub use store::{EntryFlags, EntryId, ResourceEntry, Store};
pub use types::{location_key, Indexable, Owner, TypeRecord};
