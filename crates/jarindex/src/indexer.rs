//! The index orchestrator.
//!
//! This module drives the rescan pipeline and everything around it:
//! - `manager` - the `Indexer` service struct and its trigger API
//! - `rescan` - the pipeline (snapshot, GC, fingerprints, indexing, flush, delta)
//! - `gc` - garbage collection and bounded deletion
//! - `archive` - per-archive indexing of changed locations
//! - `scheduler` - the single-concurrency job lane

mod archive;
mod gc;
mod manager;
mod rescan;
mod scheduler;

// Re-export main types
pub use manager::{Indexer, WaitPolicy};
pub use rescan::RescanStats;
