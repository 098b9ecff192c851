//! Durable per-location resource entries.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::types::{Owner, TypeRecord};

/// Identifies one resource entry in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EntryFlags: u32 {
        /// The container could not be opened. The entry is a known result
        /// with zero children, distinct from "not yet tested".
        const CORRUPT_ARCHIVE = 0x1;
    }
}

/// One durable record per indexed location (archive or loose class file).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: EntryId,
    /// Canonical path string; unique key while the entry is current.
    pub location: String,
    pub fingerprint: Fingerprint,
    /// Refreshed while the location is still referenced, so garbage
    /// collection never deletes live entries solely due to lazy timestamps.
    pub time_last_used: u64,
    /// False from creation until the pass that populated this entry
    /// completed. An entry that never flips to true is crash garbage.
    pub done_indexing: bool,
    pub flags: EntryFlags,
    /// Workspace elements currently mapping onto this location.
    pub owners: Vec<Owner>,
    /// Extracted type records, owned exclusively by this entry.
    pub children: Vec<TypeRecord>,
    /// Manifest content captured from the container, when present.
    pub manifest: Option<String>,
}

impl ResourceEntry {
    pub(super) fn new(id: EntryId, location: &str, now_ms: u64, owners: Vec<Owner>) -> Self {
        Self {
            id,
            location: location.to_string(),
            fingerprint: Fingerprint::empty(),
            time_last_used: now_ms,
            done_indexing: false,
            flags: EntryFlags::empty(),
            owners,
            children: Vec::new(),
            manifest: None,
        }
    }
}
