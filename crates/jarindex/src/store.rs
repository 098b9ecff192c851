//! The persisted resource-entry store.
//!
//! A single global read/write lock guards all records. Readers run
//! concurrently with each other; writers are exclusive. The cardinal rule
//! throughout the indexer is bounded hold time: no write lock is held
//! across work proportional to the number of files, members, or children,
//! so every multi-record mutation releases and re-acquires the lock per
//! unit of work and re-validates its target.
//!
//! Durability comes from postcard+zstd snapshots written atomically on
//! `flush`.

mod entry;
mod persistence;

pub use entry::{EntryFlags, EntryId, ResourceEntry};
pub use persistence::STORE_FORMAT_VERSION;

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::types::{Owner, TypeRecord};

/// Record table behind the store's global lock.
#[derive(Debug, Default)]
pub struct StoreData {
    next_id: u64,
    entries: FnvHashMap<EntryId, ResourceEntry>,
    /// Location key to the entries currently linked under it, oldest first.
    /// Tombstoned entries are unlinked from here but stay in `entries`
    /// until bounded deletion removes them.
    by_location: FnvHashMap<String, Vec<EntryId>>,
}

impl StoreData {
    fn from_parts(next_id: u64, entries: Vec<ResourceEntry>) -> Self {
        let mut data = StoreData {
            next_id,
            ..StoreData::default()
        };
        for entry in entries {
            data.by_location
                .entry(entry.location.clone())
                .or_default()
                .push(entry.id);
            data.next_id = data.next_id.max(entry.id.0 + 1);
            data.entries.insert(entry.id, entry);
        }
        data
    }

    /// Creates a fresh entry with `done_indexing == false`.
    pub fn create_entry(&mut self, location: &str, now_ms: u64, owners: Vec<Owner>) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries
            .insert(id, ResourceEntry::new(id, location, now_ms, owners));
        self.by_location
            .entry(location.to_string())
            .or_default()
            .push(id);
        id
    }

    /// Whether the entry is still in the index. Deleted entries fail this
    /// check; tombstoned ones still pass until their deletion finishes.
    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn entry(&self, id: EntryId) -> Option<&ResourceEntry> {
        self.entries.get(&id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut ResourceEntry> {
        self.entries.get_mut(&id)
    }

    /// The current entry for a location. Prefers the newest fully-indexed
    /// entry so readers never observe a half-populated one while a
    /// replacement is in flight.
    pub fn resource_for(&self, location: &str) -> Option<EntryId> {
        let ids = self.by_location.get(location)?;
        ids.iter()
            .rev()
            .find(|id| {
                self.entries
                    .get(id)
                    .map_or(false, |entry| entry.done_indexing)
            })
            .or_else(|| ids.last())
            .copied()
    }

    /// Every entry currently linked under a location. More than one means a
    /// replacement is in flight, or a crash left a stale predecessor.
    pub fn all_with_location(&self, location: &str) -> Vec<EntryId> {
        self.by_location.get(location).cloned().unwrap_or_default()
    }

    /// Tombstone: unlinks the entry from the location table so readers stop
    /// treating it as current. The record itself survives until bounded
    /// deletion removes it.
    pub fn mark_invalid(&mut self, id: EntryId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if let Some(ids) = self.by_location.get_mut(&entry.location) {
            ids.retain(|next| *next != id);
            if ids.is_empty() {
                self.by_location.remove(&entry.location);
            }
        }
    }

    pub fn child_count(&self, id: EntryId) -> usize {
        self.entries.get(&id).map_or(0, |entry| entry.children.len())
    }

    /// Removes and returns the last child, preserving deletion order
    /// (innermost first).
    pub fn pop_child(&mut self, id: EntryId) -> Option<TypeRecord> {
        self.entries.get_mut(&id)?.children.pop()
    }

    /// Removes the entry record. Children must already be gone; callers go
    /// through the indexer's bounded deletion rather than calling this on
    /// an entry that still has children.
    pub fn remove_entry(&mut self, id: EntryId) {
        self.mark_invalid(id);
        self.entries.remove(&id);
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_location.clear();
    }

    fn next_id_value(&self) -> u64 {
        self.next_id
    }

    fn entries_cloned(&self) -> Vec<ResourceEntry> {
        self.entries.values().cloned().collect()
    }
}

/// The transactional, lock-protected store.
#[derive(Debug)]
pub struct Store {
    data: RwLock<StoreData>,
    save_path: Option<PathBuf>,
}

impl Store {
    /// A store with no backing file. Flush is a no-op.
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            save_path: None,
        }
    }

    /// Opens a store backed by a snapshot file, loading it when present.
    /// A missing, stale-format, or undecodable snapshot starts empty.
    pub fn open(path: &Path) -> Self {
        let data = persistence::load_store_snapshot(path).unwrap_or_default();
        Self {
            data: RwLock::new(data),
            save_path: Some(path.to_path_buf()),
        }
    }

    /// Acquires the global read lock.
    pub fn read(&self) -> RwLockReadGuard<'_, StoreData> {
        self.data.read()
    }

    /// Acquires the global write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, StoreData> {
        self.data.write()
    }

    /// Flushes the store to durable storage under the write lock.
    pub fn flush(&self) -> Result<()> {
        let data = self.data.write();
        if let Some(path) = &self.save_path {
            persistence::write_store_snapshot(path, &data)?;
        }
        Ok(())
    }

    /// Deletes every record. Used by full index rebuilds.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}
