//! Garbage collection and bounded deletion.
//!
//! Garbage is anything a reader should never see again: entries whose
//! indexing pass never finished (crash leftovers), entries superseded by a
//! newer pass, and entries no workspace element has referenced for longer
//! than the retention timeout. Deletion itself is bounded: the entry is
//! tombstoned first, then drained one child per write-lock acquisition so
//! a huge archive never starves readers.

use std::collections::HashSet;
use std::path::PathBuf;

use super::manager::IndexerInner;
use crate::cancel::ProgressToken;
use crate::config::unix_now_ms;
use crate::error::Result;
use crate::store::EntryId;
use crate::types::location_key;

/// Result of one garbage-collection pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct GcStats {
    /// Entries in the store when the pass started.
    pub(super) entries_before: usize,
    /// Entries deleted by the pass.
    pub(super) collected: usize,
}

impl IndexerInner {
    /// Deletes expired and half-written entries.
    pub(super) fn clean_garbage(
        &self,
        referenced: &HashSet<PathBuf>,
        token: &ProgressToken,
    ) -> Result<GcStats> {
        let now = unix_now_ms();
        let gc_timeout = self.config.gc_timeout_ms();
        let refresh_period = self.config.usage_timestamp_update_period_ms();

        let referenced_keys: HashSet<String> =
            referenced.iter().map(|path| location_key(path)).collect();

        // Classify under one read lock; mutate afterwards.
        let entries_before;
        let mut garbage = Vec::new();
        let mut stale_timestamps = Vec::new();
        {
            let data = self.store.read();
            entries_before = data.len();
            for entry in data.entries() {
                let current = data.resource_for(&entry.location) == Some(entry.id);
                let idle = now.saturating_sub(entry.time_last_used);

                if !entry.done_indexing {
                    garbage.push(entry.id);
                } else if !current {
                    garbage.push(entry.id);
                } else if !referenced_keys.contains(&entry.location) {
                    if idle > gc_timeout {
                        garbage.push(entry.id);
                    }
                } else if idle > refresh_period {
                    stale_timestamps.push(entry.id);
                }
            }
        }

        // Timestamps are written lazily; only entries older than the
        // refresh period get touched, so most passes write nothing. One
        // lock acquisition per entry, re-validated via the lookup.
        for (counter, id) in stale_timestamps.into_iter().enumerate() {
            token.check_sparse(counter)?;
            let mut data = self.store.write();
            if let Some(entry) = data.entry_mut(id) {
                entry.time_last_used = now;
            }
        }

        let collected = garbage.len();
        if collected > 0 {
            log::debug!("collecting {collected} stale index entries");
        }
        for id in garbage {
            token.check()?;
            self.delete_resource(id, token)?;
        }
        Ok(GcStats {
            entries_before,
            collected,
        })
    }

    /// Deletes one entry without ever holding the write lock across more
    /// than one unit of work. The entry is unlinked first so readers stop
    /// resolving it, then drained child by child. Interrupted deletions
    /// leave a tombstoned entry that the next pass collects.
    pub(super) fn delete_resource(&self, id: EntryId, token: &ProgressToken) -> Result<()> {
        {
            let mut data = self.store.write();
            if !data.contains(id) {
                return Ok(());
            }
            data.mark_invalid(id);
        }

        let mut counter = 0;
        loop {
            token.check_sparse(counter)?;
            counter += 1;

            let mut data = self.store.write();
            if !data.contains(id) {
                return Ok(());
            }
            if data.pop_child(id).is_none() {
                data.remove_entry(id);
                return Ok(());
            }
        }
    }
}
