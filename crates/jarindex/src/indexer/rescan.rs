//! The rescan pipeline.
//!
//! One pass over the workspace: snapshot the reachable locations, collect
//! garbage, test fingerprints, reindex what changed, refresh owner mappings
//! on what did not, flush, and notify listeners. The store's write lock is
//! never held across filesystem work; every mutation re-validates its
//! target after reacquiring the lock.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::manager::IndexerInner;
use crate::cancel::ProgressToken;
use crate::error::Result;
use crate::fingerprint::{Fingerprint, FingerprintTestResult};
use crate::listener::IndexerEvent;
use crate::snapshot::WorkspaceSnapshot;
use crate::store::EntryId;
use crate::types::location_key;

/// Counters from one completed rescan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RescanStats {
    /// Locations reachable from the workspace at snapshot time.
    pub locations: usize,
    /// Locations whose content changed and were reindexed.
    pub indexed: usize,
    /// Entries in the store before garbage collection ran.
    pub entries_before_gc: usize,
    /// Entries removed by garbage collection.
    pub garbage_collected: usize,
}

impl IndexerInner {
    pub(super) fn rescan(&self, token: &ProgressToken) -> Result<RescanStats> {
        let start = Instant::now();

        // This pass will observe everything that happened up to now.
        self.auto_indexing.lock().dirtied_while_disabled = false;
        self.state_cache.clear();

        let snapshot = WorkspaceSnapshot::create(self.enumerator.as_ref(), token)?;
        let referenced = snapshot.all_locations();

        let gc = self.clean_garbage(&referenced, token)?;
        let changed = self.test_for_changes(&snapshot, token)?;

        let mut indexed = 0;
        let mut changed_roots = Vec::new();
        for location in &changed {
            token.check()?;
            let Some(info) = snapshot.get(location) else {
                continue;
            };
            self.rescan_location(location, info, token)?;
            indexed += 1;
            if info.indexable.is_archive() && info.owners.iter().any(|owner| owner.project_open) {
                changed_roots.push(location.clone());
            }
        }

        self.update_resource_mappings(&snapshot, &changed, token)?;
        self.store.flush()?;

        changed_roots.sort();
        self.fire_delta(changed_roots);

        log::info!(
            "rescan finished in {:?}: {} locations, {} reindexed, {} of {} entries collected",
            start.elapsed(),
            snapshot.len(),
            indexed,
            gc.collected,
            gc.entries_before
        );

        Ok(RescanStats {
            locations: snapshot.len(),
            indexed,
            entries_before_gc: gc.entries_before,
            garbage_collected: gc.collected,
        })
    }

    /// Returns the referenced locations whose content no longer matches
    /// the stored fingerprint, in a stable order.
    fn test_for_changes(
        &self,
        snapshot: &WorkspaceSnapshot,
        token: &ProgressToken,
    ) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = snapshot.all_locations().into_iter().collect();
        paths.sort();

        // Stored fingerprints are read in one batch so the lock is not
        // taken per file.
        let stored: Vec<Option<(EntryId, Fingerprint)>> = {
            let data = self.store.read();
            paths
                .iter()
                .map(|path| {
                    let id = data.resource_for(&location_key(path))?;
                    let entry = data.entry(id)?;
                    Some((id, entry.fingerprint.clone()))
                })
                .collect()
        };

        let mut changed = Vec::new();
        for (counter, (path, stored)) in paths.into_iter().zip(stored).enumerate() {
            token.check_sparse(counter)?;

            let result = match self.state_cache.get(&path) {
                Some(result) => result,
                None => {
                    let fingerprint = stored
                        .as_ref()
                        .map(|(_, fingerprint)| fingerprint.clone())
                        .unwrap_or_else(Fingerprint::empty);
                    let result = fingerprint.test(&path)?;
                    self.state_cache.insert(&path, result.clone());
                    result
                }
            };

            if result.needs_refresh {
                self.refresh_fingerprint(&stored, &result);
            }
            if !result.matches {
                changed.push(path);
            }
        }
        Ok(changed)
    }

    /// Persists a refreshed fingerprint for an unchanged entry so the next
    /// pass matches on size and mtime alone.
    fn refresh_fingerprint(
        &self,
        stored: &Option<(EntryId, Fingerprint)>,
        result: &FingerprintTestResult,
    ) {
        let Some((id, _)) = stored else {
            return;
        };
        let mut data = self.store.write();
        // The entry may have been collected since the batch read.
        if let Some(entry) = data.entry_mut(*id) {
            entry.fingerprint = result.new_fingerprint.clone();
        }
    }

    /// Replaces the owner list of every unchanged entry whose workspace
    /// mappings moved, one short lock acquisition per location.
    fn update_resource_mappings(
        &self,
        snapshot: &WorkspaceSnapshot,
        changed: &[PathBuf],
        token: &ProgressToken,
    ) -> Result<()> {
        let changed: HashSet<&PathBuf> = changed.iter().collect();
        let mut paths: Vec<PathBuf> = snapshot.all_locations().into_iter().collect();
        paths.sort();

        for (counter, path) in paths.iter().enumerate() {
            token.check_sparse(counter)?;
            if changed.contains(path) {
                continue;
            }
            let Some(info) = snapshot.get(path) else {
                continue;
            };

            let mut data = self.store.write();
            let Some(id) = data.resource_for(&location_key(path)) else {
                continue;
            };
            if let Some(entry) = data.entry_mut(id) {
                if entry.owners != info.owners {
                    entry.owners = info.owners.clone();
                }
            }
        }
        Ok(())
    }

    /// Notifies listeners of the archives that changed, outside any lock.
    fn fire_delta(&self, changed_roots: Vec<PathBuf>) {
        if changed_roots.is_empty() {
            return;
        }
        let listeners = Arc::clone(&self.listeners.lock());
        let event = IndexerEvent { changed_roots };
        for listener in listeners.iter() {
            listener.consume(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::{Condvar, Mutex};
    use tempfile::TempDir;

    use crate::converter::ClassNameConverter;
    use crate::error::IndexError;
    use crate::indexer::{Indexer, WaitPolicy};
    use crate::listener::Listener;
    use crate::snapshot::Enumerator;
    use crate::store::{EntryFlags, Store};
    use crate::types::{Indexable, Owner};
    use crate::IndexerConfig;

    fn class_bytes() -> Vec<u8> {
        // magic, minor 0, major 52
        vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52]
    }

    fn write_jar(path: &Path, names: &[&str], with_manifest: bool) {
        let file = File::create(path).expect("create jar");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        if with_manifest {
            writer
                .start_file("META-INF/MANIFEST.MF", options)
                .expect("manifest");
            writer
                .write_all(b"Manifest-Version: 1.0\n")
                .expect("write manifest");
        }
        for name in names {
            writer
                .start_file(format!("{name}.class"), options)
                .expect("member");
            writer.write_all(&class_bytes()).expect("write member");
        }
        writer.finish().expect("finish");
    }

    fn owner(project: &str) -> Owner {
        Owner {
            element: format!("/{project}/lib/a.jar"),
            project: project.to_string(),
            project_open: true,
        }
    }

    struct CountingEnumerator {
        items: Mutex<Vec<(Indexable, Owner)>>,
        calls: AtomicUsize,
    }

    impl CountingEnumerator {
        fn new(items: Vec<(Indexable, Owner)>) -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(items),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_items(&self, items: Vec<(Indexable, Owner)>) {
            *self.items.lock() = items;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Enumerator for Arc<CountingEnumerator> {
        fn enumerate(&self) -> Result<Vec<(Indexable, Owner)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.lock().clone())
        }
    }

    fn indexer_for(enumerator: Arc<CountingEnumerator>) -> Indexer {
        Indexer::new(
            Arc::new(Store::in_memory()),
            Box::new(enumerator),
            Box::new(ClassNameConverter),
            IndexerConfig::default(),
        )
    }

    /// Builds an indexer with automatic indexing off, so tests drive every
    /// pass synchronously.
    fn quiet_indexer_for(enumerator: Arc<CountingEnumerator>) -> Indexer {
        let indexer = indexer_for(enumerator);
        indexer.enable_automatic_indexing(false);
        indexer
    }

    #[test]
    fn rescan_indexes_archive_members() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["com/example/Foo", "com/example/Bar", "Baz"], true);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);

        let stats = indexer.rescan().expect("rescan");
        assert_eq!(stats.locations, 1);
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.entries_before_gc, 0);
        assert_eq!(stats.garbage_collected, 0);

        let data = indexer.store().read();
        let id = data.resource_for(&location_key(&jar)).expect("entry");
        let entry = data.entry(id).expect("entry");
        assert!(entry.done_indexing);
        assert!(entry.fingerprint.file_exists());
        assert_eq!(entry.children.len(), 3);
        assert!(entry
            .manifest
            .as_deref()
            .expect("manifest")
            .starts_with("Manifest-Version"));
        assert!(entry
            .children
            .iter()
            .any(|child| child.binary_name == "com.example.Foo"));
    }

    #[test]
    fn unchanged_archive_is_not_reindexed() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);

        assert_eq!(indexer.rescan().expect("first").indexed, 1);
        assert_eq!(indexer.rescan().expect("second").indexed, 0);
    }

    #[test]
    fn changed_archive_is_replaced_atomically() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        let first: Vec<String> = (0..10).map(|index| format!("p/T{index}")).collect();
        let names: Vec<&str> = first.iter().map(String::as_str).collect();
        write_jar(&jar, &names, false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);
        indexer.rescan().expect("first");

        let second: Vec<String> = (0..11).map(|index| format!("p/T{index}")).collect();
        let names: Vec<&str> = second.iter().map(String::as_str).collect();
        write_jar(&jar, &names, false);
        indexer.rescan().expect("second");

        let data = indexer.store().read();
        let key = location_key(&jar);
        // The superseded entry is gone, not just hidden.
        assert_eq!(data.all_with_location(&key).len(), 1);
        let id = data.resource_for(&key).expect("entry");
        assert_eq!(data.entry(id).expect("entry").children.len(), 11);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn half_indexed_entry_is_collected_on_the_next_pass() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);

        // Simulate a crash: an entry created but never completed.
        indexer
            .store()
            .write()
            .create_entry(&location_key(&jar), 1, vec![owner("alpha")]);

        let stats = indexer.rescan().expect("rescan");
        assert_eq!(stats.entries_before_gc, 1);
        assert_eq!(stats.garbage_collected, 1);
        assert_eq!(stats.indexed, 1);

        let data = indexer.store().read();
        let id = data.resource_for(&location_key(&jar)).expect("entry");
        assert!(data.entry(id).expect("entry").done_indexing);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn deleted_archive_is_recorded_as_absent() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);
        indexer.rescan().expect("first");

        fs::remove_file(&jar).expect("delete jar");
        assert_eq!(indexer.rescan().expect("second").indexed, 1);

        {
            let data = indexer.store().read();
            // Absence is a known result: the old entry is superseded by a
            // completed zero-child entry with the empty fingerprint.
            let id = data.resource_for(&location_key(&jar)).expect("entry");
            let entry = data.entry(id).expect("entry");
            assert!(entry.done_indexing);
            assert!(!entry.fingerprint.file_exists());
            assert!(entry.children.is_empty());
            assert_eq!(data.len(), 1);
        }

        // The recorded absence matches the missing file next pass.
        assert_eq!(indexer.rescan().expect("third").indexed, 0);
    }

    #[test]
    fn unreferenced_entries_linger_until_the_timeout() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(Arc::clone(&enumerator));
        indexer.rescan().expect("first");

        // The jar drops out of the workspace but stays on disk. Its entry
        // survives so re-adding it later costs nothing.
        enumerator.set_items(Vec::new());
        let stats = indexer.rescan().expect("second");
        assert_eq!(stats.garbage_collected, 0);
        assert!(indexer
            .store()
            .read()
            .resource_for(&location_key(&jar))
            .is_some());
    }

    #[test]
    fn corrupt_archive_is_recorded_and_not_retried() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        fs::write(&jar, b"definitely not a zip archive").expect("write");

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);

        assert_eq!(indexer.rescan().expect("first").indexed, 1);
        {
            let data = indexer.store().read();
            let id = data.resource_for(&location_key(&jar)).expect("entry");
            let entry = data.entry(id).expect("entry");
            assert!(entry.done_indexing);
            assert!(entry.flags.contains(EntryFlags::CORRUPT_ARCHIVE));
            assert!(entry.children.is_empty());
        }

        // The known-corrupt result matches its fingerprint next pass.
        assert_eq!(indexer.rescan().expect("second").indexed, 0);
    }

    #[test]
    fn loose_class_file_is_indexed() {
        let temp = TempDir::new().expect("tempdir");
        let class = temp.path().join("Foo.class");
        fs::write(&class, class_bytes()).expect("write");

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::SingleFile(class.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);
        indexer.rescan().expect("rescan");

        let data = indexer.store().read();
        let id = data.resource_for(&location_key(&class)).expect("entry");
        let entry = data.entry(id).expect("entry");
        assert_eq!(entry.children.len(), 1);
        assert_eq!(entry.children[0].binary_name, "Foo");
    }

    #[test]
    fn owner_mappings_are_updated_without_reindexing() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(Arc::clone(&enumerator));
        indexer.rescan().expect("first");

        enumerator.set_items(vec![
            (Indexable::Archive(jar.clone()), owner("alpha")),
            (Indexable::Archive(jar.clone()), owner("beta")),
        ]);
        let stats = indexer.rescan().expect("second");
        assert_eq!(stats.indexed, 0);

        let data = indexer.store().read();
        let id = data.resource_for(&location_key(&jar)).expect("entry");
        assert_eq!(data.entry(id).expect("entry").owners.len(), 2);
    }

    #[test]
    fn changes_while_disabled_run_once_when_reenabled() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = indexer_for(Arc::clone(&enumerator));
        indexer.enable_automatic_indexing(false);

        indexer.make_dirty(&jar);
        indexer.make_dirty(&jar);
        indexer.make_dirty(&jar);
        assert_eq!(enumerator.calls(), 0);

        indexer.enable_automatic_indexing(true);
        indexer
            .wait_for_index(WaitPolicy::WaitUntilReady, &ProgressToken::new())
            .expect("wait");
        assert_eq!(enumerator.calls(), 1);
        assert!(indexer
            .store()
            .read()
            .resource_for(&location_key(&jar))
            .is_some());
    }

    #[test]
    fn wait_until_ready_returns_immediately_when_idle() {
        let enumerator = CountingEnumerator::new(Vec::new());
        let indexer = indexer_for(Arc::clone(&enumerator));

        indexer
            .wait_for_index(WaitPolicy::WaitUntilReady, &ProgressToken::new())
            .expect("wait");
        assert_eq!(enumerator.calls(), 0);
    }

    #[test]
    fn force_immediate_returns_without_scanning() {
        let enumerator = CountingEnumerator::new(Vec::new());
        let indexer = indexer_for(Arc::clone(&enumerator));
        indexer.enable_automatic_indexing(false);
        // Owed work does not change the answer: the caller asked for a
        // return without waiting and accepts stale results.
        indexer.request_rescan();

        indexer
            .wait_for_index(WaitPolicy::ForceImmediate, &ProgressToken::new())
            .expect("force");
        assert_eq!(enumerator.calls(), 0);

        // The owed rescan is still there for a caller that does wait.
        indexer.enable_automatic_indexing(true);
        indexer
            .wait_for_index(WaitPolicy::WaitUntilReady, &ProgressToken::new())
            .expect("wait");
        assert_eq!(enumerator.calls(), 1);
    }

    #[test]
    fn cancel_if_not_ready_fails_while_a_pass_runs() {
        struct GatedEnumerator {
            gate: Arc<(Mutex<bool>, Condvar)>,
        }

        impl Enumerator for GatedEnumerator {
            fn enumerate(&self) -> Result<Vec<(Indexable, Owner)>> {
                let (lock, released) = &*self.gate;
                let mut open = lock.lock();
                while !*open {
                    released.wait(&mut open);
                }
                Ok(Vec::new())
            }
        }

        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let indexer = Indexer::new(
            Arc::new(Store::in_memory()),
            Box::new(GatedEnumerator {
                gate: Arc::clone(&gate),
            }),
            Box::new(ClassNameConverter),
            IndexerConfig::default(),
        );

        indexer.request_rescan();
        assert!(matches!(
            indexer.wait_for_index(WaitPolicy::CancelIfNotReady, &ProgressToken::new()),
            Err(IndexError::Cancelled)
        ));

        {
            let (lock, released) = &*gate;
            *lock.lock() = true;
            released.notify_all();
        }
        indexer
            .wait_for_index(WaitPolicy::WaitUntilReady, &ProgressToken::new())
            .expect("drain");
        indexer
            .wait_for_index(WaitPolicy::CancelIfNotReady, &ProgressToken::new())
            .expect("ready");
    }

    #[test]
    fn listeners_receive_one_delta_per_changed_archive_pass() {
        struct CapturingListener {
            events: Mutex<Vec<IndexerEvent>>,
        }

        impl Listener for CapturingListener {
            fn consume(&self, event: &IndexerEvent) {
                self.events.lock().push(event.clone());
            }
        }

        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);

        let listener = Arc::new(CapturingListener {
            events: Mutex::new(Vec::new()),
        });
        indexer.add_listener(listener.clone());

        indexer.rescan().expect("first");
        indexer.rescan().expect("second");

        let events = listener.events.lock();
        // The second pass changed nothing; no event fired for it.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].changed_roots, vec![jar]);
    }

    #[test]
    fn rebuild_repopulates_the_store() {
        let temp = TempDir::new().expect("tempdir");
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &["Foo", "Bar"], false);

        let enumerator = CountingEnumerator::new(vec![(
            Indexable::Archive(jar.clone()),
            owner("alpha"),
        )]);
        let indexer = quiet_indexer_for(enumerator);
        indexer.rescan().expect("rescan");
        let before = indexer
            .store()
            .read()
            .resource_for(&location_key(&jar))
            .expect("entry");

        indexer.rebuild_index(&ProgressToken::new()).expect("rebuild");

        let data = indexer.store().read();
        let after = data.resource_for(&location_key(&jar)).expect("entry");
        assert_ne!(before, after);
        assert_eq!(data.entry(after).expect("entry").children.len(), 2);
        assert_eq!(data.len(), 1);
    }
}
