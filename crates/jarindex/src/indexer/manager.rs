//! The `Indexer` service: triggers, scheduling policy, and listeners.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::scheduler::{Job, JobLane};
use crate::cancel::ProgressToken;
use crate::config::IndexerConfig;
use crate::converter::Converter;
use crate::error::{IndexError, Result};
use crate::listener::Listener;
use crate::snapshot::Enumerator;
use crate::state_cache::FileStateCache;
use crate::store::Store;

/// How `wait_for_index` treats work that has not happened yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return immediately without waiting for anything; the caller
    /// tolerates stale results.
    ForceImmediate,
    /// Return `Err(Cancelled)` instead of blocking when the index is not
    /// already up to date.
    CancelIfNotReady,
    /// Block until queued work finishes. Work owed from the disabled period
    /// is scheduled first so the caller never observes a stale index.
    WaitUntilReady,
}

#[derive(Debug)]
pub(super) struct AutoIndexingState {
    pub(super) enabled: bool,
    /// Set when a change arrives while automatic indexing is disabled, so
    /// re-enabling knows a rescan is owed.
    pub(super) dirtied_while_disabled: bool,
}

pub(super) struct IndexerInner {
    pub(super) store: Arc<Store>,
    pub(super) enumerator: Box<dyn Enumerator>,
    pub(super) converter: Box<dyn Converter>,
    pub(super) config: IndexerConfig,
    pub(super) state_cache: FileStateCache,
    pub(super) auto_indexing: Mutex<AutoIndexingState>,
    /// Copy-on-write so delivery iterates a stable list without the lock.
    pub(super) listeners: Mutex<Arc<Vec<Arc<dyn Listener>>>>,
    /// Token of the job currently running on the lane.
    job_token: Mutex<ProgressToken>,
}

impl IndexerInner {
    fn new(
        store: Arc<Store>,
        enumerator: Box<dyn Enumerator>,
        converter: Box<dyn Converter>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            enumerator,
            converter,
            config,
            state_cache: FileStateCache::new(),
            auto_indexing: Mutex::new(AutoIndexingState {
                enabled: true,
                dirtied_while_disabled: false,
            }),
            listeners: Mutex::new(Arc::new(Vec::new())),
            job_token: Mutex::new(ProgressToken::new()),
        }
    }

    fn fresh_job_token(&self) -> ProgressToken {
        let token = ProgressToken::new();
        *self.job_token.lock() = token.clone();
        token
    }

    fn cancel_running_job(&self) {
        self.job_token.lock().cancel();
    }

    fn run_job(&self, job: Job) {
        let token = self.fresh_job_token();
        let result = match job {
            Job::Rescan => self.rescan(&token).map(|_| ()),
            Job::Rebuild => self.rebuild(&token),
        };
        match result {
            Ok(()) => {}
            Err(IndexError::Cancelled) => log::debug!("index job cancelled"),
            Err(error) => log::error!("index job failed: {error}"),
        }
    }

    pub(super) fn rebuild(&self, token: &ProgressToken) -> Result<()> {
        log::info!("rebuilding index from scratch");
        self.state_cache.clear();
        self.store.clear();
        self.store.flush()?;
        self.rescan(token).map(|_| ())
    }
}

impl fmt::Debug for IndexerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerInner")
            .field("config", &self.config)
            .field("auto_indexing", &self.auto_indexing)
            .finish_non_exhaustive()
    }
}

/// Keeps the persisted index in sync with the workspace.
///
/// Change notifications mark paths dirty and schedule asynchronous rescans
/// on a dedicated worker thread; at most one pass runs at a time. Dropping
/// the indexer cancels the running job and stops the worker.
#[derive(Debug)]
pub struct Indexer {
    inner: Arc<IndexerInner>,
    lane: Arc<JobLane>,
}

impl Indexer {
    pub fn new(
        store: Arc<Store>,
        enumerator: Box<dyn Enumerator>,
        converter: Box<dyn Converter>,
        config: IndexerConfig,
    ) -> Self {
        let inner = Arc::new(IndexerInner::new(store, enumerator, converter, config));

        // The worker holds a weak reference: dropping the indexer must not
        // be kept alive by its own thread.
        let weak: Weak<IndexerInner> = Arc::downgrade(&inner);
        let lane = JobLane::start(move |job| {
            if let Some(inner) = weak.upgrade() {
                inner.run_job(job);
            }
        });

        Self { inner, lane }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// Marks one location dirty and schedules a rescan.
    pub fn make_dirty(&self, path: &Path) {
        self.inner.state_cache.remove(path);
        self.request_rescan();
    }

    /// Marks a whole project dirty (open, close, classpath change) and
    /// schedules a rescan. Project membership is recomputed by the next
    /// snapshot, so the whole cache is invalidated.
    pub fn make_project_dirty(&self, project: &str) {
        log::debug!("project {project} changed; rescanning");
        self.inner.state_cache.clear();
        self.request_rescan();
    }

    /// Marks a workspace-relative path dirty. Workspace paths do not map
    /// one-to-one onto filesystem locations, so the whole cache is
    /// invalidated.
    pub fn make_workspace_path_dirty(&self, path: &Path) {
        log::debug!("workspace path {} changed; rescanning", path.display());
        self.inner.state_cache.clear();
        self.request_rescan();
    }

    /// Schedules an asynchronous rescan, or records it as owed while
    /// automatic indexing is disabled.
    pub fn request_rescan(&self) {
        let mut auto = self.inner.auto_indexing.lock();
        if auto.enabled {
            self.lane.schedule(Job::Rescan);
        } else {
            auto.dirtied_while_disabled = true;
        }
    }

    /// Schedules an asynchronous rebuild. The store is cleared and fully
    /// repopulated; queued rescans are subsumed.
    pub fn request_rebuild(&self) {
        self.lane.schedule(Job::Rebuild);
    }

    /// Runs a rescan synchronously on the calling thread.
    pub fn rescan(&self) -> Result<super::rescan::RescanStats> {
        self.inner.rescan(&ProgressToken::new())
    }

    /// Cancels all index work, then rebuilds the index synchronously on
    /// the calling thread.
    pub fn rebuild_index(&self, token: &ProgressToken) -> Result<()> {
        self.lane.cancel_pending();
        self.inner.cancel_running_job();
        self.lane.join(token)?;
        self.inner.rebuild(token)
    }

    /// Turns automatic indexing on or off.
    ///
    /// Disabling waits for the in-flight pass to finish, so the index is
    /// quiescent when this returns. Changes arriving while disabled are
    /// latched; re-enabling schedules the owed rescan.
    pub fn enable_automatic_indexing(&self, enabled: bool) {
        let owed = {
            let mut auto = self.inner.auto_indexing.lock();
            if auto.enabled == enabled {
                return;
            }
            auto.enabled = enabled;
            enabled && std::mem::take(&mut auto.dirtied_while_disabled)
        };

        if enabled {
            if owed {
                self.lane.schedule(Job::Rescan);
            }
        } else if self.lane.join(&ProgressToken::new()).is_err() {
            log::warn!("interrupted while quiescing the index");
        }
    }

    /// Blocks (or not, per `policy`) until the index reflects the current
    /// workspace.
    pub fn wait_for_index(&self, policy: WaitPolicy, token: &ProgressToken) -> Result<()> {
        match policy {
            WaitPolicy::ForceImmediate => Ok(()),
            WaitPolicy::CancelIfNotReady => {
                token.check()?;
                let owed = self.inner.auto_indexing.lock().dirtied_while_disabled;
                if owed || self.lane.is_busy() {
                    Err(IndexError::Cancelled)
                } else {
                    Ok(())
                }
            }
            WaitPolicy::WaitUntilReady => {
                let owed = {
                    let mut auto = self.inner.auto_indexing.lock();
                    std::mem::take(&mut auto.dirtied_while_disabled)
                };
                if owed {
                    self.lane.schedule(Job::Rescan);
                }
                self.lane.join(token)
            }
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        let mut listeners = self.inner.listeners.lock();
        let mut next = (**listeners).clone();
        next.push(listener);
        *listeners = Arc::new(next);
    }

    /// Removes a previously added listener, matched by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) {
        let mut listeners = self.inner.listeners.lock();
        let next: Vec<Arc<dyn Listener>> = listeners
            .iter()
            .filter(|existing| !Arc::ptr_eq(existing, listener))
            .cloned()
            .collect();
        *listeners = Arc::new(next);
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.lane.cancel_pending();
        self.inner.cancel_running_job();
        self.lane.shutdown();
    }
}

#[cfg(test)]
pub(super) mod test_support {
    use super::*;
    use crate::snapshot::Enumerator;
    use crate::types::{Indexable, Owner};

    pub(in crate::indexer) struct FixedEnumerator(pub Vec<(Indexable, Owner)>);

    impl Enumerator for FixedEnumerator {
        fn enumerate(&self) -> Result<Vec<(Indexable, Owner)>> {
            Ok(self.0.clone())
        }
    }

    pub(in crate::indexer) fn empty_inner() -> IndexerInner {
        IndexerInner::new(
            Arc::new(Store::in_memory()),
            Box::new(FixedEnumerator(Vec::new())),
            Box::new(crate::converter::ClassNameConverter),
            IndexerConfig::default(),
        )
    }
}
