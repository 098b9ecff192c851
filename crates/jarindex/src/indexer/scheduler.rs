//! Single-concurrency job lane for background index work.
//!
//! At most one job runs at a time. Requests are coalesced: scheduling a
//! rescan while one is already queued is a no-op, so a burst of change
//! notifications results in a single pass. Rebuilds take priority over
//! rescans since a rebuild subsumes one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::ProgressToken;
use crate::error::{IndexError, Result};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Job {
    Rescan,
    Rebuild,
}

#[derive(Debug, Default)]
struct LaneState {
    rescan_queued: bool,
    rebuild_queued: bool,
    running: bool,
    shutdown: bool,
}

impl LaneState {
    fn has_work(&self) -> bool {
        self.running || self.rescan_queued || self.rebuild_queued
    }
}

/// Owns the worker thread. `shutdown` must be called before the last
/// external reference is dropped; the `Indexer` does this on drop.
#[derive(Debug)]
pub(super) struct JobLane {
    state: Mutex<LaneState>,
    wake: Condvar,
    idle: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobLane {
    pub(super) fn start(run: impl Fn(Job) + Send + 'static) -> Arc<Self> {
        let lane = Arc::new(Self {
            state: Mutex::new(LaneState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            worker: Mutex::new(None),
        });

        let worker_lane = Arc::clone(&lane);
        let handle = thread::Builder::new()
            .name("jarindex-lane".to_string())
            .spawn(move || worker_lane.worker_loop(run));
        match handle {
            Ok(handle) => *lane.worker.lock() = Some(handle),
            Err(error) => log::error!("failed to spawn index worker: {error}"),
        }

        lane
    }

    fn worker_loop(&self, run: impl Fn(Job)) {
        loop {
            let job = {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if state.rebuild_queued {
                        state.rebuild_queued = false;
                        state.running = true;
                        break Job::Rebuild;
                    }
                    if state.rescan_queued {
                        state.rescan_queued = false;
                        state.running = true;
                        break Job::Rescan;
                    }
                    self.wake.wait(&mut state);
                }
            };

            run(job);

            let mut state = self.state.lock();
            state.running = false;
            self.idle.notify_all();
        }
    }

    pub(super) fn schedule(&self, job: Job) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        match job {
            Job::Rescan => state.rescan_queued = true,
            Job::Rebuild => state.rebuild_queued = true,
        }
        self.wake.notify_one();
    }

    /// Drops queued jobs that have not started yet.
    pub(super) fn cancel_pending(&self) {
        let mut state = self.state.lock();
        state.rescan_queued = false;
        state.rebuild_queued = false;
    }

    pub(super) fn is_busy(&self) -> bool {
        self.state.lock().has_work()
    }

    /// Blocks until the lane drains or the token is cancelled.
    pub(super) fn join(&self, token: &ProgressToken) -> Result<()> {
        let mut state = self.state.lock();
        while state.has_work() && !state.shutdown {
            if token.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.idle.wait_for(&mut state, IDLE_POLL_INTERVAL);
        }
        token.check()
    }

    /// Stops the worker thread and waits for it to exit. A running job is
    /// allowed to finish; callers cancel its token first when they need a
    /// prompt stop.
    pub(super) fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
            self.wake.notify_all();
            self.idle.notify_all();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("index worker panicked");
            }
        }
    }
}
