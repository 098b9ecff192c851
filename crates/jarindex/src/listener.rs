//! Change notification for index consumers.

use std::path::PathBuf;

/// Delta describing one completed rescan: the archive roots mapped into
/// open projects whose content actually changed. One consolidated event is
/// fired per rescan, batching all affected roots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexerEvent {
    pub changed_roots: Vec<PathBuf>,
}

/// Subscribers are notified synchronously on the rescan thread.
pub trait Listener: Send + Sync {
    fn consume(&self, event: &IndexerEvent);
}
