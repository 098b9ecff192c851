//! Workspace snapshots - every indexable location and its owners.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::cancel::ProgressToken;
use crate::error::Result;
use crate::types::{Indexable, Owner};

/// Lists the indexable locations reachable from the workspace. Each item
/// pairs a location with one logical element mapping onto it; a location
/// referenced by several elements appears once per owner. Must be safe to
/// call repeatedly and cheaply.
pub trait Enumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<(Indexable, Owner)>>;
}

/// Everything known about one location: its resolved kind and the owners
/// currently mapping onto it.
#[derive(Clone, Debug)]
pub struct LocationInfo {
    pub indexable: Indexable,
    pub owners: Vec<Owner>,
}

/// Map from location to owners, captured at the start of a rescan.
#[derive(Debug, Default)]
pub struct WorkspaceSnapshot {
    locations: FnvHashMap<PathBuf, LocationInfo>,
}

impl WorkspaceSnapshot {
    pub fn create(enumerator: &dyn Enumerator, token: &ProgressToken) -> Result<Self> {
        token.check()?;
        let mut locations: FnvHashMap<PathBuf, LocationInfo> = FnvHashMap::default();
        for (indexable, owner) in enumerator.enumerate()? {
            let path = indexable.location().to_path_buf();
            let info = locations.entry(path).or_insert_with(|| LocationInfo {
                indexable: indexable.clone(),
                owners: Vec::new(),
            });
            info.owners.push(owner);
        }
        Ok(Self { locations })
    }

    pub fn all_locations(&self) -> HashSet<PathBuf> {
        self.locations.keys().cloned().collect()
    }

    pub fn get(&self, location: &Path) -> Option<&LocationInfo> {
        self.locations.get(location)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
