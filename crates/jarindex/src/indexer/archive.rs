//! Indexing of changed locations.
//!
//! A changed location is never patched in place. A fresh entry is created
//! with `done_indexing == false`, populated member by member, completed by
//! writing the fingerprint and flipping the flag in one lock acquisition,
//! and only then are the older entries for the same path deleted. Readers
//! keep resolving the old entry until the replacement is complete, and a
//! crash at any point leaves only collectable garbage.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use super::manager::IndexerInner;
use crate::cancel::ProgressToken;
use crate::config::unix_now_ms;
use crate::error::{IndexError, Result};
use crate::fingerprint::Fingerprint;
use crate::snapshot::LocationInfo;
use crate::store::{EntryFlags, EntryId};
use crate::types::{location_key, Indexable};

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
const CLASS_SUFFIX: &str = ".class";

/// What indexing one location produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum IndexOutcome {
    /// Members were extracted and recorded.
    Indexed { children: usize },
    /// The location does not exist.
    Missing,
    /// The container exists but cannot be opened as an archive. Recorded
    /// as a known zero-child result so it is not retried every pass.
    Corrupt,
    /// Transient read failure; the previous entry stays in place.
    Skip,
}

impl IndexerInner {
    /// Reindexes one changed location, atomically superseding every older
    /// entry for the same path.
    pub(super) fn rescan_location(
        &self,
        path: &Path,
        info: &LocationInfo,
        token: &ProgressToken,
    ) -> Result<()> {
        // A location nothing maps onto anymore is handled by garbage
        // collection, not by indexing.
        if info.owners.is_empty() {
            return Ok(());
        }

        let key = location_key(path);
        let mut fingerprint = Fingerprint::empty().test(path)?.new_fingerprint;

        let id = self
            .store
            .write()
            .create_entry(&key, unix_now_ms(), info.owners.clone());

        let outcome = if fingerprint.file_exists() {
            match self.add_element(id, &info.indexable, token) {
                Ok(outcome) => outcome,
                Err(error) => {
                    // Cancelled or failed partway; the fresh entry is not
                    // usable. Cleanup runs on its own token.
                    self.delete_resource(id, &ProgressToken::new())?;
                    return Err(error);
                }
            }
        } else {
            IndexOutcome::Missing
        };

        match outcome {
            IndexOutcome::Skip => {
                log::debug!("leaving {} alone after a transient read failure", path.display());
                self.delete_resource(id, &ProgressToken::new())?;
                self.state_cache.remove(path);
                return Ok(());
            }
            IndexOutcome::Missing => {
                // Absence is a known result: a completed zero-child entry
                // carrying the empty fingerprint, not something to retry.
                fingerprint = Fingerprint::empty();
            }
            IndexOutcome::Corrupt => {
                log::warn!("corrupt archive at {}", path.display());
                let mut data = self.store.write();
                if let Some(entry) = data.entry_mut(id) {
                    entry.flags |= EntryFlags::CORRUPT_ARCHIVE;
                }
            }
            IndexOutcome::Indexed { children } => {
                log::debug!("indexed {} ({} types)", path.display(), children);
            }
        }

        {
            // Completion point: fingerprint and done flag land in one lock
            // acquisition, so an interrupted pass never leaves an entry
            // that looks finished.
            let mut data = self.store.write();
            if let Some(entry) = data.entry_mut(id) {
                entry.fingerprint = fingerprint;
                entry.done_indexing = true;
            }
        }

        // Indexing changes the up-to-date answer for this path.
        self.state_cache.remove(path);

        // Every other entry under this location is now superseded.
        let stale: Vec<EntryId> = {
            let data = self.store.read();
            data.all_with_location(&key)
                .into_iter()
                .filter(|old| *old != id)
                .collect()
        };
        for old in stale {
            self.delete_resource(old, token)?;
        }
        Ok(())
    }

    fn add_element(
        &self,
        id: EntryId,
        indexable: &Indexable,
        token: &ProgressToken,
    ) -> Result<IndexOutcome> {
        match indexable {
            Indexable::Archive(path) => self.add_archive(id, path, token),
            Indexable::SingleFile(path) => self.add_single_file(id, path),
        }
    }

    /// Walks every member of an archive, converting class members into
    /// children of `id`. One child is written per lock acquisition.
    fn add_archive(&self, id: EntryId, path: &Path, token: &ProgressToken) -> Result<IndexOutcome> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(IndexOutcome::Missing),
            Err(error) => {
                log::warn!("failed to open {}: {}", path.display(), error);
                return Ok(IndexOutcome::Skip);
            }
        };
        let mut archive = match zip::ZipArchive::new(BufReader::new(file)) {
            Ok(archive) => archive,
            Err(error) => {
                log::warn!("cannot read {} as an archive: {}", path.display(), error);
                return Ok(IndexOutcome::Corrupt);
            }
        };

        let mut children = 0;
        for index in 0..archive.len() {
            token.check_sparse(index)?;

            let mut member = match archive.by_index(index) {
                Ok(member) => member,
                Err(error) => {
                    log::warn!("unreadable member #{index} in {}: {}", path.display(), error);
                    continue;
                }
            };
            if member.is_dir() {
                continue;
            }
            let name = member.name().to_string();

            if name == MANIFEST_PATH {
                let mut manifest = String::new();
                if member.read_to_string(&mut manifest).is_ok() {
                    let mut data = self.store.write();
                    if let Some(entry) = data.entry_mut(id) {
                        entry.manifest = Some(manifest);
                    }
                }
                continue;
            }
            if !name.ends_with(CLASS_SUFFIX) {
                continue;
            }

            let mut bytes = Vec::with_capacity(member.size() as usize);
            if let Err(error) = member.read_to_end(&mut bytes) {
                log::warn!("failed to read {name} in {}: {}", path.display(), error);
                return Ok(IndexOutcome::Skip);
            }

            match self.converter.convert(&name, &bytes) {
                Ok(record) => {
                    let mut data = self.store.write();
                    if !data.contains(id) {
                        // A concurrent rebuild cleared the store.
                        return Err(IndexError::Cancelled);
                    }
                    if let Some(entry) = data.entry_mut(id) {
                        entry.children.push(record);
                        children += 1;
                    }
                }
                Err(error) => {
                    log::debug!("skipping member {name} in {}: {}", path.display(), error);
                }
            }
        }

        Ok(IndexOutcome::Indexed { children })
    }

    /// Indexes one loose compiled-class file.
    fn add_single_file(&self, id: EntryId, path: &Path) -> Result<IndexOutcome> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(IndexOutcome::Missing),
            Err(error) => {
                log::warn!("failed to read {}: {}", path.display(), error);
                return Ok(IndexOutcome::Skip);
            }
        };

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.converter.convert(&name, &bytes) {
            Ok(record) => {
                let mut data = self.store.write();
                if let Some(entry) = data.entry_mut(id) {
                    entry.children.push(record);
                }
                Ok(IndexOutcome::Indexed { children: 1 })
            }
            Err(error) => {
                log::warn!("cannot index {}: {}", path.display(), error);
                Ok(IndexOutcome::Corrupt)
            }
        }
    }
}
