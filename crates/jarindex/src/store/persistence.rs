//! Store persistence - snapshot read/write operations.
//!
//! Snapshots are postcard-encoded, zstd-compressed, and written atomically
//! via a temp file and rename. A version mismatch or decode failure is not
//! an error: the store starts empty and the next rescan repopulates it.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::entry::ResourceEntry;
use super::StoreData;
use crate::config::unix_now_ms;
use crate::error::{IndexError, Result};

/// Snapshot format version - increment when changing the format.
pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistentStore {
    version: u32,
    saved_at: u64,
    next_id: u64,
    entries: Vec<ResourceEntry>,
}

pub(super) fn write_store_snapshot(path: &Path, data: &StoreData) -> Result<()> {
    let storage = PersistentStore {
        version: STORE_FORMAT_VERSION,
        saved_at: unix_now_ms(),
        next_id: data.next_id_value(),
        entries: data.entries_cloned(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            IndexError::Store(format!(
                "failed to create index directory {}: {error}",
                parent.display()
            ))
        })?;
    }

    // Write to temp file first for atomic replacement.
    let tmp_path = path.with_extension("tmp");
    {
        let output = File::create(&tmp_path).map_err(|error| {
            IndexError::Store(format!(
                "failed to create index file {}: {error}",
                tmp_path.display()
            ))
        })?;

        let encoder = zstd::Encoder::new(output, 6)
            .map_err(|error| IndexError::Store(format!("failed to create zstd encoder: {error}")))?;
        let output = encoder.auto_finish();
        let mut output = BufWriter::new(output);

        postcard::to_io(&storage, &mut output).map_err(|error| {
            IndexError::Store(format!("failed to encode index with postcard: {error}"))
        })?;
    }

    fs::rename(&tmp_path, path).map_err(|error| {
        IndexError::Store(format!(
            "failed to finalize index file {}: {error}",
            path.display()
        ))
    })?;

    log::debug!(
        "wrote index snapshot to {} ({} entries)",
        path.display(),
        storage.entries.len()
    );

    Ok(())
}

pub(super) fn load_store_snapshot(path: &Path) -> Option<StoreData> {
    let input = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return None,
        Err(error) => {
            log::warn!("index snapshot read failed for {}: {}", path.display(), error);
            return None;
        }
    };

    let decoder = match zstd::Decoder::new(input) {
        Ok(decoder) => decoder,
        Err(error) => {
            log::warn!(
                "index snapshot decompress failed for {}: {}",
                path.display(),
                error
            );
            return None;
        }
    };

    let mut input = BufReader::new(decoder);
    let mut scratch = vec![0u8; 4 * 1024];
    let storage: PersistentStore = match postcard::from_io((&mut input, &mut scratch)) {
        Ok((storage, _)) => storage,
        Err(error) => {
            log::warn!(
                "index snapshot decode failed for {}: {}",
                path.display(),
                error
            );
            return None;
        }
    };

    if storage.version != STORE_FORMAT_VERSION {
        log::debug!(
            "index snapshot version mismatch: {} != {}",
            storage.version,
            STORE_FORMAT_VERSION
        );
        return None;
    }

    log::debug!(
        "loaded index snapshot from {} ({} entries)",
        path.display(),
        storage.entries.len()
    );

    Some(StoreData::from_parts(storage.next_id, storage.entries))
}
