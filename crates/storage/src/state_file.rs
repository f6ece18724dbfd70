use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use debrief_core::SyncGate;

use crate::error::StorageError;
use crate::store::CorrespondenceStore;

/// Durable home of the correspondence store: one JSON document per
/// (source map, target map) pair, rewritten in full.
pub struct StateFile {
    path: Option<PathBuf>,
    gate: SyncGate,
    last_digest: Option<blake3::Hash>,
    /// Last written document when there is no backing file.
    snapshot: Option<Vec<u8>>,
    writes: u64,
}

impl StateFile {
    pub fn open(path: impl Into<PathBuf>, gate: SyncGate) -> Self {
        Self {
            path: Some(path.into()),
            gate,
            last_digest: None,
            snapshot: None,
            writes: 0,
        }
    }

    /// `<dir>/dmg_<source>_<target>.json`
    pub fn for_maps(dir: &Path, source_map: &str, target_map: &str, gate: SyncGate) -> Self {
        Self::open(dir.join(format!("dmg_{source_map}_{target_map}.json")), gate)
    }

    pub fn in_memory(gate: SyncGate) -> Self {
        Self {
            path: None,
            gate,
            last_digest: None,
            snapshot: None,
            writes: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    /// Number of documents actually written.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Read the last persisted store. A missing or empty file is `None`.
    pub fn load(&mut self) -> Result<Option<CorrespondenceStore>, StorageError> {
        let bytes = match &self.path {
            Some(path) => match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            },
            None => match &self.snapshot {
                Some(bytes) => bytes.clone(),
                None => return Ok(None),
            },
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let store: CorrespondenceStore = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.last_digest = Some(blake3::hash(&bytes));
        info!(
            path = ?self.path,
            outings = store.outings.len(),
            correspondences = store.corr.len(),
            "loaded correspondence store"
        );
        Ok(Some(store))
    }

    /// Write the store unless persistence is paused or nothing changed since
    /// the last write. Returns whether a write happened.
    pub fn persist(&mut self, store: &CorrespondenceStore) -> Result<bool, StorageError> {
        if self.gate.is_paused() {
            debug!("persistence paused; skipping write");
            return Ok(false);
        }

        let bytes = serde_json::to_vec_pretty(store)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let digest = blake3::hash(&bytes);
        if self.last_digest == Some(digest) {
            return Ok(false);
        }

        match &self.path {
            Some(path) => write_atomic(path, &bytes)?,
            None => self.snapshot = Some(bytes),
        }
        self.last_digest = Some(digest);
        self.writes += 1;
        Ok(true)
    }
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}
