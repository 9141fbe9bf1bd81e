use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::*;

/// Sidecar metadata written next to every compiled output. This is the only
/// state the server persists: the next up-to-date check reads it back to
/// decide whether the output is still valid.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledMetadata {
    pub compiler_version: i32,
    pub source_fingerprint: u64,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledMetadata {
    pub fn new(compiler_version: i32, source_fingerprint: u64) -> Self {
        Self {
            compiler_version,
            source_fingerprint,
            compiled_at: Utc::now(),
        }
    }

    pub fn sidecar_path(destination: &Path) -> PathBuf {
        let mut name = destination.as_os_str().to_os_string();
        name.push(".meta.json");
        PathBuf::from(name)
    }

    /// Read the sidecar for `destination`. A missing sidecar means the
    /// output was never compiled (or its metadata was lost) and reads as
    /// `None`, not an error.
    pub fn read(destination: &Path) -> Result<Option<Self>, MetadataError> {
        let path = Self::sidecar_path(destination);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(MetadataError::ReadError { path, err }),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| MetadataError::ParseError { path, err })
    }

    pub fn write(&self, destination: &Path) -> Result<(), MetadataError> {
        let path = Self::sidecar_path(destination);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| MetadataError::WriteError {
                path: path.clone(),
                err,
            })?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|err| MetadataError::ParseError {
            path: path.clone(),
            err,
        })?;
        std::fs::write(&path, raw).map_err(|err| MetadataError::WriteError { path, err })
    }
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Could not read compiled metadata {path:?} due to {err:?}")]
    ReadError { path: PathBuf, err: std::io::Error },

    #[error("Could not write compiled metadata {path:?} due to {err:?}")]
    WriteError { path: PathBuf, err: std::io::Error },

    #[error("Malformed compiled metadata {path:?}: {err}")]
    ParseError {
        path: PathBuf,
        err: serde_json::Error,
    },
}
