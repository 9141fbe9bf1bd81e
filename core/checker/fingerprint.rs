use sha2::{Digest, Sha256};
use std::fs::File;
use std::hash::Hasher;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::*;

/// Fingerprints a source set: every file contributes its path, its
/// modification time and a content digest. Folding in the content hash (and
/// not mtime alone) keeps the verdict correct across version-control
/// checkouts that rewrite timestamps.
///
pub struct SourceFingerprint;

impl SourceFingerprint {
    pub fn compute(files: &[PathBuf]) -> Result<u64, FingerprintError> {
        let mut sorted: Vec<&PathBuf> = files.iter().collect();
        sorted.sort();

        let mut hasher = seahash::SeaHasher::new();
        for file in sorted {
            let modified = std::fs::metadata(file)
                .and_then(|meta| meta.modified())
                .map_err(|err| FingerprintError::CouldNotReadSource {
                    path: file.clone(),
                    err,
                })?;
            let mtime_nanos = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();

            hasher.write(file.to_string_lossy().as_bytes());
            hasher.write_u128(mtime_nanos);
            hasher.write(Self::content_digest(file)?.as_bytes());
        }
        Ok(hasher.finish())
    }

    fn content_digest(file: &Path) -> Result<String, FingerprintError> {
        let f = File::open(file).map_err(|err| FingerprintError::CouldNotReadSource {
            path: file.to_path_buf(),
            err,
        })?;
        let mut s = Sha256::new();
        let mut buffer = [0; 2048];
        let mut reader = BufReader::new(f);
        while let Ok(len) = reader.read(&mut buffer) {
            if len == 0 {
                break;
            }
            s.update(&buffer[..len]);
        }
        Ok(format!("{:x}", s.finalize()))
    }
}

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Could not read source file {path:?} due to {err:?}")]
    CouldNotReadSource { path: PathBuf, err: std::io::Error },
}
