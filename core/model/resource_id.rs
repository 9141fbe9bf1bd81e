use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The logical identity of a source asset: a normalized, relative,
/// `/`-separated path under the source root (e.g. `meshes/hero.msh`).
///
/// A ResourceId is cheap to clone and names the same asset across the
/// editor, the file watcher and the package step.
///
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    pub fn new<S: AsRef<str>>(raw: S) -> Self {
        let mut path = raw.as_ref().replace('\\', "/");
        while let Some(stripped) = path.strip_prefix("./") {
            path = stripped.to_string();
        }
        let path = path.trim_start_matches('/').to_string();
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute path of the source asset under `source_root`.
    pub fn source_path(&self, source_root: &Path) -> PathBuf {
        source_root.join(self.as_str())
    }

    /// Absolute path of the compiled output under `output_root`. Compiled
    /// resources keep their logical path.
    pub fn output_path(&self, output_root: &Path) -> PathBuf {
        output_root.join(self.as_str())
    }

    /// Relative path form, for comparisons against watcher-reported paths.
    pub fn as_path(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&Path> for ResourceId {
    fn from(value: &Path) -> Self {
        Self::new(value.to_string_lossy())
    }
}
