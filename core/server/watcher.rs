use std::path::PathBuf;

/// What the external file watcher observed happen to a path. The concrete
/// watcher (e.g. the CLI's notify bridge) translates its own event model
/// into this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FileChange {
    pub fn new<P: Into<PathBuf>>(path: P, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn created<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path, ChangeKind::Created)
    }

    pub fn modified<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path, ChangeKind::Modified)
    }

    pub fn removed<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path, ChangeKind::Removed)
    }
}
