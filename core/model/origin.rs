use serde::{Deserialize, Serialize};

/// The trigger category that created a compilation request.
///
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Origin {
    /// Submitted by a connected client (editor, engine runtime).
    #[default]
    External,
    /// Triggered by hand, e.g. a `kiln compile` invocation.
    ManualCompile,
    /// Triggered by an on-disk change reported by the file watcher.
    FileWatcher,
    /// Part of a batch packaging build.
    Package,
}

impl Origin {
    /// Whether the request originated inside the server rather than from a
    /// connected client. `client_id` is only meaningful for external
    /// requests.
    pub fn is_internal(&self) -> bool {
        !matches!(self, Origin::External)
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::External => write!(f, "external"),
            Origin::ManualCompile => write!(f, "manual"),
            Origin::FileWatcher => write!(f, "file-watcher"),
            Origin::Package => write!(f, "package"),
        }
    }
}
