use crate::sync::{Arc, RwLock};

/// Shared, append-only log text for one compilation request.
///
/// The worker's pipe-capture task appends lines while the compiler runs;
/// clients read consistent snapshots at any time, which is what makes live
/// log streaming possible while a request is still Compiling.
///
#[derive(Clone, Debug, Default)]
pub struct LogBuffer {
    inner: Arc<RwLock<String>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_line(&self, line: &str) {
        let mut log = self.inner.write().unwrap();
        log.push_str(line);
        log.push('\n');
    }

    pub fn snapshot(&self) -> String {
        self.inner.read().unwrap().clone()
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.inner.read().unwrap().contains(marker)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text appended since byte offset `from`, for incremental
    /// streaming to subscribed clients.
    pub fn tail_from(&self, from: usize) -> String {
        let log = self.inner.read().unwrap();
        log.get(from..).unwrap_or_default().to_string()
    }
}
