use serde::{Deserialize, Serialize};

/// Lifecycle state of a compilation request. Transitions are monotonic:
/// `Pending` → `Compiling` → one of the terminal states, and never out of a
/// terminal state.
///
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum CompilationStatus {
    #[default]
    Pending,
    Compiling,
    Succeeded,
    SucceededWithWarnings,
    Failed,
}

impl CompilationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, CompilationStatus::Pending)
    }

    pub fn is_executing(&self) -> bool {
        matches!(self, CompilationStatus::Compiling)
    }

    pub fn has_succeeded(&self) -> bool {
        matches!(
            self,
            CompilationStatus::Succeeded | CompilationStatus::SucceededWithWarnings
        )
    }

    pub fn has_succeeded_with_warnings(&self) -> bool {
        matches!(self, CompilationStatus::SucceededWithWarnings)
    }

    pub fn has_failed(&self) -> bool {
        matches!(self, CompilationStatus::Failed)
    }

    pub fn is_complete(&self) -> bool {
        self.has_succeeded() || self.has_failed()
    }

    /// Whether `next` is a legal successor of `self`.
    pub(crate) fn can_transition_to(&self, next: CompilationStatus) -> bool {
        match self {
            CompilationStatus::Pending => {
                matches!(next, CompilationStatus::Compiling) || next.is_complete()
            }
            CompilationStatus::Compiling => next.is_complete(),
            _ => false,
        }
    }
}

impl std::fmt::Display for CompilationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilationStatus::Pending => write!(f, "pending"),
            CompilationStatus::Compiling => write!(f, "compiling"),
            CompilationStatus::Succeeded => write!(f, "succeeded"),
            CompilationStatus::SucceededWithWarnings => write!(f, "succeeded with warnings"),
            CompilationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_successor() {
        for terminal in [
            CompilationStatus::Succeeded,
            CompilationStatus::SucceededWithWarnings,
            CompilationStatus::Failed,
        ] {
            for next in [
                CompilationStatus::Pending,
                CompilationStatus::Compiling,
                CompilationStatus::Succeeded,
                CompilationStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_can_complete_without_compiling() {
        // Up-to-date cache hits and cancellations finish a request that
        // never reached a worker.
        assert!(CompilationStatus::Pending.can_transition_to(CompilationStatus::Succeeded));
        assert!(CompilationStatus::Pending.can_transition_to(CompilationStatus::Failed));
    }
}
