//! Decides whether a previously compiled output is still valid for the
//! current sources and compiler version.

mod fingerprint;
mod metadata;

pub use fingerprint::*;
pub use metadata::*;

use crate::config::Config;
use crate::deps::DependencyMap;
use crate::model::ResourceId;
use crate::sync::Arc;
use std::path::PathBuf;
use tracing::instrument;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaleReason {
    /// No compiled output or sidecar metadata exists yet.
    NeverCompiled,
    /// The source file or one of its dependencies is missing or unreadable.
    SourceMissing { path: PathBuf },
    /// The source fingerprint no longer matches the compiled output.
    SourceChanged,
    /// The compiler has moved on; outputs from older versions are invalid
    /// regardless of their sources.
    CompilerVersionChanged { previous: i32, current: i32 },
    /// Dependency resolution found a cycle.
    DependencyCycle,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::NeverCompiled => write!(f, "never compiled"),
            StaleReason::SourceMissing { path } => write!(f, "source missing: {path:?}"),
            StaleReason::SourceChanged => write!(f, "source changed"),
            StaleReason::CompilerVersionChanged { previous, current } => {
                write!(f, "compiler version changed ({previous} -> {current})")
            }
            StaleReason::DependencyCycle => write!(f, "dependency cycle"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpToDateVerdict {
    UpToDate,
    Stale {
        reason: StaleReason,
        /// The current source fingerprint, when it could be computed. The
        /// scheduler stamps it on the request and records it in the output
        /// sidecar after a successful compile.
        fingerprint: Option<u64>,
    },
}

impl UpToDateVerdict {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, UpToDateVerdict::UpToDate)
    }

    fn stale(reason: StaleReason, fingerprint: Option<u64>) -> Self {
        UpToDateVerdict::Stale {
            reason,
            fingerprint,
        }
    }
}

/// Pure with respect to server state: its only side effect is filesystem
/// reads, so concurrent checks for different resources are safe. The
/// scheduler applies the verdict; the checker never touches a request.
///
#[derive(Clone, Debug)]
pub struct UpToDateChecker {
    source_root: PathBuf,
    output_root: PathBuf,
    deps: Arc<DependencyMap>,
    compiler_version: i32,
}

impl UpToDateChecker {
    pub fn new(config: &Config, deps: Arc<DependencyMap>, compiler_version: i32) -> Self {
        Self {
            source_root: config.source_root().clone(),
            output_root: config.output_root().clone(),
            deps,
            compiler_version,
        }
    }

    #[instrument(name = "UpToDateChecker::check", skip(self))]
    pub async fn check(&self, resource: &ResourceId) -> UpToDateVerdict {
        let checker = self.clone();
        let resource = resource.clone();
        tokio::task::spawn_blocking(move || checker.check_blocking(&resource))
            .await
            .unwrap_or_else(|_| {
                UpToDateVerdict::stale(StaleReason::NeverCompiled, None)
            })
    }

    fn check_blocking(&self, resource: &ResourceId) -> UpToDateVerdict {
        let source = resource.source_path(&self.source_root);
        let destination = resource.output_path(&self.output_root);

        let rel_sources = match self.deps.transitive_sources(resource) {
            Ok(sources) => sources,
            Err(_) => return UpToDateVerdict::stale(StaleReason::DependencyCycle, None),
        };

        if !source.is_file() {
            return UpToDateVerdict::stale(StaleReason::SourceMissing { path: source }, None);
        }

        let files: Vec<PathBuf> = rel_sources
            .iter()
            .map(|rel| self.source_root.join(rel))
            .collect();
        let fingerprint = match SourceFingerprint::compute(&files) {
            Ok(fingerprint) => fingerprint,
            Err(FingerprintError::CouldNotReadSource { path, .. }) => {
                return UpToDateVerdict::stale(StaleReason::SourceMissing { path }, None);
            }
        };

        if !destination.is_file() {
            return UpToDateVerdict::stale(StaleReason::NeverCompiled, Some(fingerprint));
        }

        // A corrupt or missing sidecar reads as never-compiled; the next
        // successful compile rewrites it.
        let recorded = match CompiledMetadata::read(&destination) {
            Ok(Some(recorded)) => recorded,
            _ => return UpToDateVerdict::stale(StaleReason::NeverCompiled, Some(fingerprint)),
        };

        if recorded.compiler_version != self.compiler_version {
            return UpToDateVerdict::stale(
                StaleReason::CompilerVersionChanged {
                    previous: recorded.compiler_version,
                    current: self.compiler_version,
                },
                Some(fingerprint),
            );
        }

        if recorded.source_fingerprint != fingerprint {
            return UpToDateVerdict::stale(StaleReason::SourceChanged, Some(fingerprint));
        }

        UpToDateVerdict::UpToDate
    }
}
