use super::{CompilationStatus, LogBuffer, Origin, RequestId, ResourceId};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One compilation job: the transformation of a single source asset into
/// its runtime-ready form.
///
/// Identity is immutable; state moves monotonically from `Pending` through
/// `Compiling` to a terminal status. Reads are public, writes are
/// crate-private: only the scheduler and its workers mutate a request,
/// clients observe snapshots and the shared log.
///
#[derive(Clone, Debug)]
pub struct CompilationRequest {
    id: RequestId,
    resource_id: ResourceId,
    client_id: u32,
    origin: Origin,
    status: CompilationStatus,

    compiler_version: i32,
    source_fingerprint: u64,
    source_path: PathBuf,
    destination_path: PathBuf,
    compiler_args: Vec<String>,
    log: LogBuffer,

    time_requested: DateTime<Utc>,
    up_to_date_check_started: Option<Instant>,
    up_to_date_check_finished: Option<Instant>,
    compilation_started: Option<Instant>,
    compilation_finished: Option<Instant>,

    retry_count: u32,
}

impl CompilationRequest {
    pub(crate) fn new(
        id: RequestId,
        resource_id: ResourceId,
        origin: Origin,
        client_id: u32,
        source_path: PathBuf,
        destination_path: PathBuf,
        compiler_args: Vec<String>,
    ) -> Self {
        Self {
            id,
            resource_id,
            client_id,
            origin,
            status: CompilationStatus::Pending,
            compiler_version: -1,
            source_fingerprint: 0,
            source_path,
            destination_path,
            compiler_args,
            log: LogBuffer::new(),
            time_requested: Utc::now(),
            up_to_date_check_started: None,
            up_to_date_check_finished: None,
            compilation_started: None,
            compilation_finished: None,
            retry_count: 0,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// The client that requested this resource. Only meaningful for
    /// external requests.
    pub fn client_id(&self) -> u32 {
        assert!(
            !self.is_internal(),
            "client_id queried on an internally originated request for {}",
            self.resource_id
        );
        self.client_id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether the request originated inside the server (file watcher,
    /// manual compile, package build) rather than from a client.
    pub fn is_internal(&self) -> bool {
        self.origin.is_internal()
    }

    pub fn status(&self) -> CompilationStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_executing(&self) -> bool {
        self.status.is_executing()
    }

    pub fn has_succeeded(&self) -> bool {
        self.status.has_succeeded()
    }

    pub fn has_succeeded_with_warnings(&self) -> bool {
        self.status.has_succeeded_with_warnings()
    }

    pub fn has_failed(&self) -> bool {
        self.status.has_failed()
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn log(&self) -> String {
        self.log.snapshot()
    }

    pub(crate) fn log_buffer(&self) -> &LogBuffer {
        &self.log
    }

    pub fn compiler_version(&self) -> i32 {
        self.compiler_version
    }

    pub fn source_fingerprint(&self) -> u64 {
        self.source_fingerprint
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn destination_path(&self) -> &Path {
        &self.destination_path
    }

    pub fn compiler_args(&self) -> &[String] {
        &self.compiler_args
    }

    pub fn time_requested(&self) -> DateTime<Utc> {
        self.time_requested
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Time spent compiling: zero while Pending, running total while
    /// Compiling (so clients can display progress), final duration once
    /// complete.
    pub fn compilation_elapsed(&self) -> Duration {
        let started = match self.compilation_started {
            Some(started) if !self.is_pending() => started,
            _ => return Duration::ZERO,
        };
        match self.compilation_finished {
            Some(finished) => finished.duration_since(started),
            None => started.elapsed(),
        }
    }

    /// Time spent in the up-to-date check: zero while Pending or if the
    /// check never ran.
    pub fn up_to_date_check_elapsed(&self) -> Duration {
        if self.is_pending() {
            return Duration::ZERO;
        }
        match (self.up_to_date_check_started, self.up_to_date_check_finished) {
            (Some(started), Some(finished)) => finished.duration_since(started),
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn transition(&mut self, next: CompilationStatus) {
        assert!(
            self.status.can_transition_to(next),
            "illegal status transition for {}: {} -> {}",
            self.resource_id,
            self.status,
            next
        );
        self.status = next;
    }

    pub(crate) fn set_compiler_version(&mut self, version: i32) {
        self.compiler_version = version;
    }

    pub(crate) fn set_source_fingerprint(&mut self, fingerprint: u64) {
        self.source_fingerprint = fingerprint;
    }

    pub(crate) fn mark_check_started(&mut self) {
        self.up_to_date_check_started = Some(Instant::now());
    }

    pub(crate) fn mark_check_finished(&mut self) {
        self.up_to_date_check_finished = Some(Instant::now());
    }

    pub(crate) fn mark_compilation_started(&mut self) {
        self.compilation_started = Some(Instant::now());
    }

    pub(crate) fn mark_compilation_finished(&mut self) {
        self.compilation_finished = Some(Instant::now());
    }

    pub(crate) fn bump_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }
}
