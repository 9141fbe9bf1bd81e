//! The scheduler: single authority over the request queue, worker
//! assignment, up-to-date caching, dependency invalidation and status
//! fan-out.

mod coordinator;
mod reload;
mod subscribers;
mod watcher;

pub use coordinator::*;
pub use reload::*;
pub use subscribers::*;
pub use watcher::*;

use crate::checker::{CompiledMetadata, StaleReason, UpToDateChecker, UpToDateVerdict};
use crate::compiler::{Compiler, CompilerError, CompilerVerdict};
use crate::config::Config;
use crate::deps::DependencyMap;
use crate::events::event::{CompileEvent, QueueEvent, ServerEvent, WatcherEvent};
use crate::events::EventChannel;
use crate::model::{CompilationRequest, CompilationStatus, Origin, RequestId, ResourceId};
use crate::sync::Arc;
use crate::worker::{Assignment, QueueTier, RequestQueue, RequestRegistry, SubmitOutcome, WorkerPool};
use dashmap::DashMap;
use std::time::Instant;
use thiserror::*;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum ResourceServerError {
    #[error(transparent)]
    CompilerError(CompilerError),
}

impl From<CompilerError> for ResourceServerError {
    fn from(err: CompilerError) -> Self {
        Self::CompilerError(err)
    }
}

/// A client's read-only view of a request. Cheap to clone; all queries go
/// through the registry, so a handle stays answerable until the request is
/// retired.
///
#[derive(Clone)]
pub struct RequestHandle {
    id: RequestId,
    registry: Arc<RequestRegistry>,
}

impl RequestHandle {
    fn new(id: RequestId, registry: Arc<RequestRegistry>) -> Self {
        Self { id, registry }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// A point-in-time copy of the full record. `None` once retired.
    pub fn snapshot(&self) -> Option<CompilationRequest> {
        self.registry.get(self.id)
    }

    pub fn status(&self) -> Option<CompilationStatus> {
        self.snapshot().map(|r| r.status())
    }

    pub fn is_complete(&self) -> bool {
        self.status().map(|s| s.is_complete()).unwrap_or(true)
    }

    pub fn has_succeeded(&self) -> bool {
        self.status().map(|s| s.has_succeeded()).unwrap_or(false)
    }

    pub fn log(&self) -> String {
        self.snapshot().map(|r| r.log()).unwrap_or_default()
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.snapshot().map(|r| r.resource_id().clone())
    }
}

/// # The Resource Server
///
/// One scheduling authority plus N isolated worker slots. Requests enter
/// through `submit` (clients), `notify_file_changed` (the watcher) or
/// `compile_all` (package builds); the scheduler deduplicates them, consults
/// the up-to-date checker, and hands stale work to free workers. Workers
/// report back through a single completion channel, so only the scheduler
/// ever mutates request state.
///
pub struct ResourceServer {
    config: Config,
    compiler: Compiler,
    deps: Arc<DependencyMap>,
    registry: Arc<RequestRegistry>,
    queue: RequestQueue,
    pool: WorkerPool,
    checker: UpToDateChecker,
    subscribers: SubscriberTable,
    reload: ReloadCoordinator,
    coordinator: Arc<Coordinator>,
    event_channel: Arc<EventChannel>,

    /// Terminal requests and when they completed, for retirement.
    completed_at: DashMap<RequestId, Instant>,

    /// How much of each live-streamed log has already been delivered.
    log_cursors: DashMap<RequestId, usize>,
}

impl ResourceServer {
    #[instrument(name = "ResourceServer::new", skip(config, deps, hooks))]
    pub async fn new(
        config: Config,
        deps: Arc<DependencyMap>,
        hooks: Arc<dyn RuntimeHooks>,
    ) -> Result<Self, ResourceServerError> {
        let compiler = Compiler::from_config(&config).await?;
        let checker = UpToDateChecker::new(&config, deps.clone(), compiler.version());
        let pool = WorkerPool::new(config.max_workers());
        let event_channel = config.event_channel();
        let reload = ReloadCoordinator::new(hooks, event_channel.clone());

        Ok(Self {
            compiler,
            deps,
            registry: Arc::new(RequestRegistry::new()),
            queue: RequestQueue::new(),
            pool,
            checker,
            subscribers: SubscriberTable::new(),
            reload,
            coordinator: Arc::new(Coordinator::new()),
            event_channel,
            completed_at: DashMap::new(),
            log_cursors: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn compiler_version(&self) -> i32 {
        self.compiler.version()
    }

    pub fn worker_capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn workers_available(&self) -> usize {
        self.pool.available()
    }

    pub fn request(&self, id: RequestId) -> Option<CompilationRequest> {
        self.registry.get(id)
    }

    pub fn requests(&self) -> Vec<CompilationRequest> {
        self.registry.snapshots()
    }

    /// Submit a compile of `resource`. If an equivalent request is already
    /// pending or compiling, its handle is returned instead of creating a
    /// duplicate.
    #[instrument(name = "ResourceServer::submit", skip(self))]
    pub fn submit(&self, resource: ResourceId, origin: Origin, client_id: u32) -> RequestHandle {
        self.deps.register(&resource);

        let source = resource.source_path(self.config.source_root());
        let destination = resource.output_path(self.config.output_root());
        let args = self.compiler.compile_args(&source, &destination);

        let outcome = self
            .registry
            .create(&resource, origin, client_id, source, destination, args);

        let id = match outcome {
            SubmitOutcome::Created(id) => {
                self.queue.queue(id, QueueTier::for_origin(origin));
                self.event_channel.send(QueueEvent::RequestQueued {
                    resource: resource.clone(),
                    origin,
                });
                id
            }
            SubmitOutcome::Existing(id) => {
                debug!("coalesced submit for {resource} into {id}");
                self.event_channel
                    .send(QueueEvent::RequestDeduplicated { resource });
                id
            }
        };

        if origin == Origin::External {
            self.subscribers
                .subscribe(id, ListenerKey::Client(client_id), false);
        }

        RequestHandle::new(id, self.registry.clone())
    }

    /// Submit a Package-origin request for every asset under the source
    /// root. Outputs, VCS internals and sidecar metadata are skipped.
    #[instrument(name = "ResourceServer::compile_all", skip(self))]
    pub fn compile_all(&self) -> Vec<RequestHandle> {
        self.scan_source_root()
            .into_iter()
            .map(|resource| self.submit(resource, Origin::Package, 0))
            .collect()
    }

    pub fn subscribe(&self, request: RequestId, listener: ListenerKey, live_log: bool) {
        self.subscribers.subscribe(request, listener, live_log);
    }

    pub fn unsubscribe(&self, request: RequestId, listener: ListenerKey) {
        self.subscribers.unsubscribe(request, listener);
    }

    pub fn poll_notifications(&self, listener: ListenerKey) -> Vec<Notification> {
        self.subscribers.poll(listener)
    }

    pub fn acknowledge(&self, listener: ListenerKey, request: RequestId) {
        self.subscribers.acknowledge(listener, request);
    }

    /// Cancel a request. Pending requests leave the queue immediately;
    /// compiling requests have their process terminated, which resolves to
    /// `Failed` with a cancellation marker once the worker reports back.
    #[instrument(name = "ResourceServer::cancel", skip(self))]
    pub fn cancel(&self, id: RequestId) -> bool {
        let request = match self.registry.get(id) {
            Some(request) => request,
            None => return false,
        };

        if request.is_pending() {
            if !self.queue.remove(id) {
                return false;
            }
            request.log_buffer().append_line("compilation cancelled");
            self.finish_request(id, CompilationStatus::Failed);
            self.event_channel.send(QueueEvent::RequestCancelled {
                resource: request.resource_id().clone(),
            });
            return true;
        }

        if request.is_executing() {
            return self.pool.cancel(id);
        }

        false
    }

    /// The file watcher reported a change. Resolve every resource whose
    /// source or transitive dependency matches the path, coordinate
    /// unloading with the runtime, and queue recompiles.
    #[instrument(name = "ResourceServer::notify_file_changed", skip(self))]
    pub fn notify_file_changed(&self, change: FileChange) {
        self.event_channel.send(WatcherEvent::FileChanged {
            path: change.path.clone(),
        });

        let rel = change
            .path
            .strip_prefix(self.config.source_root())
            .unwrap_or(&change.path)
            .to_path_buf();

        let affected = self.deps.resources_affected_by(&rel);
        if affected.is_empty() {
            return;
        }

        // Anything that install-depends on an affected resource must be
        // reloaded alongside it, even though only the affected set
        // recompiles.
        let mut reload_set = affected.clone();
        for resource in &affected {
            for dependent in self.deps.install_dependents_of(resource) {
                if !reload_set.contains(&dependent) {
                    reload_set.push(dependent);
                }
            }
        }
        self.reload.begin_invalidation(&reload_set);

        self.event_channel.send(WatcherEvent::ResourcesInvalidated {
            count: affected.len(),
        });

        for resource in affected {
            self.submit(resource, Origin::FileWatcher, 0);
        }
    }

    /// One scheduling turn: fold in finished compiles, dispatch pending
    /// work, stream live logs, retire old requests.
    pub async fn tick(&self) {
        self.drain_completions();
        self.schedule_pending().await;
        self.stream_live_logs();
        self.retire_expired();
    }

    /// Run the scheduling loop until shutdown is signalled.
    pub async fn run(&self) {
        self.event_channel.send(ServerEvent::Started {
            workers: self.pool.capacity(),
        });
        while self.coordinator.should_run() {
            tokio::time::sleep(self.config.tick_interval()).await;
            self.tick().await;
        }
        self.event_channel.send(ServerEvent::ShuttingDown);
    }

    pub fn shutdown(&self) {
        self.coordinator.signal_shutdown();
    }

    fn drain_completions(&self) {
        for report in self.pool.drain_completions() {
            let request = match self.registry.get(report.request_id) {
                Some(request) => request,
                None => continue,
            };

            // Bounded retry for abnormal terminations (crash, failed
            // spawn). Clean failures and timeouts are terminal.
            if report.verdict.is_abnormal() {
                let attempts = self
                    .registry
                    .with_mut(report.request_id, |r| r.bump_retry())
                    .unwrap_or(u32::MAX);
                if attempts <= self.config.compile_retry_limit() {
                    request.log_buffer().append_line(&format!(
                        "retrying after abnormal termination (attempt {}/{})",
                        attempts + 1,
                        self.config.compile_retry_limit() + 1
                    ));
                    self.event_channel.send(CompileEvent::CompileRetried {
                        resource: request.resource_id().clone(),
                        attempt: attempts,
                    });
                    let worker = self
                        .pool
                        .free_worker()
                        .expect("a worker slot must be free right after a completion");
                    let invocation = self
                        .compiler
                        .invocation(request.resource_id(), request.compiler_args());
                    let assignment =
                        worker.assign(report.request_id, invocation, request.log_buffer().clone());
                    assert_eq!(assignment, Assignment::Accepted);
                    continue;
                }
            }

            let status = match report.verdict {
                CompilerVerdict::Success { warnings: false } => CompilationStatus::Succeeded,
                CompilerVerdict::Success { warnings: true } => {
                    CompilationStatus::SucceededWithWarnings
                }
                _ => CompilationStatus::Failed,
            };

            self.registry
                .with_mut(report.request_id, |r| r.mark_compilation_finished());

            if status.has_succeeded() {
                let metadata =
                    CompiledMetadata::new(self.compiler.version(), request.source_fingerprint());
                if let Err(err) = metadata.write(request.destination_path()) {
                    request
                        .log_buffer()
                        .append_line(&format!("could not record compiled metadata: {err}"));
                }
            }

            self.finish_request(report.request_id, status);
            self.queue.ack(report.request_id);

            match report.verdict {
                CompilerVerdict::Success { warnings } => {
                    let elapsed = self
                        .registry
                        .get(report.request_id)
                        .map(|r| r.compilation_elapsed())
                        .unwrap_or_default();
                    self.event_channel.send(CompileEvent::CompileSucceeded {
                        resource: request.resource_id().clone(),
                        warnings,
                        elapsed,
                    });
                }
                verdict => {
                    self.event_channel.send(CompileEvent::CompileFailed {
                        resource: request.resource_id().clone(),
                        reason: verdict_reason(&verdict),
                    });
                }
            }
        }
    }

    async fn schedule_pending(&self) {
        loop {
            if self.pool.available() == 0 {
                break;
            }
            let id = match self.queue.next() {
                Some(id) => id,
                None => break,
            };
            let request = match self.registry.get(id) {
                Some(request) => request,
                None => {
                    self.queue.ack(id);
                    continue;
                }
            };
            if !request.is_pending() {
                self.queue.ack(id);
                continue;
            }

            self.registry.with_mut(id, |r| r.mark_check_started());
            let verdict = self.checker.check(request.resource_id()).await;
            self.registry.with_mut(id, |r| r.mark_check_finished());

            match verdict {
                UpToDateVerdict::UpToDate => {
                    request.log_buffer().append_line("output is up to date");
                    self.event_channel.send(CompileEvent::ResourceUpToDate {
                        resource: request.resource_id().clone(),
                    });
                    self.finish_request(id, CompilationStatus::Succeeded);
                    self.queue.ack(id);
                }
                UpToDateVerdict::Stale {
                    reason: reason @ (StaleReason::SourceMissing { .. } | StaleReason::DependencyCycle),
                    ..
                } => {
                    request
                        .log_buffer()
                        .append_line(&format!("cannot compile: {reason}"));
                    self.event_channel.send(CompileEvent::CompileFailed {
                        resource: request.resource_id().clone(),
                        reason: reason.to_string(),
                    });
                    self.finish_request(id, CompilationStatus::Failed);
                    self.queue.ack(id);
                }
                UpToDateVerdict::Stale {
                    reason,
                    fingerprint,
                } => {
                    if let Some(parent) = request.destination_path().parent() {
                        if let Err(err) = std::fs::create_dir_all(parent) {
                            request.log_buffer().append_line(&format!(
                                "could not create output directory {parent:?}: {err}"
                            ));
                            self.finish_request(id, CompilationStatus::Failed);
                            self.queue.ack(id);
                            continue;
                        }
                    }

                    self.registry.with_mut(id, |r| {
                        r.transition(CompilationStatus::Compiling);
                        r.set_compiler_version(self.compiler.version());
                        if let Some(fingerprint) = fingerprint {
                            r.set_source_fingerprint(fingerprint);
                        }
                        r.mark_compilation_started();
                    });
                    request
                        .log_buffer()
                        .append_line(&format!("stale ({reason}), compiling"));

                    let worker = self
                        .pool
                        .free_worker()
                        .expect("scheduler checked for capacity before pulling work");
                    let invocation = self
                        .compiler
                        .invocation(request.resource_id(), request.compiler_args());
                    let assignment = worker.assign(id, invocation, request.log_buffer().clone());
                    assert_eq!(
                        assignment,
                        Assignment::Accepted,
                        "free worker {} rejected an assignment",
                        worker.id()
                    );

                    self.notify_status_of(id);
                    self.event_channel.send(CompileEvent::CompileStarted {
                        resource: request.resource_id().clone(),
                    });
                }
            }
        }
    }

    /// Push freshly appended log text to listeners that opted into live
    /// streaming.
    fn stream_live_logs(&self) {
        for request in self.registry.snapshots() {
            if !request.is_executing() {
                continue;
            }
            let id = request.id();
            if !self.subscribers.has_live_log_listeners(id) {
                continue;
            }
            let cursor = self.log_cursors.get(&id).map(|c| *c).unwrap_or(0);
            let len = request.log_buffer().len();
            if len > cursor {
                let chunk = request.log_buffer().tail_from(cursor);
                self.subscribers
                    .notify_log(id, request.resource_id().clone(), chunk);
                self.log_cursors.insert(id, len);
            }
        }
    }

    /// Drop terminal requests whose retention window elapsed. The window
    /// elapsing overrides listeners that never acknowledged.
    fn retire_expired(&self) {
        let retention = self.config.retention_window();
        let expired: Vec<RequestId> = self
            .completed_at
            .iter()
            .filter(|entry| entry.value().elapsed() >= retention)
            .map(|entry| *entry.key())
            .collect();
        for id in expired {
            debug!("retiring request {id}");
            self.completed_at.remove(&id);
            self.log_cursors.remove(&id);
            self.subscribers.remove_request(id);
            self.registry.retire(id);
        }
    }

    /// The one funnel every terminal transition goes through: stamps the
    /// status, releases the resource for resubmission, settles hot-reload
    /// coordination, notifies listeners and starts the retention clock.
    fn finish_request(&self, id: RequestId, status: CompilationStatus) {
        self.registry.mark_terminal(id, status);
        if let Some(request) = self.registry.get(id) {
            self.reload
                .finish(request.resource_id(), status.has_succeeded());
        }
        self.notify_status_of(id);
        self.completed_at.insert(id, Instant::now());
    }

    fn notify_status_of(&self, id: RequestId) {
        if let Some(request) = self.registry.get(id) {
            self.subscribers
                .notify_status(id, request.resource_id().clone(), request.status());
        }
    }

    fn scan_source_root(&self) -> Vec<ResourceId> {
        let root = self.config.source_root().clone();

        let skip_patterns = {
            let mut builder = globset::GlobSetBuilder::new();
            for pattern in &["*/.kiln*", "*.kiln/*", "*.git*", "*.meta.json", "*kiln.deps.json"] {
                let glob = globset::Glob::new(pattern).unwrap();
                builder.add(glob);
            }
            builder.build().unwrap()
        };

        let mut resources = vec![];
        let mut dirs = vec![root.clone()];
        while let Some(dir) = dirs.pop() {
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(_) => continue,
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if skip_patterns.is_match(&path) {
                    continue;
                }
                if path.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&root) {
                    resources.push(ResourceId::from(rel));
                }
            }
        }
        resources.sort();
        resources
    }
}

fn verdict_reason(verdict: &CompilerVerdict) -> String {
    match verdict {
        CompilerVerdict::Success { .. } => "succeeded".to_string(),
        CompilerVerdict::Failure { exit_code } => {
            format!("compiler reported failure (exit {exit_code})")
        }
        CompilerVerdict::Crashed => "compiler crashed".to_string(),
        CompilerVerdict::TimedOut => "compilation timed out".to_string(),
        CompilerVerdict::Cancelled => "compilation cancelled".to_string(),
        CompilerVerdict::SpawnFailed => "compiler could not be started".to_string(),
    }
}
