use crate::model::{Origin, ResourceId};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueEvent {
    RequestQueued {
        resource: ResourceId,
        origin: Origin,
    },
    RequestDeduplicated {
        resource: ResourceId,
    },
    RequestCancelled {
        resource: ResourceId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompileEvent {
    ResourceUpToDate {
        resource: ResourceId,
    },
    CompileStarted {
        resource: ResourceId,
    },
    CompileSucceeded {
        resource: ResourceId,
        warnings: bool,
        elapsed: Duration,
    },
    CompileFailed {
        resource: ResourceId,
        reason: String,
    },
    CompileRetried {
        resource: ResourceId,
        attempt: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WatcherEvent {
    FileChanged { path: PathBuf },
    ResourcesInvalidated { count: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReloadEvent {
    UnloadRequested { resource: ResourceId },
    ReloadReady { resource: ResourceId },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerEvent {
    Started { workers: usize },
    ShuttingDown,
}

#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Event {
    /// The "nothing happened" event.
    #[default]
    Noop,
    QueueEvent(QueueEvent),
    CompileEvent(CompileEvent),
    WatcherEvent(WatcherEvent),
    ReloadEvent(ReloadEvent),
    ServerEvent(ServerEvent),
}

impl From<QueueEvent> for Event {
    fn from(value: QueueEvent) -> Self {
        Event::QueueEvent(value)
    }
}

impl From<CompileEvent> for Event {
    fn from(value: CompileEvent) -> Self {
        Event::CompileEvent(value)
    }
}

impl From<WatcherEvent> for Event {
    fn from(value: WatcherEvent) -> Self {
        Event::WatcherEvent(value)
    }
}

impl From<ReloadEvent> for Event {
    fn from(value: ReloadEvent) -> Self {
        Event::ReloadEvent(value)
    }
}

impl From<ServerEvent> for Event {
    fn from(value: ServerEvent) -> Self {
        Event::ServerEvent(value)
    }
}
