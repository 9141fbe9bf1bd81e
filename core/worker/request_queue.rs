use crate::model::{Origin, RequestId};
use crate::sync::{Arc, Mutex};
use crossbeam::deque::{Injector, Steal};
use dashmap::DashSet;
use tracing::instrument;

/// Priority lane for a request. Interactive requests (editor, manual
/// compiles, watcher-triggered rebuilds) are always drained before package
/// builds so batch work never hurts editor latency.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueTier {
    Interactive,
    Background,
}

impl QueueTier {
    pub fn for_origin(origin: Origin) -> Self {
        match origin {
            Origin::Package => QueueTier::Background,
            _ => QueueTier::Interactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Queued,
    Skipped,
}

/// A thread-safe, two-tier FIFO queue of request ids, consumed by the
/// scheduler when worker slots free up.
///
#[derive(Default, Debug)]
pub struct RequestQueue {
    interactive: Arc<Injector<RequestId>>,
    background: Arc<Injector<RequestId>>,

    /// Requests sitting in either lane.
    in_queue: Arc<DashSet<RequestId>>,

    /// Requests pulled by the scheduler and not yet acked.
    busy: Arc<DashSet<RequestId>>,

    /// Tombstones for requests cancelled while queued; dropped lazily on
    /// the next pull.
    removed: Arc<DashSet<RequestId>>,

    // NOTE: only used to serialize the calls to `next` and prevent pulling
    // the same request twice.
    _queue_lock: Arc<Mutex<()>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(name = "RequestQueue::queue", skip(self))]
    pub fn queue(&self, id: RequestId, tier: QueueTier) -> QueueOutcome {
        if self.in_queue.contains(&id) || self.busy.contains(&id) {
            return QueueOutcome::Skipped;
        }
        self.removed.remove(&id);
        self.in_queue.insert(id);
        match tier {
            QueueTier::Interactive => self.interactive.push(id),
            QueueTier::Background => self.background.push(id),
        }
        QueueOutcome::Queued
    }

    /// Pull the next request id, interactive lane first. Duplicates and
    /// cancelled entries are discarded on the way.
    #[instrument(name = "RequestQueue::next", skip(self))]
    pub fn next(&self) -> Option<RequestId> {
        let _lock = self._queue_lock.lock().unwrap();
        loop {
            let id = steal(&self.interactive).or_else(|| steal(&self.background))?;

            if self.removed.remove(&id).is_some() {
                self.in_queue.remove(&id);
                continue;
            }
            if self.busy.contains(&id) {
                continue;
            }

            self.busy.insert(id);
            self.in_queue.remove(&id);
            return Some(id);
        }
    }

    #[instrument(name = "RequestQueue::ack", skip(self))]
    pub fn ack(&self, id: RequestId) {
        self.busy.remove(&id);
    }

    /// Put a pulled request back at the tail of its lane, e.g. when no
    /// worker slot was free after all.
    #[instrument(name = "RequestQueue::nack", skip(self))]
    pub fn nack(&self, id: RequestId, tier: QueueTier) {
        self.busy.remove(&id);
        self.in_queue.insert(id);
        match tier {
            QueueTier::Interactive => self.interactive.push(id),
            QueueTier::Background => self.background.push(id),
        }
    }

    /// Cancel a queued request. Returns whether it was actually waiting in
    /// a lane.
    #[instrument(name = "RequestQueue::remove", skip(self))]
    pub fn remove(&self, id: RequestId) -> bool {
        if self.in_queue.remove(&id).is_some() {
            self.removed.insert(id);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interactive.is_empty() && self.background.is_empty()
    }
}

fn steal(injector: &Injector<RequestId>) -> Option<RequestId> {
    loop {
        match injector.steal() {
            Steal::Success(id) => return Some(id),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}
