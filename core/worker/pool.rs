use super::{CompletionChannel, CompletionReport, ResourceServerWorker};
use crate::model::RequestId;
use tracing::instrument;

/// A fixed-size pool of isolated worker slots. Pool capacity bounds total
/// compile parallelism; the scheduler never assigns more concurrent
/// requests than there are free slots.
///
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<ResourceServerWorker>,
    completions: CompletionChannel,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a worker pool needs at least one slot");
        let completions = CompletionChannel::new();
        let workers = (0..capacity)
            .map(|id| ResourceServerWorker::new(id, completions.clone()))
            .collect();
        Self {
            workers,
            completions,
        }
    }

    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    pub fn available(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_busy()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.available() == self.capacity()
    }

    #[instrument(name = "WorkerPool::free_worker", skip(self))]
    pub fn free_worker(&self) -> Option<&ResourceServerWorker> {
        self.workers.iter().find(|w| !w.is_busy())
    }

    /// Forward a cancellation to whichever slot holds `request_id`.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.workers.iter().any(|w| w.cancel(request_id))
    }

    pub fn drain_completions(&self) -> Vec<CompletionReport> {
        self.completions.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_start_fully_idle() {
        let pool = WorkerPool::new(4);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
        assert!(pool.is_idle());
        assert!(pool.free_worker().is_some());
        assert!(pool.drain_completions().is_empty());
    }

    #[test]
    #[should_panic]
    fn zero_capacity_pools_are_a_defect() {
        WorkerPool::new(0);
    }

    #[test]
    fn cancelling_an_unknown_request_is_a_noop() {
        let pool = WorkerPool::new(2);
        assert!(!pool.cancel(RequestId::next()));
    }
}
