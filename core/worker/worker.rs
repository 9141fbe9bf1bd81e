use crate::compiler::{CompilerInvocation, CompilerVerdict};
use crate::model::{LogBuffer, RequestId};
use crate::sync::{Arc, Mutex};
use crossbeam::deque::{Injector, Steal};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub type WorkerId = usize;

/// What a worker hands back to the scheduler when its compile finishes.
/// Workers never touch scheduler state directly; this single return channel
/// is their only output.
#[derive(Clone, Debug)]
pub struct CompletionReport {
    pub worker_id: WorkerId,
    pub request_id: RequestId,
    pub verdict: CompilerVerdict,
}

/// The shared return channel completed compiles flow through, drained by
/// the scheduler once per turn.
#[derive(Clone, Debug, Default)]
pub struct CompletionChannel {
    bus: Arc<Injector<CompletionReport>>,
}

impl CompletionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, report: CompletionReport) {
        self.bus.push(report);
    }

    pub fn drain(&self) -> Vec<CompletionReport> {
        let mut reports = vec![];
        loop {
            match self.bus.steal() {
                Steal::Success(report) => reports.push(report),
                Steal::Empty => return reports,
                Steal::Retry => continue,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bus.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Accepted,
    Busy,
}

#[derive(Debug)]
struct InFlight {
    request_id: RequestId,
    cancel: CancellationToken,
}

/// One isolated compiler-invocation slot. Holds at most one in-flight
/// request; the compiler itself runs as a child process on a spawned task,
/// so a crash or hang is contained to this slot. A worker never retries on
/// its own.
///
#[derive(Debug)]
pub struct ResourceServerWorker {
    id: WorkerId,
    binding: Arc<Mutex<Option<InFlight>>>,
    completions: CompletionChannel,
}

impl ResourceServerWorker {
    pub fn new(id: WorkerId, completions: CompletionChannel) -> Self {
        Self {
            id,
            binding: Arc::new(Mutex::new(None)),
            completions,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.binding.lock().unwrap().is_some()
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.binding
            .lock()
            .unwrap()
            .as_ref()
            .map(|in_flight| in_flight.request_id)
    }

    /// Bind this slot to a request and start its compile. Fails with `Busy`
    /// when a compile is already in flight.
    #[instrument(name = "ResourceServerWorker::assign", skip(self, invocation, log))]
    pub fn assign(
        &self,
        request_id: RequestId,
        invocation: CompilerInvocation,
        log: LogBuffer,
    ) -> Assignment {
        let mut binding = self.binding.lock().unwrap();
        if binding.is_some() {
            return Assignment::Busy;
        }

        let cancel = CancellationToken::new();
        *binding = Some(InFlight {
            request_id,
            cancel: cancel.clone(),
        });
        drop(binding);

        let slot = self.binding.clone();
        let completions = self.completions.clone();
        let worker_id = self.id;
        tokio::spawn(async move {
            let verdict = invocation.run(&log, cancel).await;
            // Free the slot before reporting so the scheduler always sees
            // capacity when it processes the completion.
            *slot.lock().unwrap() = None;
            completions.push(CompletionReport {
                worker_id,
                request_id,
                verdict,
            });
        });

        Assignment::Accepted
    }

    /// Ask the slot to terminate the in-flight compile for `request_id`.
    /// Cooperative: the process is killed and the completion report will
    /// carry a `Cancelled` verdict.
    #[instrument(name = "ResourceServerWorker::cancel", skip(self))]
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let binding = self.binding.lock().unwrap();
        match binding.as_ref() {
            Some(in_flight) if in_flight.request_id == request_id => {
                in_flight.cancel.cancel();
                true
            }
            _ => false,
        }
    }
}
