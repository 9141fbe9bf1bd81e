use crate::model::{CompilationStatus, RequestId, ResourceId};
use crate::sync::Arc;
use crossbeam::deque::{Injector, Steal};
use dashmap::{DashMap, DashSet};
use tracing::instrument;

/// Who is listening to a request: a connected client or an internal
/// subscriber (UI panels, tests).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ListenerKey {
    Client(u32),
    Internal(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    StatusChanged {
        request_id: RequestId,
        resource_id: ResourceId,
        status: CompilationStatus,
    },
    /// Incremental log text, only delivered to listeners that opted into
    /// live streaming.
    LogUpdated {
        request_id: RequestId,
        resource_id: ResourceId,
        chunk: String,
    },
}

/// The explicit request → listener mapping. Status transitions fan out to
/// every listener of the request; log appends only reach listeners that
/// asked for them. Bookkeeping is dropped when the request retires.
///
#[derive(Default, Debug)]
pub struct SubscriberTable {
    listeners: DashMap<RequestId, DashSet<ListenerKey>>,
    live_log: DashMap<RequestId, DashSet<ListenerKey>>,
    inboxes: DashMap<ListenerKey, Arc<Injector<Notification>>>,
    unacked: DashMap<RequestId, DashSet<ListenerKey>>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(name = "SubscriberTable::subscribe", skip(self))]
    pub fn subscribe(&self, request: RequestId, listener: ListenerKey, live_log: bool) {
        self.listeners
            .entry(request)
            .or_default()
            .insert(listener);
        if live_log {
            self.live_log.entry(request).or_default().insert(listener);
        }
        self.inboxes.entry(listener).or_default();
    }

    #[instrument(name = "SubscriberTable::unsubscribe", skip(self))]
    pub fn unsubscribe(&self, request: RequestId, listener: ListenerKey) {
        if let Some(listeners) = self.listeners.get(&request) {
            listeners.remove(&listener);
        }
        if let Some(listeners) = self.live_log.get(&request) {
            listeners.remove(&listener);
        }
        if let Some(unacked) = self.unacked.get(&request) {
            unacked.remove(&listener);
        }
    }

    pub fn listeners(&self, request: RequestId) -> Vec<ListenerKey> {
        self.listeners
            .get(&request)
            .map(|l| l.iter().map(|k| *k).collect())
            .unwrap_or_default()
    }

    pub fn has_live_log_listeners(&self, request: RequestId) -> bool {
        self.live_log
            .get(&request)
            .map(|l| !l.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn notify_status(
        &self,
        request_id: RequestId,
        resource_id: ResourceId,
        status: CompilationStatus,
    ) {
        for listener in self.listeners(request_id) {
            if status.is_complete() {
                self.unacked.entry(request_id).or_default().insert(listener);
            }
            self.push(
                listener,
                Notification::StatusChanged {
                    request_id,
                    resource_id: resource_id.clone(),
                    status,
                },
            );
        }
    }

    pub(crate) fn notify_log(
        &self,
        request_id: RequestId,
        resource_id: ResourceId,
        chunk: String,
    ) {
        let listeners = match self.live_log.get(&request_id) {
            Some(listeners) => listeners.iter().map(|k| *k).collect::<Vec<_>>(),
            None => return,
        };
        for listener in listeners {
            self.push(
                listener,
                Notification::LogUpdated {
                    request_id,
                    resource_id: resource_id.clone(),
                    chunk: chunk.clone(),
                },
            );
        }
    }

    /// Drain everything queued for `listener`, in delivery order.
    pub fn poll(&self, listener: ListenerKey) -> Vec<Notification> {
        let inbox = match self.inboxes.get(&listener) {
            Some(inbox) => inbox.clone(),
            None => return vec![],
        };
        let mut notifications = vec![];
        loop {
            match inbox.steal() {
                Steal::Success(notification) => notifications.push(notification),
                Steal::Empty => return notifications,
                Steal::Retry => continue,
            }
        }
    }

    /// A listener confirms it has seen the terminal status of `request`.
    pub fn acknowledge(&self, listener: ListenerKey, request: RequestId) {
        if let Some(unacked) = self.unacked.get(&request) {
            unacked.remove(&listener);
        }
    }

    pub fn has_unacked_listeners(&self, request: RequestId) -> bool {
        self.unacked
            .get(&request)
            .map(|l| !l.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn remove_request(&self, request: RequestId) {
        self.listeners.remove(&request);
        self.live_log.remove(&request);
        self.unacked.remove(&request);
    }

    fn push(&self, listener: ListenerKey, notification: Notification) {
        self.inboxes
            .entry(listener)
            .or_default()
            .push(notification);
    }
}
