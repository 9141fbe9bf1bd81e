use crate::model::{
    CompilationRequest, CompilationStatus, Origin, RequestId, ResourceId,
};
use crate::sync::{Arc, Mutex};
use dashmap::DashMap;
use std::path::PathBuf;
use tracing::instrument;

/// Whether `create` minted a new request or found an equivalent one already
/// pending or compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(RequestId),
    Existing(RequestId),
}

impl SubmitOutcome {
    pub fn id(&self) -> RequestId {
        match self {
            SubmitOutcome::Created(id) | SubmitOutcome::Existing(id) => *id,
        }
    }
}

/// Owns every request record in the system. The at-most-one-active-compile
/// per resource invariant lives here: `active_by_resource` maps a resource
/// to its single Pending-or-Compiling request, and `create` consults it
/// before minting anything.
///
/// Mutation goes through crate-private methods; clients only ever see
/// snapshots.
///
#[derive(Default, Debug)]
pub struct RequestRegistry {
    requests: DashMap<RequestId, CompilationRequest>,
    active_by_resource: DashMap<ResourceId, RequestId>,

    // NOTE: only used to serialize the calls to `create` and prevent two
    // active requests for the same resource.
    _register_lock: Arc<Mutex<()>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(name = "RequestRegistry::create", skip(self, source_path, destination_path, compiler_args))]
    pub(crate) fn create(
        &self,
        resource_id: &ResourceId,
        origin: Origin,
        client_id: u32,
        source_path: PathBuf,
        destination_path: PathBuf,
        compiler_args: Vec<String>,
    ) -> SubmitOutcome {
        let _lock = self._register_lock.lock().unwrap();

        if let Some(active) = self.active_by_resource.get(resource_id) {
            return SubmitOutcome::Existing(*active.value());
        }

        let id = RequestId::next();
        let request = CompilationRequest::new(
            id,
            resource_id.clone(),
            origin,
            client_id,
            source_path,
            destination_path,
            compiler_args,
        );
        self.requests.insert(id, request);
        self.active_by_resource.insert(resource_id.clone(), id);
        SubmitOutcome::Created(id)
    }

    /// A point-in-time copy of the request. The log inside the snapshot
    /// stays live (it shares the underlying buffer).
    pub fn get(&self, id: RequestId) -> Option<CompilationRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    pub fn active_request_for(&self, resource: &ResourceId) -> Option<RequestId> {
        self.active_by_resource.get(resource).map(|r| *r.value())
    }

    pub fn snapshots(&self) -> Vec<CompilationRequest> {
        self.requests.iter().map(|r| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn with_mut<T>(
        &self,
        id: RequestId,
        f: impl FnOnce(&mut CompilationRequest) -> T,
    ) -> Option<T> {
        self.requests.get_mut(&id).map(|mut r| f(&mut r))
    }

    /// Move a request into a terminal state and release its slot in the
    /// active index. Two active requests for one resource, or a terminal
    /// transition for a request that was never active, are programming
    /// defects and abort loudly.
    #[instrument(name = "RequestRegistry::mark_terminal", skip(self))]
    pub(crate) fn mark_terminal(&self, id: RequestId, status: CompilationStatus) {
        assert!(status.is_complete());
        let resource = self
            .with_mut(id, |request| {
                request.transition(status);
                request.resource_id().clone()
            })
            .unwrap_or_else(|| panic!("terminal transition for unknown request {id}"));

        let released = self.active_by_resource.remove(&resource);
        assert!(
            matches!(released, Some((_, active)) if active == id),
            "request {id} completed but {resource} was active under a different request"
        );
    }

    /// Drop a retired request entirely.
    pub(crate) fn retire(&self, id: RequestId) -> Option<CompilationRequest> {
        self.requests.remove(&id).map(|(_, request)| {
            assert!(
                request.is_complete(),
                "retired request {id} was still in flight"
            );
            request
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(reg: &RequestRegistry, resource: &ResourceId, origin: Origin) -> SubmitOutcome {
        reg.create(
            resource,
            origin,
            0,
            PathBuf::from("/assets").join(resource.as_str()),
            PathBuf::from("/compiled").join(resource.as_str()),
            vec![],
        )
    }

    #[quickcheck]
    fn creating_preserves_request_properties(resource: ResourceId, origin: Origin) {
        let reg = RequestRegistry::new();
        let id = create(&reg, &resource, origin).id();
        let request = reg.get(id).unwrap();
        assert_eq!(request.resource_id(), &resource);
        assert_eq!(request.origin(), origin);
        assert!(request.is_pending());
    }

    #[quickcheck]
    fn a_resource_has_at_most_one_active_request(resource: ResourceId) {
        let reg = RequestRegistry::new();
        let first = create(&reg, &resource, Origin::External);
        let second = create(&reg, &resource, Origin::FileWatcher);

        assert_matches!(first, SubmitOutcome::Created(_));
        assert_matches!(second, SubmitOutcome::Existing(id) if id == first.id());
        assert_eq!(reg.len(), 1);
    }

    #[quickcheck]
    fn terminal_requests_free_the_resource_for_resubmission(resource: ResourceId) {
        let reg = RequestRegistry::new();
        let first = create(&reg, &resource, Origin::External).id();
        reg.mark_terminal(first, CompilationStatus::Succeeded);

        let second = create(&reg, &resource, Origin::External);
        assert_matches!(second, SubmitOutcome::Created(id) if id != first);
        assert_eq!(reg.len(), 2);
    }

    #[quickcheck]
    fn retiring_forgets_the_request(resource: ResourceId) {
        let reg = RequestRegistry::new();
        let id = create(&reg, &resource, Origin::Package).id();
        reg.mark_terminal(id, CompilationStatus::Failed);

        assert!(reg.retire(id).is_some());
        assert!(reg.get(id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    #[should_panic]
    fn retiring_an_in_flight_request_is_a_defect() {
        let reg = RequestRegistry::new();
        let id = create(&reg, &ResourceId::new("meshes/hero.msh"), Origin::External).id();
        reg.retire(id);
    }

    #[cfg(shuttle)]
    #[test]
    fn conc_concurrent_submits_agree_on_one_request() {
        use crate::sync::*;

        shuttle::check_dfs(
            move || {
                let reg = Arc::new(RequestRegistry::new());
                let resource = ResourceId::new("meshes/hero.msh");

                let mut handles = vec![];
                for _ in 0..3 {
                    let reg = reg.clone();
                    let resource = resource.clone();
                    handles.push(thread::spawn(move || {
                        reg.create(
                            &resource,
                            Origin::External,
                            1,
                            PathBuf::from("/assets/meshes/hero.msh"),
                            PathBuf::from("/compiled/meshes/hero.msh"),
                            vec![],
                        )
                        .id()
                    }));
                }

                let ids: Vec<RequestId> =
                    handles.into_iter().map(|h| h.join().unwrap()).collect();
                assert!(ids.windows(2).all(|w| w[0] == w[1]));
                assert_eq!(reg.len(), 1);
            },
            None,
        );
    }
}
