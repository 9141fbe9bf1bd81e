use crate::events::event::ReloadEvent;
use crate::events::EventChannel;
use crate::model::ResourceId;
use crate::sync::Arc;
use dashmap::DashSet;
use tracing::instrument;

/// The contract the engine/editor runtime implements so compiled files are
/// never rewritten under a loaded resource.
///
/// `unload` returns once the resource is no longer in use; the server only
/// schedules the compile after that, and calls `load` only after the new
/// output and its metadata are fully on disk.
///
pub trait RuntimeHooks: Send + Sync {
    fn is_loaded(&self, resource: &ResourceId) -> bool;
    fn unload(&self, resource: &ResourceId);
    fn load(&self, resource: &ResourceId);
}

/// Hooks for a server with no attached runtime (batch packaging, tests):
/// nothing is ever loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRuntimeHooks;

impl RuntimeHooks for NullRuntimeHooks {
    fn is_loaded(&self, _resource: &ResourceId) -> bool {
        false
    }

    fn unload(&self, _resource: &ResourceId) {}

    fn load(&self, _resource: &ResourceId) {}
}

/// Tracks which invalidated resources the runtime is waiting to get back.
/// Owned by the scheduler; `begin_invalidation` runs before any compile of
/// the affected set is queued, `finish` runs after the terminal status and
/// the output sidecar are in place.
///
pub struct ReloadCoordinator {
    hooks: Arc<dyn RuntimeHooks>,
    awaiting_reload: DashSet<ResourceId>,
    event_channel: Arc<EventChannel>,
}

impl ReloadCoordinator {
    pub fn new(hooks: Arc<dyn RuntimeHooks>, event_channel: Arc<EventChannel>) -> Self {
        Self {
            hooks,
            awaiting_reload: DashSet::new(),
            event_channel,
        }
    }

    /// Unload every currently loaded resource in the invalidation set.
    #[instrument(name = "ReloadCoordinator::begin_invalidation", skip(self))]
    pub fn begin_invalidation(&self, resources: &[ResourceId]) {
        for resource in resources {
            if !self.hooks.is_loaded(resource) {
                continue;
            }
            self.event_channel.send(ReloadEvent::UnloadRequested {
                resource: resource.clone(),
            });
            self.hooks.unload(resource);
            self.awaiting_reload.insert(resource.clone());
        }
    }

    /// Signal that a compile of `resource` reached a terminal state. On
    /// success the runtime gets the resource back; on failure it stays
    /// unloaded rather than reloading a stale file.
    #[instrument(name = "ReloadCoordinator::finish", skip(self))]
    pub fn finish(&self, resource: &ResourceId, succeeded: bool) {
        if self.awaiting_reload.remove(resource).is_none() {
            return;
        }
        if succeeded {
            self.hooks.load(resource);
            self.event_channel.send(ReloadEvent::ReloadReady {
                resource: resource.clone(),
            });
        }
    }

    pub fn is_awaiting_reload(&self, resource: &ResourceId) -> bool {
        self.awaiting_reload.contains(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        loaded: DashSet<ResourceId>,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHooks {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl RuntimeHooks for RecordingHooks {
        fn is_loaded(&self, resource: &ResourceId) -> bool {
            self.loaded.contains(resource)
        }

        fn unload(&self, resource: &ResourceId) {
            self.record(format!("unload {resource}"));
            self.loaded.remove(resource);
        }

        fn load(&self, resource: &ResourceId) {
            self.record(format!("load {resource}"));
            self.loaded.insert(resource.clone());
        }
    }

    #[test]
    fn loaded_resources_are_unloaded_then_reloaded_on_success() {
        let hooks = Arc::new(RecordingHooks::default());
        let resource = ResourceId::new("meshes/hero.msh");
        hooks.loaded.insert(resource.clone());

        let coordinator = ReloadCoordinator::new(hooks.clone(), EventChannel::new().into());
        coordinator.begin_invalidation(std::slice::from_ref(&resource));
        assert!(coordinator.is_awaiting_reload(&resource));
        assert!(!hooks.is_loaded(&resource));

        coordinator.finish(&resource, true);
        assert!(!coordinator.is_awaiting_reload(&resource));
        assert!(hooks.is_loaded(&resource));
        assert_eq!(
            *hooks.calls.lock().unwrap(),
            vec!["unload meshes/hero.msh", "load meshes/hero.msh"]
        );
    }

    #[test]
    fn failed_compiles_leave_the_resource_unloaded() {
        let hooks = Arc::new(RecordingHooks::default());
        let resource = ResourceId::new("meshes/hero.msh");
        hooks.loaded.insert(resource.clone());

        let coordinator = ReloadCoordinator::new(hooks.clone(), EventChannel::new().into());
        coordinator.begin_invalidation(std::slice::from_ref(&resource));
        coordinator.finish(&resource, false);

        assert!(!hooks.is_loaded(&resource));
        assert!(!coordinator.is_awaiting_reload(&resource));
    }

    #[test]
    fn unloaded_resources_are_left_alone() {
        let hooks = Arc::new(RecordingHooks::default());
        let resource = ResourceId::new("meshes/hero.msh");

        let coordinator = ReloadCoordinator::new(hooks.clone(), EventChannel::new().into());
        coordinator.begin_invalidation(std::slice::from_ref(&resource));

        assert!(!coordinator.is_awaiting_reload(&resource));
        assert!(hooks.calls.lock().unwrap().is_empty());
    }
}
