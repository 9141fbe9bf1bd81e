//! The dependency record: which source files a resource's compiler reads,
//! and which other resources it needs installed at runtime.
//!
//! The server consults this map to fingerprint a resource's transitive
//! inputs and to resolve which resources a changed file invalidates.

use crate::model::ResourceId;
use crate::sync::{Arc, Mutex};
use daggy::{Dag, NodeIndex};
use dashmap::{DashMap, DashSet};
use fxhash::FxHashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::*;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DependencyMapError {
    #[error("Dependency cycle found starting at {resource}")]
    DependencyCycle { resource: ResourceId },

    #[error("Could not read dependency manifest {path:?} due to {err:?}")]
    ManifestReadError { path: PathBuf, err: std::io::Error },

    #[error(transparent)]
    ManifestParseError(serde_json::Error),
}

#[derive(Deserialize, Debug, Default)]
struct ManifestEntry {
    #[serde(default)]
    sources: Vec<PathBuf>,
    #[serde(default)]
    installs: Vec<ResourceId>,
}

#[derive(Deserialize, Debug, Default)]
struct Manifest {
    #[serde(default)]
    resources: HashMap<String, ManifestEntry>,
}

/// Per-resource dependency sets, shared between the scheduler, the checker
/// and the watcher resolution path. All paths are relative to the source
/// root.
///
#[derive(Default, Debug)]
pub struct DependencyMap {
    known: DashSet<ResourceId>,
    source_deps: DashMap<ResourceId, Vec<PathBuf>>,
    install_deps: DashMap<ResourceId, Vec<ResourceId>>,

    // Serializes edits so cycle validation always sees a consistent graph.
    _edit_lock: Arc<Mutex<()>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest(path: &Path) -> Result<Self, DependencyMapError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            DependencyMapError::ManifestReadError {
                path: path.to_path_buf(),
                err,
            }
        })?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(DependencyMapError::ManifestParseError)?;

        let map = Self::new();
        for (resource, entry) in manifest.resources {
            let resource = ResourceId::new(resource);
            map.set_source_dependencies(&resource, entry.sources)?;
            map.set_install_dependencies(&resource, entry.installs);
        }
        Ok(map)
    }

    /// Declare that a resource exists, with or without dependencies. The
    /// watcher resolution path only considers known resources.
    pub fn register(&self, resource: &ResourceId) {
        self.known.insert(resource.clone());
    }

    pub fn is_known(&self, resource: &ResourceId) -> bool {
        self.known.contains(resource)
    }

    pub fn known_resources(&self) -> Vec<ResourceId> {
        self.known.iter().map(|r| r.clone()).collect()
    }

    /// Replace the direct source dependencies of `resource`. Fails when the
    /// resulting resource graph would contain a cycle, so dependency
    /// resolution can never loop.
    #[instrument(name = "DependencyMap::set_source_dependencies", skip(self))]
    pub fn set_source_dependencies(
        &self,
        resource: &ResourceId,
        deps: Vec<PathBuf>,
    ) -> Result<(), DependencyMapError> {
        let _lock = self._edit_lock.lock().unwrap();

        let previous = self.source_deps.insert(resource.clone(), deps);
        self.known.insert(resource.clone());

        if let Err(err) = self.validate_acyclic(resource) {
            match previous {
                Some(previous) => {
                    self.source_deps.insert(resource.clone(), previous);
                }
                None => {
                    self.source_deps.remove(resource);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn set_install_dependencies(&self, resource: &ResourceId, deps: Vec<ResourceId>) {
        self.known.insert(resource.clone());
        for dep in &deps {
            self.known.insert(dep.clone());
        }
        self.install_deps.insert(resource.clone(), deps);
    }

    pub fn install_dependencies(&self, resource: &ResourceId) -> Vec<ResourceId> {
        self.install_deps
            .get(resource)
            .map(|deps| deps.clone())
            .unwrap_or_default()
    }

    /// The source file of `resource` plus every transitive source
    /// dependency, in deterministic order. A dependency path that is itself
    /// a known resource contributes its own dependencies too.
    pub fn transitive_sources(
        &self,
        resource: &ResourceId,
    ) -> Result<Vec<PathBuf>, DependencyMapError> {
        let mut sources = vec![];
        let mut visited = fxhash::FxHashSet::default();
        let mut path = vec![];
        self.collect_sources(resource, resource, &mut visited, &mut path, &mut sources)?;
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    fn collect_sources(
        &self,
        root: &ResourceId,
        current: &ResourceId,
        visited: &mut fxhash::FxHashSet<ResourceId>,
        path: &mut Vec<ResourceId>,
        sources: &mut Vec<PathBuf>,
    ) -> Result<(), DependencyMapError> {
        if path.contains(current) {
            return Err(DependencyMapError::DependencyCycle {
                resource: root.clone(),
            });
        }
        if !visited.insert(current.clone()) {
            return Ok(());
        }
        sources.push(current.as_path().to_path_buf());

        let deps = match self.source_deps.get(current) {
            Some(deps) => deps.clone(),
            None => return Ok(()),
        };
        path.push(current.clone());
        for dep in deps {
            let as_resource = ResourceId::from(dep.as_path());
            if self.source_deps.contains_key(&as_resource) {
                self.collect_sources(root, &as_resource, visited, path, sources)?;
            } else {
                sources.push(dep);
            }
        }
        path.pop();
        Ok(())
    }

    /// Every known resource whose source file, or transitive source
    /// dependency set, contains `path`. This is the watcher invalidation
    /// query.
    #[instrument(name = "DependencyMap::resources_affected_by", skip(self))]
    pub fn resources_affected_by(&self, path: &Path) -> Vec<ResourceId> {
        let mut affected = vec![];
        for resource in self.known.iter() {
            if resource.as_path() == path {
                affected.push(resource.clone());
                continue;
            }
            if let Ok(sources) = self.transitive_sources(&resource) {
                if sources.iter().any(|source| source == path) {
                    affected.push(resource.clone());
                }
            }
        }
        affected.sort();
        affected.dedup();
        affected
    }

    /// Every known resource that transitively install-depends on
    /// `resource`. These must be reloaded alongside it.
    pub fn install_dependents_of(&self, resource: &ResourceId) -> Vec<ResourceId> {
        let mut dependents = vec![];
        let mut frontier = vec![resource.clone()];
        while let Some(current) = frontier.pop() {
            for entry in self.install_deps.iter() {
                if entry.value().contains(&current) && !dependents.contains(entry.key()) {
                    dependents.push(entry.key().clone());
                    frontier.push(entry.key().clone());
                }
            }
        }
        dependents.sort();
        dependents
    }

    fn validate_acyclic(&self, changed: &ResourceId) -> Result<(), DependencyMapError> {
        let mut dag: Dag<ResourceId, (), u32> = Dag::new();
        let mut nodes: FxHashMap<ResourceId, NodeIndex> = FxHashMap::default();

        for entry in self.source_deps.iter() {
            let resource = entry.key().clone();
            let node_idx = dag.add_node(resource.clone());
            nodes.insert(resource, node_idx);
        }

        let mut edges = vec![];
        for entry in self.source_deps.iter() {
            let Some(node_idx) = nodes.get(entry.key()) else {
                continue;
            };
            for dep in entry.value() {
                let as_resource = ResourceId::from(dep.as_path());
                if let Some(dep_idx) = nodes.get(&as_resource) {
                    edges.push((*dep_idx, *node_idx, ()));
                }
            }
        }

        dag.add_edges(edges)
            .map_err(|_| DependencyMapError::DependencyCycle {
                resource: changed.clone(),
            })?;

        Ok(())
    }
}
