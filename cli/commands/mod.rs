mod compile;
mod pack;
mod serve;

pub use compile::*;
pub use pack::*;
pub use serve::*;

use crate::flags::Flags;
use crate::reporter::StatusReporter;
use kiln_core::{Config, DependencyMap, RequestHandle, ResourceServer};
use std::sync::Arc;
use structopt::StructOpt;

/// Optional dependency manifest sitting at the source root. Resources
/// listed here get their source and install dependencies registered before
/// the server starts.
pub(crate) const DEPS_MANIFEST: &str = "kiln.deps.json";

pub(crate) fn load_dependency_map(config: &Config) -> Result<Arc<DependencyMap>, anyhow::Error> {
    let manifest = config.source_root().join(DEPS_MANIFEST);
    let map = if manifest.is_file() {
        DependencyMap::from_manifest(&manifest)?
    } else {
        DependencyMap::new()
    };
    Ok(Arc::new(map))
}

pub(crate) async fn wait_for(handles: &[RequestHandle]) {
    while handles.iter().any(|h| !h.is_complete()) {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

pub(crate) fn spawn_server_loop(server: Arc<ResourceServer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { server.run().await })
}
