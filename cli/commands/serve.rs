use super::*;
use kiln_core::{ChangeKind, FileChange, NullRuntimeHooks, ResourceServer};
use notify::{RecursiveMode, Watcher};
use tracing::warn;

#[derive(StructOpt, Debug, Clone, Default)]
#[structopt(
    name = "serve",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "Run the resource server and watch the source root for edits"
)]
pub struct ServeCommand {
    #[structopt(flatten)]
    flags: Flags,
}

impl ServeCommand {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config: kiln_core::Config = self.flags.into();
        let event_channel = config.event_channel();
        let source_root = config.source_root().clone();
        let deps = load_dependency_map(&config)?;

        let server = Arc::new(
            ResourceServer::new(config, deps, Arc::new(NullRuntimeHooks)).await?,
        );
        let reporter = tokio::spawn(StatusReporter::new(event_channel).run());
        let server_loop = spawn_server_loop(server.clone());

        // Bridge on-disk edits into the server. The watcher thread owns the
        // receiver; the watcher itself must outlive the loop.
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let _ = tx.send(res);
            })?;
        watcher.watch(&source_root, RecursiveMode::Recursive)?;

        let watch_server = server.clone();
        std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                let event: notify::Event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("file watcher error: {err}");
                        continue;
                    }
                };
                let kind = match event.kind {
                    notify::EventKind::Create(_) => ChangeKind::Created,
                    notify::EventKind::Modify(_) => ChangeKind::Modified,
                    notify::EventKind::Remove(_) => ChangeKind::Removed,
                    _ => continue,
                };
                for path in event.paths {
                    watch_server.notify_file_changed(FileChange::new(path, kind));
                }
            }
        });

        tokio::signal::ctrl_c().await?;
        server.shutdown();
        server_loop.await?;
        reporter.await?;
        Ok(())
    }
}
