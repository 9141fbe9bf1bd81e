use super::*;
use anyhow::anyhow;
use kiln_core::{NullRuntimeHooks, ResourceServer};

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "pack",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "Compile every asset under the source root for packaging"
)]
pub struct PackCommand {
    #[structopt(flatten)]
    flags: Flags,
}

impl PackCommand {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config: kiln_core::Config = self.flags.into();
        let event_channel = config.event_channel();
        let deps = load_dependency_map(&config)?;

        let server = Arc::new(
            ResourceServer::new(config, deps, Arc::new(NullRuntimeHooks)).await?,
        );
        let reporter = tokio::spawn(StatusReporter::new(event_channel).run());
        let server_loop = spawn_server_loop(server.clone());

        let handles = server.compile_all();
        wait_for(&handles).await;
        server.shutdown();
        server_loop.await?;
        reporter.await?;

        let mut succeeded = 0;
        let mut warnings = 0;
        let mut failed = 0;
        for handle in &handles {
            match handle.snapshot() {
                Some(request) if request.has_succeeded_with_warnings() => {
                    warnings += 1;
                    succeeded += 1;
                }
                Some(request) if request.has_succeeded() => succeeded += 1,
                Some(_) => failed += 1,
                None => (),
            }
        }

        println!();
        println!(
            "Packaged {} resource(s): {succeeded} compiled ({warnings} with warnings), {failed} failed",
            handles.len()
        );

        if failed > 0 {
            return Err(anyhow!("{failed} resource(s) failed to compile"));
        }
        Ok(())
    }
}
