use super::*;
use anyhow::anyhow;
use kiln_core::{NullRuntimeHooks, Origin, ResourceId, ResourceServer};

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "compile",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "Compile one or more resources by their logical path"
)]
pub struct CompileCommand {
    #[structopt(
        help = r"The resources to compile.

Source-root-relative paths, e.g. meshes/hero.msh.
",
        required = true
    )]
    resources: Vec<String>,

    #[structopt(flatten)]
    flags: Flags,
}

impl CompileCommand {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config: kiln_core::Config = self.flags.into();
        let event_channel = config.event_channel();
        let deps = load_dependency_map(&config)?;

        let server = Arc::new(
            ResourceServer::new(config, deps, Arc::new(NullRuntimeHooks)).await?,
        );
        let reporter = tokio::spawn(StatusReporter::new(event_channel).run());
        let server_loop = spawn_server_loop(server.clone());

        let handles: Vec<_> = self
            .resources
            .iter()
            .map(|resource| {
                server.submit(ResourceId::new(resource), Origin::ManualCompile, 0)
            })
            .collect();

        wait_for(&handles).await;
        server.shutdown();
        server_loop.await?;
        reporter.await?;

        let mut failed = 0;
        for handle in &handles {
            let request = match handle.snapshot() {
                Some(request) => request,
                None => continue,
            };
            if request.has_failed() {
                failed += 1;
                eprintln!("{}", request.log());
            }
        }
        if failed > 0 {
            return Err(anyhow!("{failed} compilation(s) failed"));
        }
        Ok(())
    }
}
