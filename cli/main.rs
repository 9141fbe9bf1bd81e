mod commands;
pub mod flags;
mod reporter;

use commands::*;
use structopt::StructOpt;
use tracing::{error, log};

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "kiln",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "A resource compilation server for game asset pipelines"
)]
struct Kiln {
    #[structopt(subcommand, help = "the command to run")]
    cmd: Option<Command>,
}

impl Kiln {
    async fn run(mut self) -> Result<(), anyhow::Error> {
        human_panic::setup_panic!(Metadata {
            name: "kiln".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            authors: "Kiln Contributors".into(),
            homepage: "".into(),
        });

        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .format_timestamp_micros()
            .format_module_path(false)
            .parse_env("KILN_LOG")
            .try_init()
            .unwrap();

        let result = self
            .cmd
            .take()
            .unwrap_or_else(|| Command::Serve(ServeCommand::default()))
            .run()
            .await;

        if let Err(ref err) = result {
            error!("{:?}", &err);
        };

        result
    }
}

#[derive(StructOpt, Debug, Clone)]
enum Command {
    Serve(ServeCommand),
    Compile(CompileCommand),
    Pack(PackCommand),
}

impl Command {
    async fn run(self) -> Result<(), anyhow::Error> {
        match self {
            Command::Compile(x) => x.run().await,
            Command::Pack(x) => x.run().await,
            Command::Serve(x) => x.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    Kiln::from_args().run().await.map(|_| ())
}
