use kiln_core::Config;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Default, Debug, Clone, StructOpt)]
pub struct Flags {
    #[structopt(
        help = r"The root directory holding source assets.",
        long = "source-root"
    )]
    pub(crate) source_root: Option<PathBuf>,

    #[structopt(
        help = r"Where compiled resources are written. Defaults to .kiln/compiled under the source root.",
        long = "output-root"
    )]
    pub(crate) output_root: Option<PathBuf>,

    #[structopt(help = r"The resource compiler executable.", long = "compiler")]
    pub(crate) compiler_bin: Option<PathBuf>,

    #[structopt(
        help = r"The amount of workers to use to compile resources in parallel.",
        short = "w",
        long = "max-workers"
    )]
    pub(crate) max_workers: Option<usize>,

    #[structopt(
        help = r"Per-compile wall-clock budget in seconds before the compiler is terminated.",
        long = "compile-timeout"
    )]
    pub(crate) compile_timeout: Option<u64>,
}

impl From<Flags> for Config {
    fn from(flags: Flags) -> Self {
        let mut builder = Config::builder();
        if let Some(source_root) = flags.source_root {
            builder.source_root(source_root);
        }
        if let Some(output_root) = flags.output_root {
            builder.output_root(output_root);
        }
        if let Some(compiler_bin) = flags.compiler_bin {
            builder.compiler_bin(compiler_bin);
        }
        builder.max_workers(flags.max_workers.unwrap_or_else(num_cpus::get));
        if let Some(timeout) = flags.compile_timeout {
            builder.compile_timeout(Duration::from_secs(timeout));
        }
        builder.build().unwrap()
    }
}
