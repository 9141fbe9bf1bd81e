//! The boundary to the external resource compiler executable. Compiles run
//! out-of-process so a compiler crash, hang or memory corruption can never
//! take the server down with it.

mod invocation;

pub use invocation::*;

use crate::config::Config;
use crate::model::ResourceId;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::*;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("Could not run {bin:?} to detect the compiler version: {err:?}")]
    VersionDetectionFailed { bin: PathBuf, err: std::io::Error },

    #[error("Compiler {bin:?} reported an unparsable version: {raw:?}")]
    MalformedVersion { bin: PathBuf, raw: String },
}

/// Description of the compiler executable: where it lives and which version
/// it identifies as. The version participates in every up-to-date check.
///
#[derive(Clone, Debug)]
pub struct Compiler {
    bin: PathBuf,
    version: i32,
    timeout: Duration,
}

impl Compiler {
    /// Resolve the compiler from configuration, asking the executable for
    /// its version unless one is pinned.
    #[instrument(name = "Compiler::from_config", skip(config))]
    pub async fn from_config(config: &Config) -> Result<Self, CompilerError> {
        let bin = config.compiler_bin().clone();
        let version = match config.compiler_version() {
            Some(version) => version,
            None => Self::detect_version(&bin).await?,
        };
        Ok(Self {
            bin,
            version,
            timeout: config.compile_timeout(),
        })
    }

    async fn detect_version(bin: &Path) -> Result<i32, CompilerError> {
        let output = tokio::process::Command::new(bin)
            .arg("--version")
            .output()
            .await
            .map_err(|err| CompilerError::VersionDetectionFailed {
                bin: bin.to_path_buf(),
                err,
            })?;
        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim()
            .parse()
            .map_err(|_| CompilerError::MalformedVersion {
                bin: bin.to_path_buf(),
                raw: raw.to_string(),
            })
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// The argument vector a compile of `resource` will run with. Stored on
    /// the request at submission so clients can inspect it.
    pub fn compile_args(&self, source: &Path, destination: &Path) -> Vec<String> {
        vec![
            "compile".to_string(),
            "--source".to_string(),
            source.to_string_lossy().to_string(),
            "--output".to_string(),
            destination.to_string_lossy().to_string(),
        ]
    }

    pub fn invocation(&self, resource: &ResourceId, args: &[String]) -> CompilerInvocation {
        CompilerInvocation::new(
            resource.clone(),
            self.bin.clone(),
            args.to_vec(),
            self.timeout,
        )
    }
}
