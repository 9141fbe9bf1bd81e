use crate::events::EventChannel;
use crate::sync::Arc;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::*;

/// A collection of flags and options that affect how the resource server
/// runs. This is not specific to one request, it relates to the server
/// itself.
///
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(error = "ConfigError"))]
pub struct Config {
    /// The root directory holding source assets.
    #[builder(default = "self.default_source_root()")]
    source_root: PathBuf,

    /// The root directory compiled resources are written into.
    #[builder(default = "self.default_output_root()")]
    output_root: PathBuf,

    /// The resource compiler executable.
    #[builder(default = "self.default_compiler_bin()")]
    compiler_bin: PathBuf,

    /// Pinned compiler version. When unset, the server asks the compiler
    /// for its version on startup.
    #[builder(setter(into, strip_option), default = "None")]
    compiler_version: Option<i32>,

    /// The maximum number of concurrent compiler processes.
    #[builder(default = "self.default_max_workers()")]
    max_workers: usize,

    /// Wall-clock budget for a single compile before it is forcibly
    /// terminated.
    #[builder(default = "self.default_compile_timeout()")]
    compile_timeout: Duration,

    /// How many times an abnormally terminated compile is reattempted
    /// before the request fails.
    #[builder(default = "1")]
    compile_retry_limit: u32,

    /// How long terminal requests stay queryable before retirement.
    #[builder(default = "self.default_retention_window()")]
    retention_window: Duration,

    /// Sleep between scheduler turns when running the server loop.
    #[builder(default = "self.default_tick_interval()")]
    tick_interval: Duration,

    /// The user running the server.
    #[builder(default = "self.default_current_user()")]
    current_user: String,

    /// The time at which this configuration was created.
    #[builder(default = "self.default_created_at()")]
    created_at: Instant,

    /// The Event Channel used across the server.
    /// NOTE: safe to clone, it is really an [Arc] around a shared bus.
    #[builder(default = "self.default_event_channel()")]
    event_channel: Arc<EventChannel>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build().unwrap()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn source_root(&self) -> &PathBuf {
        &self.source_root
    }

    pub fn output_root(&self) -> &PathBuf {
        &self.output_root
    }

    pub fn compiler_bin(&self) -> &PathBuf {
        &self.compiler_bin
    }

    pub fn compiler_version(&self) -> Option<i32> {
        self.compiler_version
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn compile_timeout(&self) -> Duration {
        self.compile_timeout
    }

    pub fn compile_retry_limit(&self) -> u32 {
        self.compile_retry_limit
    }

    pub fn retention_window(&self) -> Duration {
        self.retention_window
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn current_user(&self) -> &str {
        self.current_user.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn event_channel(&self) -> Arc<EventChannel> {
        self.event_channel.clone()
    }
}

impl ConfigBuilder {
    fn _source_root(&self) -> PathBuf {
        self.source_root
            .clone()
            .unwrap_or_else(|| self.default_source_root())
    }

    fn default_source_root(&self) -> PathBuf {
        PathBuf::from(".")
    }

    fn default_output_root(&self) -> PathBuf {
        self._source_root().join(".kiln").join("compiled")
    }

    fn default_compiler_bin(&self) -> PathBuf {
        PathBuf::from("kilnc")
    }

    fn default_max_workers(&self) -> usize {
        num_cpus::get()
    }

    fn default_compile_timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    fn default_retention_window(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn default_tick_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn default_current_user(&self) -> String {
        whoami::username()
    }

    fn default_created_at(&self) -> Instant {
        Instant::now()
    }

    fn default_event_channel(&self) -> Arc<EventChannel> {
        EventChannel::new().into()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Attempted to build a Config struct while missing fields: {0:?}")]
    BuilderError(derive_builder::UninitializedFieldError),
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Self::BuilderError(err)
    }
}
