use crate::model::{LogBuffer, ResourceId};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Log line prefix the compiler contract uses to flag warnings. Exit code 0
/// plus this marker in the log distinguishes `SucceededWithWarnings` from a
/// clean success.
pub const WARNING_MARKER: &str = "warning:";

/// How one compiler run ended. The worker maps this onto the request's
/// terminal status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompilerVerdict {
    /// Exit code 0.
    Success { warnings: bool },
    /// Clean non-zero exit; the log carries the compiler's diagnostics.
    Failure { exit_code: i32 },
    /// Killed by a signal or otherwise abnormally terminated.
    Crashed,
    /// Exceeded the wall-clock budget and was forcibly terminated.
    TimedOut,
    /// Terminated on request.
    Cancelled,
    /// The process never started.
    SpawnFailed,
}

impl CompilerVerdict {
    /// Abnormal terminations are candidates for the scheduler's bounded
    /// retry; clean failures and timeouts are not.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, CompilerVerdict::Crashed | CompilerVerdict::SpawnFailed)
    }
}

/// One concrete compiler run: binary, argument vector, wall-clock budget.
/// Runs the compiler as a child process, streams its combined stdout/stderr
/// into the request log line by line, and enforces timeout and
/// cancellation.
///
#[derive(Clone, Debug)]
pub struct CompilerInvocation {
    resource: ResourceId,
    bin: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CompilerInvocation {
    pub fn new(resource: ResourceId, bin: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            resource,
            bin,
            args,
            timeout,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    #[instrument(name = "CompilerInvocation::run", skip(self, log, cancel), fields(resource = %self.resource))]
    pub async fn run(&self, log: &LogBuffer, cancel: CancellationToken) -> CompilerVerdict {
        if cancel.is_cancelled() {
            log.append_line("compilation cancelled");
            return CompilerVerdict::Cancelled;
        }

        let mut cmd = Command::new(&self.bin);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                log.append_line(&format!("failed to spawn compiler {:?}: {err}", self.bin));
                return CompilerVerdict::SpawnFailed;
            }
        };

        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let out_capture = tokio::spawn(Self::capture(stdout, log.clone()));
        let err_capture = tokio::spawn(Self::capture(stderr, log.clone()));

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = tokio::join!(out_capture, err_capture);
                log.append_line("compilation cancelled");
                return CompilerVerdict::Cancelled;
            }
            waited = tokio::time::timeout(self.timeout, child.wait()) => match waited {
                Err(_elapsed) => {
                    let _ = child.kill().await;
                    let _ = tokio::join!(out_capture, err_capture);
                    log.append_line(&format!(
                        "compilation timed out after {}s and was terminated",
                        self.timeout.as_secs()
                    ));
                    return CompilerVerdict::TimedOut;
                }
                Ok(Err(err)) => {
                    let _ = tokio::join!(out_capture, err_capture);
                    log.append_line(&format!("compiler could not be waited on: {err}"));
                    return CompilerVerdict::Crashed;
                }
                Ok(Ok(status)) => status,
            },
        };

        // Drain whatever the pipes still hold before inspecting the log.
        let _ = tokio::join!(out_capture, err_capture);

        match status.code() {
            Some(0) => CompilerVerdict::Success {
                warnings: log.contains(WARNING_MARKER),
            },
            Some(exit_code) => CompilerVerdict::Failure { exit_code },
            None => {
                log.append_line("compiler terminated abnormally (signal)");
                CompilerVerdict::Crashed
            }
        }
    }

    async fn capture<R: AsyncRead + Unpin>(pipe: R, log: LogBuffer) {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.append_line(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let bin = dir.join("kilnc");
        let mut f = std::fs::File::create(&bin).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();
        bin
    }

    fn invocation(bin: PathBuf, timeout: Duration) -> CompilerInvocation {
        CompilerInvocation::new(ResourceId::new("meshes/hero.msh"), bin, vec![], timeout)
    }

    #[tokio::test]
    async fn clean_exits_succeed() {
        let dir = assert_fs::TempDir::new().unwrap();
        let bin = script(dir.path(), "echo compiled fine");
        let log = LogBuffer::new();

        let verdict = invocation(bin, Duration::from_secs(5))
            .run(&log, CancellationToken::new())
            .await;

        assert_eq!(verdict, CompilerVerdict::Success { warnings: false });
        assert!(log.contains("compiled fine"));
    }

    #[tokio::test]
    async fn warning_markers_are_detected() {
        let dir = assert_fs::TempDir::new().unwrap();
        let bin = script(dir.path(), "echo 'warning: degenerate triangles'");
        let log = LogBuffer::new();

        let verdict = invocation(bin, Duration::from_secs(5))
            .run(&log, CancellationToken::new())
            .await;

        assert_eq!(verdict, CompilerVerdict::Success { warnings: true });
    }

    #[tokio::test]
    async fn nonzero_exits_fail_with_stderr_in_the_log() {
        let dir = assert_fs::TempDir::new().unwrap();
        let bin = script(dir.path(), "echo 'error: bad vertex stream' >&2; exit 3");
        let log = LogBuffer::new();

        let verdict = invocation(bin, Duration::from_secs(5))
            .run(&log, CancellationToken::new())
            .await;

        assert_eq!(verdict, CompilerVerdict::Failure { exit_code: 3 });
        assert!(log.contains("error: bad vertex stream"));
    }

    #[tokio::test]
    async fn hung_compilers_are_terminated() {
        let dir = assert_fs::TempDir::new().unwrap();
        let bin = script(dir.path(), "sleep 30");
        let log = LogBuffer::new();

        let verdict = invocation(bin, Duration::from_millis(200))
            .run(&log, CancellationToken::new())
            .await;

        assert_eq!(verdict, CompilerVerdict::TimedOut);
        assert!(log.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let dir = assert_fs::TempDir::new().unwrap();
        let bin = script(dir.path(), "sleep 30");
        let log = LogBuffer::new();
        let cancel = CancellationToken::new();

        let invoc = invocation(bin, Duration::from_secs(30));
        let run = invoc.run(&log, cancel.clone());
        let verdict = tokio::join!(run, async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
        .0;

        assert_eq!(verdict, CompilerVerdict::Cancelled);
        assert!(log.contains("cancelled"));
    }

    #[tokio::test]
    async fn missing_binaries_never_start() {
        let log = LogBuffer::new();
        let verdict = invocation(PathBuf::from("/does/not/exist"), Duration::from_secs(5))
            .run(&log, CancellationToken::new())
            .await;

        assert_eq!(verdict, CompilerVerdict::SpawnFailed);
        assert!(log.contains("failed to spawn"));
    }
}
