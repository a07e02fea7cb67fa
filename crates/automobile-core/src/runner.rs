//! Command Runner (§4.1 Module A).
//!
//! Spawns child processes, enforces timeouts with a graceful SIGTERM/SIGKILL
//! teardown, and retries read-style idempotent commands up to 3 times. The
//! spawn-busy micro-retry (`ETXTBSY`) is a separate, lower-level concern from
//! the read-command retry described in spec.md §4.1; both are implemented
//! here but triggered by different conditions.

use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time,
};
use tracing::info;

use crate::error::CoreError;

/// Idempotent read-style commands that the runner may retry unconditionally
/// on non-zero exit, up to 3 attempts total (§4.1 step 5).
const IDEMPOTENT_COMMANDS: &[&str] = &[
    "devices",
    "dumpsys",
    "getprop",
    "screencap",
    "uiautomator",
    "list-targets",
    "describe-ui",
    "status",
];

/// Command name prefixes logged at INFO regardless of duration (§4.1).
const SLOW_PREFIXES: &[&str] = &["screencap", "uiautomator", "getevent", "describe-ui"];

const SLOW_THRESHOLD: Duration = Duration::from_millis(10);

/// Captured stdout/stderr plus exit status from a completed invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// One subprocess invocation: a resolved tool path, its arguments, and an
/// optional timeout. `label` is the first argument (e.g. `"devices"`,
/// `"dumpsys"`) used to decide idempotent-retry and slow-command-logging
/// eligibility.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn label(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    fn is_idempotent(&self) -> bool {
        let label = self.label();
        IDEMPOTENT_COMMANDS
            .iter()
            .any(|candidate| label == *candidate || label.ends_with(candidate))
    }

    fn is_known_slow(&self) -> bool {
        let label = self.label();
        SLOW_PREFIXES.iter().any(|prefix| label.starts_with(prefix))
    }
}

/// Abstracts subprocess execution so higher modules (device registry, probe,
/// view-hierarchy dump, installers) can be tested against a fake.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, spec: CommandSpec) -> Result<CommandOutput, CoreError>;
}

/// Production runner built directly on `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }

    async fn execute_once(&self, spec: &CommandSpec) -> Result<CommandOutput, CoreError> {
        let display = spec.display();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = spawn_with_retry(&mut command, &display)?;

        let run = run_to_completion(&mut child, &display);
        let output = match spec.timeout {
            None => run.await?,
            Some(timeout) => match time::timeout(timeout, run).await {
                Ok(result) => result?,
                Err(_) => {
                    terminate_gracefully(&mut child).await;
                    return Err(CoreError::Timeout {
                        command: display,
                        timeout,
                    });
                }
            },
        };
        Ok(output)
    }
}

#[async_trait::async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn execute(&self, spec: CommandSpec) -> Result<CommandOutput, CoreError> {
        let started = std::time::Instant::now();
        let max_attempts = if spec.is_idempotent() { 3 } else { 1 };

        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match self.execute_once(&spec).await {
                Ok(output) => {
                    log_if_notable(&spec, started.elapsed());
                    return Ok(output);
                }
                Err(err @ CoreError::NonZeroExit { .. }) if attempt < max_attempts => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.expect("loop always assigns an error before exiting on exhaustion"))
    }
}

fn log_if_notable(spec: &CommandSpec, elapsed: Duration) {
    if elapsed >= SLOW_THRESHOLD || spec.is_known_slow() {
        info!(
            command = %spec.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            "command completed"
        );
    }
}

fn spawn_with_retry(command: &mut Command, display: &str) -> Result<Child, CoreError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(CoreError::Spawn {
                    command: display.to_string(),
                    source,
                });
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

/// Drains `reader` to EOF, the way the teacher's own `tee_stream` does, minus
/// the console-mirroring step this crate has no use for.
async fn drain_stream<R>(mut reader: R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await.ok();
    buffer
}

/// Drains stdout and stderr on two concurrent tasks so neither pipe can fill
/// and block the child while the other is still being read (§4.1).
async fn run_to_completion(child: &mut Child, display: &str) -> Result<CommandOutput, CoreError> {
    let stdout_task = child.stdout.take().map(|stdout| tokio::spawn(drain_stream(stdout)));
    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(drain_stream(stderr)));

    let status = child.wait().await.map_err(|source| CoreError::Wait {
        command: display.to_string(),
        source,
    })?;

    let stdout_buf = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr_buf = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    if !status.success() {
        return Err(CoreError::NonZeroExit {
            command: display.to_string(),
            status,
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        });
    }

    Ok(CommandOutput {
        status,
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}

/// SIGTERM, 2s grace, then SIGKILL — the cancellation contract shared by
/// every timed-out subprocess in this crate (§4.1, §5, §9).
async fn terminate_gracefully(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }
    }

    let grace = time::timeout(Duration::from_secs(2), child.wait()).await;
    if grace.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_commands_recognised_by_label() {
        let spec = CommandSpec::new("adb", vec!["devices".into()]);
        assert!(spec.is_idempotent());
        let spec = CommandSpec::new("adb", vec!["install".into(), "foo.apk".into()]);
        assert!(!spec.is_idempotent());
    }

    #[test]
    fn known_slow_prefix_detected() {
        let spec = CommandSpec::new("adb", vec!["shell".into(), "screencap".into()]);
        assert!(!spec.is_known_slow()); // label is "shell", not the prefix itself
        let spec = CommandSpec::new("adb", vec!["screencap".into()]);
        assert!(spec.is_known_slow());
    }

    #[tokio::test]
    async fn tokio_runner_captures_stdout() {
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::new("echo", vec!["hello".into()]);
        let output = runner.execute(spec).await.expect("echo should succeed");
        assert_eq!(output.stdout_string().trim(), "hello");
    }

    #[tokio::test]
    async fn tokio_runner_reports_timeout() {
        let runner = TokioCommandRunner::new();
        let spec =
            CommandSpec::new("sleep", vec!["5".into()]).with_timeout(Duration::from_millis(50));
        let err = runner.execute(spec).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn tokio_runner_surfaces_non_zero_exit() {
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::new("false", vec![]);
        let err = runner.execute(spec).await.unwrap_err();
        assert!(matches!(err, CoreError::NonZeroExit { .. }));
    }

    #[tokio::test]
    async fn tokio_runner_drains_large_stderr_without_deadlock() {
        // A child writing more than one pipe buffer (~64 KiB) to stderr
        // while stdout stays quiet used to hang forever once stdout's
        // read-to-EOF blocked ahead of stderr ever being drained.
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::new(
            "sh",
            vec![
                "-c".into(),
                "yes err >&2 | head -c 200000 >&2; echo done".into(),
            ],
        )
        .with_timeout(Duration::from_secs(5));
        let output = runner.execute(spec).await.expect("should not deadlock");
        assert!(output.stderr.len() >= 200_000);
        assert_eq!(output.stdout_string().trim(), "done");
    }

    #[tokio::test]
    async fn tokio_runner_reports_not_found() {
        let runner = TokioCommandRunner::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", vec![]);
        let err = runner.execute(spec).await.unwrap_err();
        assert!(matches!(err, CoreError::Spawn { .. }));
    }
}
