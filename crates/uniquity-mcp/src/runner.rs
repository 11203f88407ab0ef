//! Process runner
//!
//! Runs one reporter process per invocation. stdout and stderr are drained by
//! their own tasks while the exit status is awaited; all three are joined
//! before an outcome is produced, so a chatty child can never block on a full
//! pipe.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn, Instrument};

use crate::mapper::InvocationSpec;

/// Terminal result of running the reporter once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited with status 0
    Success { stdout: Vec<u8> },
    /// Ran but did not exit with status 0. `exit_code` is `None` when the
    /// process was killed by a signal.
    Failure {
        exit_code: Option<i32>,
        stderr: Vec<u8>,
        cause: String,
    },
    /// Never started
    SpawnFailure { cause: String },
}

/// Something that can turn an invocation into an outcome
pub trait Runner: Send + Sync + 'static {
    fn run(&self, spec: InvocationSpec) -> impl Future<Output = ProcessOutcome> + Send;
}

/// Runs invocations as real child processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    base_env: Arc<BTreeMap<OsString, OsString>>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(base_env: BTreeMap<OsString, OsString>, timeout: Option<Duration>) -> Self {
        Self {
            base_env: Arc::new(base_env),
            timeout,
        }
    }

    /// Snapshot the current process environment as the base for every child
    pub fn inherit(timeout: Option<Duration>) -> Self {
        Self::new(std::env::vars_os().collect(), timeout)
    }

    fn command(&self, spec: &InvocationSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(self.base_env.iter())
            .envs(spec.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a deadline can take down grandchildren too.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Wait for exit, enforcing the deadline if one is configured.
    /// Returns the status and whether the deadline fired.
    async fn wait(&self, child: &mut Child) -> (std::io::Result<ExitStatus>, bool) {
        let Some(limit) = self.timeout else {
            return (child.wait().await, false);
        };

        match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status, false),
            Err(_) => {
                warn!("Reporter exceeded {:?}, terminating", limit);
                terminate(child);
                (child.wait().await, true)
            }
        }
    }
}

impl Runner for ProcessRunner {
    async fn run(&self, spec: InvocationSpec) -> ProcessOutcome {
        let program = spec.program.display().to_string();
        debug!("Spawning {} {:?} (env overlay: {:?})", program, spec.args, spec.env.keys());

        let mut child = match self.command(&spec).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Spawn of {} failed: {}", program, e);
                return ProcessOutcome::SpawnFailure {
                    cause: format!("Failed to start {}: {}", program, e),
                };
            }
        };
        let mut group = GroupGuard::new(&child);

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, Stream::Stdout).in_current_span()));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, Stream::Stderr).in_current_span()));

        let ((status, timed_out), stdout, stderr) = tokio::join!(
            self.wait(&mut child),
            collect(stdout_task),
            collect(stderr_task),
        );
        // Exit observed and both pipes closed; nothing left to clean up.
        group.disarm();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                warn!("Waiting on {} failed: {}", program, e);
                return ProcessOutcome::Failure {
                    exit_code: None,
                    cause: format!("{} could not be awaited: {}", program, e),
                    stderr,
                };
            }
        };

        info!("{} exited with {}", program, describe(&status));

        if timed_out {
            let limit = self.timeout.unwrap_or_default();
            return ProcessOutcome::Failure {
                exit_code: None,
                cause: format!(
                    "{} was terminated after exceeding the {}s deadline. Stderr: {}",
                    program,
                    limit.as_secs(),
                    String::from_utf8_lossy(&stderr)
                ),
                stderr,
            };
        }

        match status.code() {
            Some(0) => ProcessOutcome::Success { stdout },
            code => ProcessOutcome::Failure {
                exit_code: code,
                cause: format!(
                    "{} failed with {}. Stderr: {}",
                    program,
                    describe(&status),
                    String::from_utf8_lossy(&stderr)
                ),
                stderr,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Read a stream to its end. No cap: output is bounded only by memory.
async fn drain<R: AsyncRead + Unpin>(mut reader: R, stream: Stream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Stream::Stderr = stream {
                    debug!("reporter stderr: {}", String::from_utf8_lossy(&chunk[..n]).trim_end());
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                warn!("Reading reporter {:?} failed: {}", stream, e);
                break;
            }
        }
    }

    buf
}

async fn collect(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            warn!("Output reader task failed: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    }
}

fn describe(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }

    "unknown status".to_string()
}

/// Kills the child's process group when dropped, unless disarmed.
///
/// `kill_on_drop` only reaches the direct child; this covers everything it
/// spawned when an invocation is aborted mid-run.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!("Invocation dropped, killing process group {}", pgid);
            kill_group(pgid);
        }
    }
}

/// SIGKILL a process group. Returns whether the signal was delivered.
#[cfg(unix)]
fn kill_group(pgid: u32) -> bool {
    // SAFETY: the child was spawned as leader of its own process group,
    // so its pid is the group id and nothing outside it is signalled.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("killpg({}) failed: {}", pgid, err);
        }
    }
    rc == 0
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> bool {
    false
}

/// Kill the child and everything in its process group
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        if kill_group(pid) {
            return;
        }
    }

    if let Err(e) = child.start_kill() {
        warn!("Failed to kill reporter: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> InvocationSpec {
        InvocationSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
        }
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::inherit(None)
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let outcome = runner().run(sh(r#"printf '{"ok":true}'; echo noise >&2"#)).await;
        assert_eq!(
            outcome,
            ProcessOutcome::Success {
                stdout: br#"{"ok":true}"#.to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let outcome = runner().run(sh("echo boom >&2; exit 2")).await;
        match outcome {
            ProcessOutcome::Failure {
                exit_code,
                stderr,
                cause,
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, b"boom\n".to_vec());
                assert!(cause.contains("code 2"));
                assert!(cause.contains("boom"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let spec = InvocationSpec {
            program: PathBuf::from("/nonexistent/uniquity-reporter"),
            args: vec![],
            env: BTreeMap::new(),
        };
        match runner().run(spec).await {
            ProcessOutcome::SpawnFailure { cause } => {
                assert!(cause.contains("Failed to start /nonexistent/uniquity-reporter"));
            }
            other => panic!("expected spawn failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_overlay_wins_over_base() {
        let mut base: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        base.insert("UNIQUITY_OPENAI_MODEL".into(), "from-base".into());
        base.insert("UNIQUITY_KEEP".into(), "kept".into());
        let runner = ProcessRunner::new(base, None);

        let mut spec = sh(r#"printf '%s %s' "$UNIQUITY_OPENAI_MODEL" "$UNIQUITY_KEEP""#);
        spec.env
            .insert("UNIQUITY_OPENAI_MODEL".to_string(), "gpt-4o".to_string());

        let outcome = runner.run(spec).await;
        assert_eq!(
            outcome,
            ProcessOutcome::Success {
                stdout: b"gpt-4o kept".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams() {
        // Well past any pipe buffer on both streams at once.
        let script = "i=0; while [ $i -lt 4000 ]; do \
            echo 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx'; \
            echo 'yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy' >&2; \
            i=$((i+1)); done";
        match runner().run(sh(script)).await {
            ProcessOutcome::Success { stdout } => {
                assert_eq!(stdout.iter().filter(|b| **b == b'\n').count(), 4000);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_terminates_process_group() {
        let runner = ProcessRunner::inherit(Some(Duration::from_millis(200)));
        let started = std::time::Instant::now();

        let outcome = runner.run(sh("echo started >&2; sleep 30 & wait")).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        match outcome {
            ProcessOutcome::Failure {
                exit_code, cause, ..
            } => {
                assert_eq!(exit_code, None);
                assert!(cause.contains("deadline"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signal_exit_has_no_code() {
        let outcome = runner().run(sh("kill -9 $$")).await;
        match outcome {
            ProcessOutcome::Failure {
                exit_code, cause, ..
            } => {
                assert_eq!(exit_code, None);
                assert!(cause.contains("signal 9"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    /// Whether `pid` is still a live (non-zombie) process
    #[cfg(target_os = "linux")]
    fn alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // State follows the parenthesised command name.
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_aborted_run_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleep.pid");
        let script = format!("sleep 41.7 & echo $! > '{}'; wait", pid_file.display());

        let handle = tokio::spawn(async move { runner().run(sh(&script)).await });

        let mut sleep_pid = None;
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse::<u32>() {
                    sleep_pid = Some(pid);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let sleep_pid = sleep_pid.expect("background sleep never started");
        assert!(alive(sleep_pid));

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        let mut gone = false;
        for _ in 0..100 {
            if !alive(sleep_pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "sleep {} outlived the aborted run", sleep_pid);
    }
}
