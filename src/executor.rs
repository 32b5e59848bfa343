use crate::{
    artifacts,
    config::{ExecutionLimits, SandboxConfig},
    engine::ExecutionResult,
    errors::{Result, SandboxError},
    wrapper::{self, PlotSettings, OUTPUT_DIR_ENV, RUNNER_FILE, SUBMISSION_FILE},
};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};

/// Runs validated submissions in a child interpreter.
///
/// Each run gets a fresh execution id, an output directory named by that id
/// under `output_dir`, and an ephemeral working directory that is removed
/// before the result is returned, whatever the outcome.
pub struct IsolationHost {
    config: Arc<SandboxConfig>,
    python_path: PathBuf,
    runner: String,
}

impl IsolationHost {
    /// Create a host, finding Python in PATH unless the config names one
    pub fn new(config: Arc<SandboxConfig>) -> Result<Self> {
        let python_path = match &config.python_path {
            Some(path) => path.clone(),
            None => which::which("python3")
                .or_else(|_| which::which("python"))
                .map_err(|_| SandboxError::PythonNotFound)?,
        };

        Ok(Self {
            config,
            python_path,
            runner: wrapper::build_runner(&PlotSettings::default()),
        })
    }

    /// Get the Python executable path being used
    pub fn python_path(&self) -> &Path {
        &self.python_path
    }

    /// Run a submission that has already passed validation
    pub async fn run(&self, code: &str) -> ExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let output_dir = self.config.execution_dir(&execution_id);
        let started = Instant::now();
        info!("[SANDBOX] Starting execution {}", execution_id);

        let termination = self.launch(code, &output_dir).await;
        let result = self.finish(execution_id, &output_dir, termination);

        info!(
            "[SANDBOX] Execution {} finished: {:?} in {:?} ({} artifact(s))",
            result.execution_id,
            result.status,
            started.elapsed(),
            result.artifacts.len()
        );
        result
    }

    async fn launch(&self, code: &str, output_dir: &Path) -> Termination {
        let output_dir = match prepare_output_dir(output_dir).await {
            Ok(dir) => dir,
            Err(e) => return Termination::Failed(e),
        };
        let work_dir = match self.create_work_dir() {
            Ok(dir) => dir,
            Err(e) => return Termination::Failed(e),
        };

        let termination = match self
            .prepare(code, work_dir.path(), &output_dir)
            .await
            .and_then(PreparedRun::spawn)
        {
            Ok(running) => running.wait(self.config.timeout(), &self.config.limits).await,
            Err(e) => Termination::Failed(e),
        };

        let path = work_dir.path().to_path_buf();
        match work_dir.close() {
            Ok(()) => debug!("[SANDBOX] Removed working directory {:?}", path),
            Err(e) => warn!("[SANDBOX] Failed to remove working directory {:?}: {}", path, e),
        }
        termination
    }

    fn create_work_dir(&self) -> Result<tempfile::TempDir> {
        let scratch = self.config.scratch_root();
        std::fs::create_dir_all(&scratch)?;
        Ok(tempfile::Builder::new()
            .prefix("code_exec_")
            .tempdir_in(&scratch)?)
    }

    async fn prepare(&self, code: &str, work_dir: &Path, output_dir: &Path) -> Result<PreparedRun> {
        tokio::fs::write(work_dir.join(SUBMISSION_FILE), code).await?;
        tokio::fs::write(work_dir.join(RUNNER_FILE), &self.runner).await?;

        let mut cmd = Command::new(&self.python_path);
        cmd.arg(work_dir.join(RUNNER_FILE))
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("MPLBACKEND", "Agg")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env(OUTPUT_DIR_ENV, output_dir)
            .kill_on_drop(true);

        // Own process group so a timeout can take down every descendant
        #[cfg(unix)]
        cmd.process_group(0);

        Ok(PreparedRun {
            command: cmd,
            python_path: self.python_path.clone(),
        })
    }

    fn finish(&self, execution_id: String, output_dir: &Path, termination: Termination) -> ExecutionResult {
        // The child has terminated; nothing is writing into the directory any more
        let collected = artifacts::collect(output_dir, &execution_id, self.config.namespace());

        match termination {
            Termination::Completed(run) => match collected {
                Ok(artifacts) => ExecutionResult::completed(
                    execution_id,
                    run.status.success(),
                    run.stdout,
                    run.stderr,
                    artifacts,
                ),
                Err(e) => {
                    error!("[SANDBOX] Execution {}: artifact collection failed: {}", execution_id, e);
                    ExecutionResult::faulted(execution_id, e.to_string())
                }
            },
            Termination::TimedOut => {
                warn!(
                    "[SANDBOX] Execution {} exceeded {}s deadline, killed",
                    execution_id, self.config.limits.timeout_seconds
                );
                let artifacts = collected.unwrap_or_else(|e| {
                    warn!("[SANDBOX] Execution {}: artifact collection failed: {}", execution_id, e);
                    Vec::new()
                });
                ExecutionResult::timed_out(execution_id, self.config.limits.timeout_seconds, artifacts)
            }
            Termination::Failed(e) => {
                error!("[SANDBOX] Execution {} failed: {}", execution_id, e);
                ExecutionResult::faulted(execution_id, e.to_string())
            }
        }
    }
}

/// Create the output directory and return it as an absolute path, since the
/// child runs with a different working directory.
async fn prepare_output_dir(output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    Ok(tokio::fs::canonicalize(output_dir).await?)
}

// ============================================================================
// CHILD LIFECYCLE: Created -> Running -> {Completed, TimedOut, Failed}
// ============================================================================

/// A fully configured command that has not been started
struct PreparedRun {
    command: Command,
    python_path: PathBuf,
}

impl PreparedRun {
    fn spawn(mut self) -> Result<RunningChild> {
        let mut child = self.command.spawn().map_err(|source| SandboxError::Spawn {
            path: self.python_path.display().to_string(),
            source,
        })?;
        let pid = child.id();
        debug!("[SANDBOX] Spawned child pid {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::InternalError("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::InternalError("child stderr not captured".to_string()))?;

        Ok(RunningChild {
            child,
            pid,
            stdout,
            stderr,
        })
    }
}

/// A live child with its output pipes
struct RunningChild {
    child: Child,
    pid: Option<u32>,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl RunningChild {
    /// Wait for both streams to close, or for the deadline.
    ///
    /// The child is only reaped after its process group has been killed:
    /// while it is unreaped its pid cannot be reused, so the group id still
    /// names this run's processes and nothing else.
    async fn wait(self, deadline: Duration, limits: &ExecutionLimits) -> Termination {
        let RunningChild {
            mut child,
            pid,
            mut stdout,
            mut stderr,
        } = self;

        let streams = tokio::time::timeout(deadline, async {
            tokio::try_join!(
                read_capped(&mut stdout, limits.max_stdout_bytes),
                read_capped(&mut stderr, limits.max_stderr_bytes),
            )
        })
        .await;

        match streams {
            Ok(Ok((out, err))) => {
                // The child has exited or is exiting; take down anything it left behind
                kill_process_group(pid);
                match child.wait().await {
                    Ok(status) => Termination::Completed(CompletedRun {
                        status,
                        stdout: decode_capped(&out),
                        stderr: decode_capped(&err),
                    }),
                    Err(e) => Termination::Failed(SandboxError::IoError(e)),
                }
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                Termination::Failed(SandboxError::IoError(e))
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                Termination::TimedOut
            }
        }
    }
}

struct CompletedRun {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

enum Termination {
    Completed(CompletedRun),
    TimedOut,
    Failed(SandboxError),
}

async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);
    if let Err(e) = child.kill().await {
        debug!("[SANDBOX] Kill of child {:?} reported: {}", pid, e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!("[SANDBOX] Killed process group {}", pid),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("[SANDBOX] Failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {
    // Only the direct child is killed here (via Child::kill)
}

/// Read a stream to the end, keeping at most `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, cap: usize) -> std::io::Result<Vec<u8>> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if kept.len() < cap {
            let take = n.min(cap - kept.len());
            kept.extend_from_slice(&chunk[..take]);
        }
    }
    Ok(kept)
}

/// Decode captured output, dropping a character split by the byte cap
fn decode_capped(bytes: &[u8]) -> String {
    let end = match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    };
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
