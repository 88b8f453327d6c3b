use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use shellbot_core::config::{ExecutorConfig, ExecutorMode};
use shellbot_core::types::{ExecutionResult, EXIT_REJECTED};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::format::TRUNCATION_MARKER;
use crate::sanitizer::ShellCommand;

/// Runs sanitized commands. No safety checks happen here: the only way to get
/// a [`ShellCommand`] is through the sanitizer.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ShellCommand) -> ExecutionResult;
}

/// Executor that dispatches to Docker or direct `bash -c` execution.
pub struct ShellExecutor {
    mode: ExecutorMode,
    docker_image: String,
    timeout_secs: u64,
    work_dir: Option<String>,
    max_output_bytes: usize,
}

impl ShellExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            mode: config.mode,
            docker_image: config.docker_image.clone(),
            timeout_secs: config.timeout_secs,
            work_dir: config.work_dir.clone(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn timed_out(&self, command: &ShellCommand) -> ExecutionResult {
        ExecutionResult::completed(
            command.as_str(),
            EXIT_REJECTED,
            "",
            format!("Command timed out after {} seconds.", self.timeout_secs),
        )
    }

    // ── Direct execution ───────────────────────────────────────────────

    async fn run_direct(&self, command: &ShellCommand) -> ExecutionResult {
        debug!("Executing shell command (direct mode): {}", command);
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so a timeout can take down pipelines and grandchildren.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionResult::rejected(command.as_str(), e.to_string()),
        };
        let pid = child.id();

        match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            wait_capped(&mut child, self.max_output_bytes),
        )
        .await
        {
            Ok(Ok(output)) => collect(command, output),
            Ok(Err(e)) => ExecutionResult::rejected(command.as_str(), e.to_string()),
            Err(_) => {
                warn!("Command timed out after {}s: {}", self.timeout_secs, command);
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                self.timed_out(command)
            }
        }
    }

    // ── Docker execution ───────────────────────────────────────────────

    fn docker_args(&self, container: &str, command: &ShellCommand) -> Vec<String> {
        let mut args: Vec<String> = [
            "run",
            "--rm",
            "--network=none",
            "--read-only",
            "--name",
            container,
            "--tmpfs",
            "/tmp:rw,noexec,nosuid,size=64m",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(dir) = &self.work_dir {
            args.push("-v".to_string());
            args.push(format!("{}:/workspace:ro", dir));
            args.push("-w".to_string());
            args.push("/workspace".to_string());
        }

        args.push(self.docker_image.clone());
        args.push("bash".to_string());
        args.push("-c".to_string());
        args.push(command.as_str().to_string());
        args
    }

    async fn run_docker(&self, command: &ShellCommand) -> ExecutionResult {
        debug!("Executing shell command (Docker mode): {}", command);
        let container = format!("shellbot-{}", uuid::Uuid::new_v4());
        let mut child = match Command::new("docker")
            .args(self.docker_args(&container, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::rejected(
                    command.as_str(),
                    format!("Failed to run docker: {}", e),
                )
            }
        };
        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            wait_capped(&mut child, self.max_output_bytes),
        )
        .await;

        match output {
            Ok(Ok(output)) => collect(command, output),
            Ok(Err(e)) => ExecutionResult::rejected(
                command.as_str(),
                format!("Failed to run docker: {}", e),
            ),
            Err(_) => {
                warn!("Docker command timed out after {}s: {}", self.timeout_secs, command);
                // Killing the CLI client does not stop the container.
                if let Err(e) = Command::new("docker")
                    .args(["rm", "-f", &container])
                    .output()
                    .await
                {
                    warn!("Failed to remove container {}: {}", container, e);
                }
                self.timed_out(command)
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn run(&self, command: &ShellCommand) -> ExecutionResult {
        match self.mode {
            ExecutorMode::Direct => self.run_direct(command).await,
            ExecutorMode::Docker => self.run_docker(command).await,
        }
    }
}

/// One stream read up to the capture limit.
#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).trim().to_string();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

struct CapturedOutput {
    status: ExitStatus,
    stdout: Captured,
    stderr: Captured,
}

/// Wait for `child` while reading both pipes concurrently, keeping at most
/// `limit` bytes of each. Bytes past the limit are drained so the child
/// never blocks on a full pipe.
async fn wait_capped(child: &mut Child, limit: usize) -> std::io::Result<CapturedOutput> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) = tokio::try_join!(
        read_capped(stdout, limit),
        read_capped(stderr, limit),
        child.wait(),
    )?;
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
    })
}

async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Captured::default());
    };
    let mut bytes = Vec::new();
    (&mut reader)
        .take(u64::try_from(limit).unwrap_or(u64::MAX))
        .read_to_end(&mut bytes)
        .await?;
    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    if dropped > 0 {
        debug!("discarded {} bytes of output past the {} byte limit", dropped, limit);
    }
    Ok(Captured {
        bytes,
        truncated: dropped > 0,
    })
}

fn collect(command: &ShellCommand, output: CapturedOutput) -> ExecutionResult {
    ExecutionResult::completed(
        command.as_str(),
        output.status.code().unwrap_or(EXIT_REJECTED),
        output.stdout.text(),
        output.stderr.text(),
    )
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; pgid is the group this executor
    // created for the child with process_group(0).
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "killpg({}) failed: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
