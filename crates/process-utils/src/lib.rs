//! Child-process helpers shared across the workspace.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window();
    cmd
}

/// Everything a finished child process left behind.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The last `max_lines` lines of stderr, joined with newlines.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let skip = lines.len().saturating_sub(max_lines);
        lines[skip..].join("\n")
    }
}

/// Spawn `command`, drain stdout and stderr concurrently and wait for exit.
///
/// Stdin is closed. Output lines are mirrored to `tracing` at debug level,
/// lines mentioning "error" at warn level. A spawn failure is returned as the
/// `io::Error`; a non-zero exit is not an error here, callers inspect
/// [`CapturedOutput::status`].
pub async fn run_captured(command: &mut Command) -> std::io::Result<CapturedOutput> {
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    let stdout_task = tokio::spawn(collect_lines(child.stdout.take(), "stdout"));
    let stderr_task = tokio::spawn(collect_lines(child.stderr.take(), "stderr"));

    let status = child.wait().await?;

    // Readers finish once the child closes its pipes.
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        elapsed: start.elapsed(),
    })
}

async fn collect_lines<R>(reader: Option<R>, stream: &'static str) -> String
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else {
        return String::new();
    };

    // Lines are decoded lossily; the pipe is drained until EOF whatever the bytes.
    let mut collected = String::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if line.to_lowercase().contains("error") {
                    warn!(stream, "{}", line);
                } else {
                    debug!(stream, "{}", line);
                }
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) => {
                warn!(stream, error = %e, "Failed to read child output");
                break;
            }
        }
    }
    collected
}
