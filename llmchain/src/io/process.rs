//! Child processes with a wall-clock limit and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output pipe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and discarded.
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Result of a finished (or killed) child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    /// Lines noting how much of each stream was dropped; empty if nothing was.
    pub fn truncated_notice(&self, label: &str) -> String {
        [("stdout", &self.stdout), ("stderr", &self.stderr)]
            .into_iter()
            .filter(|(_, captured)| captured.dropped > 0)
            .map(|(stream, captured)| {
                format!("\n[{label} {stream} truncated {} bytes]\n", captured.dropped)
            })
            .collect()
    }
}

/// Run `cmd` with stdin closed, killing it once `timeout` elapses.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty child cannot block on a full pipe. At most `output_limit_bytes` are
/// kept per stream.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, program = ?cmd.get_program(), "failed to spawn command");
        anyhow!(err).context(format!("spawn {}", cmd.get_program().to_string_lossy()))
    })?;
    debug!(pid = child.id(), "child spawned");

    let stdout = capture(child.stdout.take(), output_limit_bytes)?;
    let stderr = capture(child.stderr.take(), output_limit_bytes)?;

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let stdout = finish(stdout).context("collect stdout")?;
    let stderr = finish(stderr).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn capture<R: Read + Send + 'static>(
    pipe: Option<R>,
    limit: usize,
) -> Result<JoinHandle<Result<Captured>>> {
    let pipe = pipe.ok_or_else(|| anyhow!("child output was not piped"))?;
    Ok(thread::spawn(move || read_limited(pipe, limit)))
}

fn finish(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limited_counts_dropped_bytes() {
        let data = vec![b'a'; 20_000];
        let captured = read_limited(&data[..], 100).expect("read");
        assert_eq!(captured.bytes.len(), 100);
        assert_eq!(captured.dropped, 19_900);
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");
        let output =
            run_command_with_timeout(cmd, Duration::from_secs(10), 1_000).expect("run command");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout.text(), "out\n");
        assert_eq!(output.stderr.text(), "err\n");
        assert!(!output.timed_out);
        assert!(!output.success());
        assert_eq!(output.truncated_notice("agent"), "");
    }

    #[cfg(unix)]
    #[test]
    fn notice_names_truncated_stream() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 0123456789");
        let output =
            run_command_with_timeout(cmd, Duration::from_secs(10), 4).expect("run command");
        assert_eq!(output.stdout.text(), "0123");
        assert_eq!(
            output.truncated_notice("agent"),
            "\n[agent stdout truncated 6 bytes]\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn kills_command_after_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output =
            run_command_with_timeout(cmd, Duration::from_millis(100), 1_000).expect("run command");
        assert!(output.timed_out);
        assert!(!output.success());
    }
}
