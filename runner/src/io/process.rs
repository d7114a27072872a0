//! Helpers for running child processes with optional timeouts and bounded output.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type SharedLog = Arc<Option<Mutex<BufWriter<File>>>>;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Stdout followed by stderr, lossily decoded.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

/// The child process could not be started (missing binary, not executable).
///
/// Returned through `anyhow`; callers that treat a failed launch differently
/// from runner-side I/O errors check for it with `downcast_ref`.
#[derive(Debug)]
pub struct SpawnError {
    pub program: String,
    pub source: std::io::Error,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spawn command {}: {}", self.program, self.source)
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Options for [`run_command_streamed`].
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions<'a> {
    /// Kill the child after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Newest bytes of stdout (and, separately, stderr) kept in memory.
    pub output_limit_bytes: usize,
    /// Every stdout and stderr line is appended here as it arrives.
    pub log_path: Option<&'a Path>,
    /// Echo stdout lines to this process's stdout.
    pub echo: bool,
}

/// Run a command with stdin closed, streaming its output line by line.
///
/// Output is read concurrently while the child runs so pipes never fill up.
/// Only the newest `output_limit_bytes` of each pipe stay in memory; older
/// bytes are dropped but still streamed to the log. A failed launch is a
/// [`SpawnError`].
#[instrument(skip_all, fields(
    timeout_secs = options.timeout.map(|t| t.as_secs()),
    output_limit_bytes = options.output_limit_bytes,
    streaming = options.log_path.is_some(),
))]
pub fn run_command_streamed(mut cmd: Command, options: StreamOptions<'_>) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let log: SharedLog = Arc::new(match options.log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create stream dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create stream file {}", path.display()))?;
            Some(Mutex::new(BufWriter::new(file)))
        }
        None => None,
    });

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(source) => {
            error!(err = %source, "failed to spawn command");
            return Err(SpawnError {
                program: cmd.get_program().to_string_lossy().into_owned(),
                source,
            }
            .into());
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = options.output_limit_bytes;
    let echo = options.echo;
    let stdout_log = Arc::clone(&log);
    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, limit, &stdout_log, echo));
    let stderr_log = Arc::clone(&log);
    let stderr_handle =
        thread::spawn(move || read_lines_limited(stderr, limit, &stderr_log, false));

    let mut timed_out = false;
    let status = match options.timeout {
        Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "command timed out, killing"
                );
                timed_out = true;
                child.kill().context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
        None => child.wait().context("wait for command")?,
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line, tee-ing each line to the log and keeping the
/// newest `limit` bytes.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    log: &SharedLog,
    echo: bool,
) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected: VecDeque<u8> = VecDeque::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(mutex) = log.as_ref()
            && let Ok(mut writer) = mutex.lock()
        {
            // Flush per line so the monitor sees output in real time.
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to stream file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush stream file");
            }
        }

        if echo {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(&line);
            let _ = out.flush();
        }

        collected.extend(&line);
        let excess = collected.len().saturating_sub(limit);
        if excess > 0 {
            collected.drain(..excess);
            truncated += excess;
        }
    }

    Ok((collected.into(), truncated))
}
