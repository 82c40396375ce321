//! Spawning the model runner and streaming its output.
//!
//! [`ProcessInvoker`] turns a command line into a child process with a null
//! standard input and both output streams read in fixed-size chunks. Chunks
//! from stdout and stderr are merged into one ordered channel and surfaced to
//! the caller as they arrive, before the next read is awaited.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::utils::logging::ConsoleSink;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// How a finished child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub success: bool,
}

impl From<ExitStatus> for ExitReport {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

#[derive(Debug)]
pub enum InvokeError {
    /// The command line held no program to run.
    EmptyCommand,
    /// The process could not be created.
    Spawn(String),
    /// The process ran to completion but reported failure.
    NonZeroExit(ExitReport),
    /// Reading output or waiting on the child failed after spawn.
    Io(io::Error),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::EmptyCommand => write!(f, "Empty command"),
            InvokeError::Spawn(message) => write!(f, "Failed to start runner: {message}"),
            InvokeError::NonZeroExit(report) => write!(f, "Command failed with {report}"),
            InvokeError::Io(err) => write!(f, "Runner I/O error: {err}"),
        }
    }
}

impl Error for InvokeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InvokeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for InvokeError {
    fn from(err: io::Error) -> Self {
        InvokeError::Io(err)
    }
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(ExitReport),
    Terminated,
}

/// Split a command line into program and arguments.
///
/// Whitespace separates words, double quotes group them, and a backslash
/// makes a following `"` or `\` literal. Any other backslash is kept as is.
/// An unterminated quote runs to the end of the line.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                in_word = true;
                match chars.peek() {
                    Some(&next) if next == '"' || next == '\\' => {
                        current.push(next);
                        chars.next();
                    }
                    _ => current.push('\\'),
                }
            }
            '"' => {
                in_word = true;
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    words
}

#[derive(Debug, Clone)]
pub struct InvokerOptions {
    pub chunk_size: usize,
    pub working_dir: Option<PathBuf>,
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    options: InvokerOptions,
    console: ConsoleSink,
}

impl ProcessInvoker {
    pub fn new(options: InvokerOptions, console: ConsoleSink) -> Self {
        Self { options, console }
    }

    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }

    /// Start `command` and begin reading its output in the background.
    pub fn spawn(&self, command: &str) -> Result<RunningProcess, InvokeError> {
        let mut words = split_command_line(command).into_iter();
        let program = words.next().ok_or(InvokeError::EmptyCommand)?;

        self.console.command(command);
        debug!(command = %command, "Starting runner");

        let mut cmd = Command::new(&program);
        cmd.args(words)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.options.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|err| InvokeError::Spawn(format!("{program}: {err}")))?;
        let pid = child.id();
        debug!(pid = ?pid, program = %program, "Runner started");

        let (tx, rx) = mpsc::unbounded_channel();
        let chunk_size = self.options.chunk_size.max(1);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, OutputSource::Stdout, chunk_size, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, OutputSource::Stderr, chunk_size, tx);
        }

        Ok(RunningProcess {
            child,
            pid,
            chunks: rx,
            finished: None,
            terminated: false,
        })
    }

    /// Run `command` to the end, handing each chunk to `on_chunk` as it is read.
    ///
    /// Cancelling `cancel` kills the process and yields
    /// [`RunOutcome::Terminated`]. A non-zero exit is reported only after the
    /// output has been fully drained.
    pub async fn run<F>(
        &self,
        command: &str,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<RunOutcome, InvokeError>
    where
        F: FnMut(OutputSource, &[u8]),
    {
        let mut process = self.spawn(command)?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = process.next_chunk() => Some(chunk),
            };

            match next {
                None => {
                    process.terminate();
                    let _ = process.wait().await;
                    return Ok(RunOutcome::Terminated);
                }
                Some(Some(Ok((source, bytes)))) => on_chunk(source, &bytes),
                Some(Some(Err(err))) => {
                    process.terminate();
                    let _ = process.wait().await;
                    return Err(err);
                }
                Some(None) => break,
            }
        }

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            report = process.wait() => Some(report),
        };
        let report = match waited {
            Some(report) => report?,
            None => {
                process.terminate();
                let _ = process.wait().await;
                return Ok(RunOutcome::Terminated);
            }
        };

        if report.success {
            Ok(RunOutcome::Exited(report))
        } else {
            Err(InvokeError::NonZeroExit(report))
        }
    }
}

enum ReadEvent {
    Chunk(OutputSource, Vec<u8>),
    Failed(OutputSource, io::Error),
}

fn spawn_reader<R>(
    mut reader: R,
    source: OutputSource,
    chunk_size: usize,
    tx: mpsc::UnboundedSender<ReadEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = vec![0u8; chunk_size];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => {
                    if tx.send(ReadEvent::Chunk(source, buffer[..read].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let _ = tx.send(ReadEvent::Failed(source, err));
                    break;
                }
            }
        }
    });
}

/// A spawned runner whose output is being read.
///
/// Owns the child handle; nothing else may signal the process.
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    chunks: mpsc::UnboundedReceiver<ReadEvent>,
    finished: Option<ExitReport>,
    terminated: bool,
}

impl RunningProcess {
    /// Next chunk in arrival order, or `None` once both streams hit EOF.
    pub async fn next_chunk(&mut self) -> Option<Result<(OutputSource, Vec<u8>), InvokeError>> {
        match self.chunks.recv().await? {
            ReadEvent::Chunk(source, bytes) => Some(Ok((source, bytes))),
            ReadEvent::Failed(source, err) => {
                debug!(source = ?source, error = %err, "Runner output read failed");
                Some(Err(InvokeError::Io(err)))
            }
        }
    }

    pub async fn wait(&mut self) -> Result<ExitReport, InvokeError> {
        if let Some(report) = self.finished {
            return Ok(report);
        }
        let report = ExitReport::from(self.child.wait().await?);
        debug!(pid = ?self.pid, status = %report, "Runner exited");
        self.finished = Some(report);
        Ok(report)
    }

    /// Forcibly stop the runner and, best effort, anything it spawned.
    ///
    /// Safe to call repeatedly and after the process has already exited.
    pub fn terminate(&mut self) {
        if self.terminated || self.finished.is_some() {
            return;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.finished = Some(ExitReport::from(status));
            return;
        }
        self.terminated = true;

        if let Some(pid) = self.pid {
            kill_process_tree(pid);
        }
        if let Err(err) = self.child.start_kill() {
            debug!(pid = ?self.pid, error = %err, "Runner kill failed");
        }
    }
}

#[cfg(unix)]
fn kill_process_tree(pid: u32) {
    // The child leads its own process group, so the group id equals its pid.
    let status = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        warn!(pid, error = %err, "Could not signal runner process group");
    }
}

#[cfg(windows)]
fn kill_process_tree(pid: u32) {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        warn!(pid, error = %err, "Could not end runner process tree");
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_process_tree(_pid: u32) {}
