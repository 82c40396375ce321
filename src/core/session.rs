//! One prompt-to-response execution of the runner.
//!
//! The worker task appends sanitized text to a buffer that the foreground
//! reads through [`InvocationSession::current_output`]. State and output sit
//! behind the same lock, so a reader never sees a half-applied append and no
//! append lands after the session reaches a terminal state.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::escape_filter::StreamSanitizer;
use crate::core::invoker::{ExitReport, InvokeError, OutputSource, ProcessInvoker, RunOutcome};
use crate::core::quoting::build_run_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Completed | InvocationState::Failed | InvocationState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvocationState::Idle => "idle",
            InvocationState::Running => "running",
            InvocationState::Completed => "completed",
            InvocationState::Failed => "failed",
            InvocationState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session left `Running`. Set exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed(ExitReport),
    Failed {
        reason: String,
        exit: Option<ExitReport>,
    },
    Cancelled,
}

impl InvocationOutcome {
    pub fn state(&self) -> InvocationState {
        match self {
            InvocationOutcome::Completed(_) => InvocationState::Completed,
            InvocationOutcome::Failed { .. } => InvocationState::Failed,
            InvocationOutcome::Cancelled => InvocationState::Cancelled,
        }
    }

    fn from_error(err: InvokeError) -> Self {
        let exit = match &err {
            InvokeError::NonZeroExit(report) => Some(*report),
            _ => None,
        };
        InvocationOutcome::Failed {
            reason: err.to_string(),
            exit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// No model identifier was selected.
    ModelNotSet,
    /// `start` was called on a session that already left `Idle`.
    AlreadyStarted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ModelNotSet => write!(f, "Model name is not specified"),
            SessionError::AlreadyStarted => write!(f, "Invocation has already been started"),
        }
    }
}

impl Error for SessionError {}

struct Progress {
    state: InvocationState,
    output: String,
    outcome: Option<InvocationOutcome>,
}

struct Shared {
    progress: Mutex<Progress>,
    state_tx: watch::Sender<InvocationState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut progress = self.lock();
        if progress.state == InvocationState::Running {
            progress.output.push_str(text);
        }
    }

    /// Move from `Running` to the outcome's state. Only the first caller wins.
    fn settle(&self, outcome: InvocationOutcome) -> bool {
        let state = outcome.state();
        {
            let mut progress = self.lock();
            if progress.state != InvocationState::Running {
                return false;
            }
            progress.state = state;
            progress.outcome = Some(outcome);
        }
        self.state_tx.send_replace(state);
        true
    }
}

pub struct InvocationSession {
    prompt: String,
    command: String,
    model: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl InvocationSession {
    /// A session in `Idle` that will run `prompt` against `model`.
    pub fn new(runner: &str, model: &str, prompt: &str) -> Self {
        let (state_tx, _) = watch::channel(InvocationState::Idle);
        Self {
            prompt: prompt.to_string(),
            command: build_run_command(runner, model, prompt),
            model: model.to_string(),
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress {
                    state: InvocationState::Idle,
                    output: String::new(),
                    outcome: None,
                }),
                state_tx,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Launch the runner on a background task. Must be called inside a
    /// Tokio runtime; returns as soon as the task is scheduled.
    pub fn start(&mut self, invoker: &ProcessInvoker) -> Result<(), SessionError> {
        if self.model.trim().is_empty() {
            return Err(SessionError::ModelNotSet);
        }
        {
            let mut progress = self.shared.lock();
            if progress.state != InvocationState::Idle {
                return Err(SessionError::AlreadyStarted);
            }
            progress.state = InvocationState::Running;
        }
        self.shared.state_tx.send_replace(InvocationState::Running);
        info!(model = %self.model, "Invocation started");

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let command = self.command.clone();
        let invoker = invoker.clone();
        tokio::spawn(async move {
            let mut stdout = StreamSanitizer::new();
            let mut stderr = StreamSanitizer::new();

            let result = invoker
                .run(&command, &cancel, |source, bytes| {
                    let sanitizer = match source {
                        OutputSource::Stdout => &mut stdout,
                        OutputSource::Stderr => &mut stderr,
                    };
                    shared.append(&sanitizer.push(bytes));
                })
                .await;

            shared.append(&stdout.finish());
            shared.append(&stderr.finish());

            let outcome = match result {
                Ok(RunOutcome::Exited(report)) => InvocationOutcome::Completed(report),
                Ok(RunOutcome::Terminated) => InvocationOutcome::Cancelled,
                Err(err) => InvocationOutcome::from_error(err),
            };
            debug!(outcome = ?outcome, "Runner finished");
            shared.settle(outcome);

            let output = shared.lock().output.clone();
            invoker.console().output(&output);
        });

        Ok(())
    }

    /// Cancel a running invocation. Returns false when it had already
    /// reached a terminal state (or never started), leaving that state as is.
    pub fn terminate(&self) -> bool {
        let won = self.shared.settle(InvocationOutcome::Cancelled);
        if won {
            info!(model = %self.model, "Invocation cancelled");
            self.cancel.cancel();
        }
        won
    }

    /// Filtered output accumulated so far. Safe to call at any time.
    pub fn current_output(&self) -> String {
        self.shared.lock().output.clone()
    }

    pub fn state(&self) -> InvocationState {
        self.shared.lock().state
    }

    pub fn outcome(&self) -> Option<InvocationOutcome> {
        self.shared.lock().outcome.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == InvocationState::Running
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve once the session is in a terminal state (or was never started).
    pub async fn wait(&self) -> InvocationState {
        let mut rx = self.shared.state_tx.subscribe();
        let result = rx
            .wait_for(|state| *state != InvocationState::Running)
            .await
            .map(|state| *state);
        result.unwrap_or_else(|_| self.state())
    }
}

impl Drop for InvocationSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for InvocationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationSession")
            .field("model", &self.model)
            .field("command", &self.command)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::invoker::InvokerOptions;
    use crate::utils::logging::ConsoleSink;
    use crate::utils::test_utils::write_runner_script;
    use std::time::Duration;
    use tempfile::TempDir;

    fn invoker_in(dir: &TempDir) -> ProcessInvoker {
        ProcessInvoker::new(
            InvokerOptions {
                working_dir: Some(dir.path().to_path_buf()),
                ..InvokerOptions::default()
            },
            ConsoleSink::with_writer(std::io::sink(), false),
        )
    }

    #[test]
    fn start_without_model_stays_idle() {
        let dir = TempDir::new().unwrap();
        let mut session = InvocationSession::new("sh", "", "hello");
        assert_eq!(session.start(&invoker_in(&dir)), Err(SessionError::ModelNotSet));
        assert_eq!(session.state(), InvocationState::Idle);
        assert!(session.outcome().is_none());
    }

    #[test]
    fn command_embeds_escaped_prompt() {
        let session = InvocationSession::new("ollama", "demo", r#"He said "hi""#);
        assert_eq!(session.command(), r#"ollama run demo "He said \"hi\"""#);
        assert_eq!(session.prompt(), r#"He said "hi""#);
    }

    #[tokio::test]
    async fn completes_with_filtered_output() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), r#"printf '\033[31mHello\033[0m\n'"#);

        let mut session = InvocationSession::new("sh", "demo", "hi");
        session.start(&invoker_in(&dir)).unwrap();
        assert_eq!(session.wait().await, InvocationState::Completed);
        assert_eq!(session.current_output(), "Hello\n");
        assert!(matches!(
            session.outcome(),
            Some(InvocationOutcome::Completed(ExitReport { code: Some(0), success: true }))
        ));
    }

    #[tokio::test]
    async fn runner_receives_model_and_prompt() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), r#"printf '%s|%s' "$1" "$2""#);

        let mut session = InvocationSession::new("sh", "demo", r#"He said "hi" \o/"#);
        session.start(&invoker_in(&dir)).unwrap();
        session.wait().await;
        assert_eq!(session.current_output(), r#"demo|He said "hi" \o/"#);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), "printf partial; exit 1");

        let mut session = InvocationSession::new("sh", "demo", "hi");
        session.start(&invoker_in(&dir)).unwrap();
        assert_eq!(session.wait().await, InvocationState::Failed);
        assert_eq!(session.current_output(), "partial");
        match session.outcome() {
            Some(InvocationOutcome::Failed { reason, exit }) => {
                assert_eq!(reason, "Command failed with exit status 1");
                assert_eq!(exit.and_then(|report| report.code), Some(1));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_fails_the_session() {
        let dir = TempDir::new().unwrap();
        let mut session = InvocationSession::new("no-such-runner-here", "demo", "hi");
        session.start(&invoker_in(&dir)).unwrap();
        assert_eq!(session.wait().await, InvocationState::Failed);
        assert_eq!(session.current_output(), "");
    }

    #[tokio::test]
    async fn terminate_cancels_running_invocation() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), "printf started; sleep 30");

        let mut session = InvocationSession::new("sh", "demo", "hi");
        session.start(&invoker_in(&dir)).unwrap();
        assert!(session.is_running());

        tokio::time::timeout(Duration::from_secs(10), async {
            while session.current_output().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("output should stream before exit");

        assert!(session.terminate());
        assert_eq!(session.state(), InvocationState::Cancelled);
        assert_eq!(session.outcome(), Some(InvocationOutcome::Cancelled));
        assert_eq!(session.current_output(), "started");
        assert!(!session.terminate());
    }

    #[tokio::test]
    async fn terminate_after_completion_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), "printf done");

        let mut session = InvocationSession::new("sh", "demo", "hi");
        session.start(&invoker_in(&dir)).unwrap();
        assert_eq!(session.wait().await, InvocationState::Completed);

        assert!(!session.terminate());
        assert_eq!(session.state(), InvocationState::Completed);
        assert_eq!(session.current_output(), "done");
    }

    #[tokio::test]
    async fn runner_path_with_spaces_is_spawned() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), r#"printf '%s' "$2""#);
        let tools = dir.path().join("my tools");
        std::fs::create_dir(&tools).unwrap();
        let runner = tools.join("sh");
        std::os::unix::fs::symlink("/bin/sh", &runner).unwrap();

        let mut session = InvocationSession::new(runner.to_str().unwrap(), "demo", "hi");
        session.start(&invoker_in(&dir)).unwrap();
        assert_eq!(session.wait().await, InvocationState::Completed);
        assert_eq!(session.current_output(), "hi");
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), "printf once");

        let invoker = invoker_in(&dir);
        let mut session = InvocationSession::new("sh", "demo", "hi");
        session.start(&invoker).unwrap();
        session.wait().await;
        assert_eq!(session.start(&invoker), Err(SessionError::AlreadyStarted));
        assert_eq!(session.current_output(), "once");
    }

    #[tokio::test]
    async fn echoes_output_to_console_sink() {
        let dir = TempDir::new().unwrap();
        write_runner_script(dir.path(), "printf hi");
        let buffer = crate::utils::test_utils::SharedBuffer::default();
        let invoker = ProcessInvoker::new(
            InvokerOptions {
                working_dir: Some(dir.path().to_path_buf()),
                ..InvokerOptions::default()
            },
            ConsoleSink::with_writer(buffer.clone(), true),
        );

        let mut session = InvocationSession::new("sh", "demo", "x");
        session.start(&invoker).unwrap();
        session.wait().await;

        // The echo is written right after the state settles.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !buffer.contents().contains("OUTPUT: hi") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("output echo");
        assert!(buffer.contents().starts_with("COMMAND: sh run demo \"x\"\n"));
    }
}
