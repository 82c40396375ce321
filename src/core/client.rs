use std::error::Error;
use std::fmt;

use tracing::{debug, warn};

use crate::core::chat_store::ChatTurn;
use crate::core::config::Config;
use crate::core::invoker::{InvokerOptions, ProcessInvoker};
use crate::core::session::{InvocationOutcome, InvocationSession, InvocationState, SessionError};
use crate::utils::logging::ConsoleSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    /// No model identifier is selected.
    EmptyModel,
    /// An invocation is still running.
    Busy,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::EmptyModel => write!(f, "Model name is not specified"),
            ClientError::Busy => write!(f, "A response is still being generated"),
        }
    }
}

impl Error for ClientError {}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ModelNotSet => ClientError::EmptyModel,
            SessionError::AlreadyStarted => ClientError::Busy,
        }
    }
}

/// Front door for the UI: one selected model, at most one running invocation.
pub struct ModelClient {
    model: String,
    runner: String,
    invoker: ProcessInvoker,
    active: Option<InvocationSession>,
}

impl ModelClient {
    pub fn new(model: impl Into<String>, runner: impl Into<String>, invoker: ProcessInvoker) -> Self {
        Self {
            model: model.into(),
            runner: runner.into(),
            invoker,
            active: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let options = InvokerOptions {
            chunk_size: config.chunk_size(),
            working_dir: None,
        };
        let console = ConsoleSink::stderr(config.show_trace());
        Self::new(
            config.model(),
            config.runner(),
            ProcessInvoker::new(options, console),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn runner(&self) -> &str {
        &self.runner
    }

    pub fn console(&self) -> &ConsoleSink {
        self.invoker.console()
    }

    /// Replace the model identifier. Rejected while a request is in flight.
    pub fn set_model(&mut self, name: &str) -> Result<(), ClientError> {
        if self.is_running() {
            return Err(ClientError::Busy);
        }
        self.model = name.trim().to_string();
        debug!(model = %self.model, "Model selected");
        Ok(())
    }

    /// Start a new invocation for `prompt` and return immediately.
    ///
    /// The previous session, if finished, is discarded; its output should
    /// already have been copied by the caller. Must run inside a Tokio runtime.
    pub fn send_prompt(&mut self, prompt: &str, show_trace: bool) -> Result<(), ClientError> {
        if self.is_running() {
            return Err(ClientError::Busy);
        }
        if self.model.is_empty() {
            return Err(ClientError::EmptyModel);
        }

        self.invoker.console().set_enabled(show_trace);
        let mut session = InvocationSession::new(&self.runner, &self.model, prompt);
        session.start(&self.invoker)?;
        self.active = Some(session);
        Ok(())
    }

    /// Cancel the in-flight request, if any. Returns true when one was stopped.
    pub fn terminate_active(&mut self, show_trace: bool) -> bool {
        self.invoker.console().set_enabled(show_trace);
        let Some(session) = &self.active else {
            return false;
        };
        let stopped = session.terminate();
        if stopped {
            self.invoker.console().terminated(session.command());
        } else {
            debug!(state = %session.state(), "No running invocation to terminate");
        }
        stopped
    }

    /// True exactly while the active session is `Running`.
    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(InvocationSession::is_running)
    }

    pub fn state(&self) -> InvocationState {
        self.active
            .as_ref()
            .map_or(InvocationState::Idle, InvocationSession::state)
    }

    pub fn outcome(&self) -> Option<InvocationOutcome> {
        self.active.as_ref().and_then(InvocationSession::outcome)
    }

    /// Latest filtered output of the active session.
    pub fn output(&self) -> String {
        self.active
            .as_ref()
            .map(InvocationSession::current_output)
            .unwrap_or_default()
    }

    /// The finished exchange, ready to append to a chat session.
    pub fn last_turn(&self) -> Option<ChatTurn> {
        let session = self.active.as_ref()?;
        if !session.state().is_terminal() {
            return None;
        }
        let turn = ChatTurn::new(session.prompt(), session.current_output().trim_end());
        if turn.is_blank() {
            warn!("Finished invocation produced an empty exchange");
            return None;
        }
        Some(turn)
    }

    /// Resolve once the active invocation has finished.
    pub async fn wait(&self) -> InvocationState {
        match &self.active {
            Some(session) => session.wait().await,
            None => InvocationState::Idle,
        }
    }
}

impl fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient")
            .field("model", &self.model)
            .field("runner", &self.runner)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn quiet_invoker(working_dir: Option<std::path::PathBuf>) -> ProcessInvoker {
        ProcessInvoker::new(
            InvokerOptions {
                working_dir,
                ..InvokerOptions::default()
            },
            ConsoleSink::with_writer(io::sink(), false),
        )
    }

    #[test]
    fn starts_idle() {
        let client = ModelClient::new("llama3.2", "ollama", quiet_invoker(None));
        assert_eq!(client.model(), "llama3.2");
        assert!(!client.is_running());
        assert_eq!(client.state(), InvocationState::Idle);
        assert_eq!(client.output(), "");
        assert!(client.last_turn().is_none());
    }

    #[test]
    fn empty_model_is_rejected() {
        let mut client = ModelClient::new("", "ollama", quiet_invoker(None));
        assert_eq!(client.send_prompt("hello", false), Err(ClientError::EmptyModel));
        assert!(!client.is_running());
    }

    #[test]
    fn set_model_replaces_identifier_when_idle() {
        let mut client = ModelClient::new("a", "ollama", quiet_invoker(None));
        client.set_model("  mistral ").unwrap();
        assert_eq!(client.model(), "mistral");
    }

    #[test]
    fn terminate_without_session_is_a_no_op() {
        let mut client = ModelClient::new("a", "ollama", quiet_invoker(None));
        assert!(!client.terminate_active(false));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::utils::test_utils::write_runner_script;
        use std::time::Duration;
        use tempfile::TempDir;

        fn client_with_script(body: &str) -> (TempDir, ModelClient) {
            let dir = TempDir::new().unwrap();
            write_runner_script(dir.path(), body);
            let invoker = quiet_invoker(Some(dir.path().to_path_buf()));
            (dir, ModelClient::new("demo", "sh", invoker))
        }

        #[tokio::test]
        async fn second_prompt_while_running_is_rejected() {
            let (_dir, mut client) = client_with_script("sleep 30");
            client.send_prompt("first", false).unwrap();
            assert!(client.is_running());

            assert_eq!(client.send_prompt("second", false), Err(ClientError::Busy));
            assert_eq!(client.set_model("other"), Err(ClientError::Busy));
            assert_eq!(client.model(), "demo");

            assert!(client.terminate_active(false));
            assert!(!client.is_running());
            assert_eq!(client.state(), InvocationState::Cancelled);
            assert!(!client.terminate_active(false));
        }

        #[tokio::test]
        async fn running_flag_clears_on_completion() {
            let (_dir, mut client) = client_with_script(r#"printf 'echo: %s' "$2""#);
            client.send_prompt("ping", false).unwrap();
            assert_eq!(client.wait().await, InvocationState::Completed);
            assert!(!client.is_running());
            assert_eq!(client.output(), "echo: ping");

            let turn = client.last_turn().unwrap();
            assert_eq!(turn.prompt, "ping");
            assert_eq!(turn.response, "echo: ping");

            client.set_model("next").unwrap();
            client.send_prompt("pong", false).unwrap();
            client.wait().await;
            assert_eq!(client.output(), "echo: pong");
        }

        #[tokio::test]
        async fn failed_run_shows_reason_with_partial_output() {
            let (_dir, mut client) = client_with_script("printf partial; exit 1");
            client.send_prompt("hi", false).unwrap();
            assert_eq!(client.wait().await, InvocationState::Failed);
            assert_eq!(client.output(), "partial");
            match client.outcome() {
                Some(InvocationOutcome::Failed { reason, .. }) => {
                    assert_eq!(reason, "Command failed with exit status 1");
                }
                other => panic!("expected a failure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn output_is_visible_while_running() {
            let (_dir, mut client) = client_with_script("printf 'first '; sleep 30");
            client.send_prompt("hi", false).unwrap();

            tokio::time::timeout(Duration::from_secs(10), async {
                while client.output().is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("partial output while running");

            assert!(client.is_running());
            assert_eq!(client.output(), "first ");
            assert!(client.last_turn().is_none());
            client.terminate_active(false);
        }
    }
}
