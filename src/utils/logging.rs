use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV_VAR: &str = "MODELCHAT_LOG";

/// Install the stderr diagnostics subscriber. Calling it again is a no-op.
pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Echo of invoked commands and their cleaned output.
///
/// Cloning shares both the switch and the writer, so the client can flip it
/// while the invoker holds its own handle.
#[derive(Clone)]
pub struct ConsoleSink {
    enabled: Arc<AtomicBool>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ConsoleSink {
    pub fn stderr(enabled: bool) -> Self {
        Self::with_writer(io::stderr(), enabled)
    }

    pub fn with_writer(writer: impl Write + Send + 'static, enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Returns true when the sink was previously disabled.
    pub fn enable(&self) -> bool {
        !self.enabled.swap(true, Ordering::SeqCst)
    }

    /// Returns true when the sink was previously enabled.
    pub fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn command(&self, command: &str) {
        self.emit("COMMAND", command);
    }

    pub fn output(&self, text: &str) {
        self.emit("OUTPUT", text);
    }

    pub fn terminated(&self, command: &str) {
        self.emit("TERMINATED", command);
    }

    fn emit(&self, label: &str, text: &str) {
        if !self.is_enabled() {
            return;
        }
        if let Err(err) = self.write_line(label, text) {
            warn!(error = %err, "Console sink write failed");
        }
    }

    fn write_line(&self, label: &str, text: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{label}: {text}")?;
        writer.flush()
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::stderr(false)
    }
}

impl fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
