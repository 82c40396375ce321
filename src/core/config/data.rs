use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User settings persisted as TOML. Unset fields fall back to the
/// defaults in [`crate::core::config::defaults`].
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Runner executable placed first on the command line (e.g., "ollama")
    pub runner: Option<String>,
    /// Model selected at start-up
    pub default_model: Option<String>,
    /// Directory holding `chat_history_<N>.txt` files
    pub history_dir: Option<PathBuf>,
    /// Maximum number of sessions listed by `history list`
    pub history_limit: Option<usize>,
    /// Bytes requested per read from the runner's output
    pub chunk_size: Option<usize>,
    /// Echo commands and output to the console
    pub show_trace: Option<bool>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
