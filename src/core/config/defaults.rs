use std::path::PathBuf;

use crate::core::chat_store::{DEFAULT_HISTORY_DIR, DEFAULT_HISTORY_LIMIT};
use crate::core::config::data::Config;
use crate::core::invoker::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_RUNNER: &str = "ollama";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Keys accepted by `set` and `unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "runner",
    "default-model",
    "history-dir",
    "history-limit",
    "chunk-size",
    "show-trace",
];

fn parse_positive(key: &str, value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("{key} must be a positive integer, got '{value}'")),
        Ok(parsed) => Ok(parsed),
    }
}

fn parse_switch(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(format!("{key} must be on or off, got '{value}'")),
    }
}

impl Config {
    pub fn runner(&self) -> &str {
        self.runner.as_deref().unwrap_or(DEFAULT_RUNNER)
    }

    pub fn model(&self) -> &str {
        self.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.history_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DIR))
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    pub fn show_trace(&self) -> bool {
        self.show_trace.unwrap_or(false)
    }

    /// Apply `key = value` from the command line.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(format!("A value is required for {key}"));
        }
        match key {
            "runner" => self.runner = Some(trimmed.to_string()),
            "default-model" => self.default_model = Some(trimmed.to_string()),
            "history-dir" => self.history_dir = Some(PathBuf::from(trimmed)),
            "history-limit" => self.history_limit = Some(parse_positive(key, trimmed)?),
            "chunk-size" => self.chunk_size = Some(parse_positive(key, trimmed)?),
            "show-trace" => self.show_trace = Some(parse_switch(key, trimmed)?),
            _ => return Err(format!("Unknown config key: {key}")),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), String> {
        match key {
            "runner" => self.runner = None,
            "default-model" => self.default_model = None,
            "history-dir" => self.history_dir = None,
            "history-limit" => self.history_limit = None,
            "chunk-size" => self.chunk_size = None,
            "show-trace" => self.show_trace = None,
            _ => return Err(format!("Unknown config key: {key}")),
        }
        Ok(())
    }
}
