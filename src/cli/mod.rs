//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod history;
pub mod say;


use std::error::Error;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::cli::chat::run_chat;
use crate::cli::history::run_history;
use crate::cli::say::run_say;
use crate::core::config::defaults::CONFIG_KEYS;
use crate::core::config::Config;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "modelchat")]
#[command(version)]
#[command(about = "A terminal chat front-end for local model runners such as ollama")]
#[command(
    long_about = "Modelchat sends each prompt to a local command-line model runner \
(`<runner> run <model> \"<prompt>\"`) and streams the cleaned-up reply as it arrives. \
Terminal escape sequences and control bytes are removed from the runner's output.\n\n\
Chat commands:\n\
  /model <name>     Switch to another model\n\
  /model            Show the current model\n\
  /trace on|off     Echo commands and output to stderr\n\
  /new              Start a new conversation\n\
  /save             Save the conversation to the history directory\n\
  /history          List saved conversations\n\
  /help             Show this list\n\
  /quit             Leave the chat\n\
  Ctrl+C            Stop the reply; at the prompt, leave the chat\n\n\
Environment Variables:\n\
  MODELCHAT_LOG     Diagnostic log filter (e.g. debug, modelchat=trace)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use instead of the configured default
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Runner executable to use instead of the configured one
    #[arg(short = 'r', long, global = true, value_name = "RUNNER")]
    pub runner: Option<String>,

    /// Echo each command and its output to stderr
    #[arg(long, global = true)]
    pub trace: bool,

    /// Enable debug diagnostics (overridden by MODELCHAT_LOG)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Send a single prompt and print the reply
    Say {
        /// Prompt text; multiple words are joined with spaces
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Inspect saved conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Option<Vec<String>>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    /// List saved conversations in numeric order
    List,
    /// Print a saved conversation
    Show {
        /// Session number from `history list`
        number: u32,
    },
    /// Delete a saved conversation
    Delete {
        /// Session number from `history list`
        number: u32,
    },
}

impl Args {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.default_model = Some(model.trim().to_string());
        }
        if let Some(runner) = &self.runner {
            config.runner = Some(runner.trim().to_string());
        }
        if self.trace {
            config.show_trace = Some(true);
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        "Starting modelchat"
    );

    let mut config = Config::load()?;

    match &args.command {
        Some(Commands::Set { key, value }) => {
            let value = value.as_ref().map(|parts| parts.join(" "));
            match value.as_deref().map(str::trim) {
                None | Some("") => config.print_all(),
                Some(value) => {
                    if let Err(e) = config.set_value(key, value) {
                        eprintln!("❌ {e}");
                        eprintln!("Available keys: {}", CONFIG_KEYS.join(", "));
                        std::process::exit(1);
                    }
                    config.save()?;
                    println!("✅ Set {key} to: {value}");
                }
            }
            Ok(())
        }
        Some(Commands::Unset { key }) => {
            if let Err(e) = config.unset_value(key) {
                eprintln!("❌ {e}");
                eprintln!("Available keys: {}", CONFIG_KEYS.join(", "));
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Some(Commands::History { action }) => {
            args.apply_overrides(&mut config);
            run_history(&config, *action)
        }
        Some(Commands::Say { prompt }) => {
            args.apply_overrides(&mut config);
            run_say(&config, &prompt.join(" ")).await
        }
        Some(Commands::Chat) | None => {
            args.apply_overrides(&mut config);
            run_chat(&config).await
        }
    }
}
