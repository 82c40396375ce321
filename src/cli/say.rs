//! One-shot "say" command

use std::error::Error;

use crate::cli::chat::{stream_reply, POLL_INTERVAL};
use crate::core::client::ModelClient;
use crate::core::config::Config;
use crate::core::session::InvocationState;

pub async fn run_say(config: &Config, prompt: &str) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        eprintln!("Usage: modelchat say <prompt>");
        std::process::exit(1);
    }

    let show_trace = config.show_trace();
    let mut client = ModelClient::from_config(config);
    if let Err(e) = client.send_prompt(prompt, show_trace) {
        eprintln!("❌ Error: {e}");
        std::process::exit(1);
    }

    match stream_reply(&mut client, show_trace, POLL_INTERVAL).await? {
        InvocationState::Completed => Ok(()),
        _ => std::process::exit(1),
    }
}
