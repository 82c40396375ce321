//! Line-oriented interactive chat

use std::error::Error;
use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};

use crate::core::chat_store::{ChatSession, ChatStore};
use crate::core::client::ModelClient;
use crate::core::config::{path_display, Config};
use crate::core::session::{InvocationOutcome, InvocationState};

/// How often the foreground copies new output to the terminal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Prompt(&'a str),
    Model(Option<&'a str>),
    Trace(Option<bool>),
    New,
    Save,
    History,
    Help,
    Quit,
}

/// Classify one line typed at the chat prompt. Unknown slash commands are
/// sent to the model as-is.
pub fn parse_input(input: &str) -> ChatInput<'_> {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ChatInput::Prompt(trimmed);
    };

    let mut parts = rest.splitn(2, ' ');
    let name = parts.next().unwrap_or("");
    let args = parts.next().map(str::trim).filter(|args| !args.is_empty());

    match name {
        "model" => ChatInput::Model(args),
        "trace" => match args {
            None => ChatInput::Trace(None),
            Some("on") => ChatInput::Trace(Some(true)),
            Some("off") => ChatInput::Trace(Some(false)),
            Some(_) => ChatInput::Prompt(trimmed),
        },
        "new" => ChatInput::New,
        "save" => ChatInput::Save,
        "history" => ChatInput::History,
        "help" => ChatInput::Help,
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Prompt(trimmed),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /model [name]     Show or switch the model");
    println!("  /trace [on|off]   Show or set the command/output echo");
    println!("  /new              Start a new conversation");
    println!("  /save             Save the conversation");
    println!("  /history          List saved conversations");
    println!("  /quit             Leave the chat");
    println!("  Ctrl+C            Stop the reply; at the prompt, leave the chat");
}

/// Wait for the next line typed at the prompt.
///
/// `None` means end of input or `interrupt` fired first. If listening for
/// the interrupt fails, `listen` is cleared and only input is awaited.
pub async fn next_prompt_line<R, F>(
    lines: &mut Lines<R>,
    interrupt: F,
    listen: &mut bool,
) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            line = lines.next_line() => return line,
            result = &mut interrupt, if *listen => match result {
                Ok(()) => return Ok(None),
                Err(err) => {
                    warn!(error = %err, "Failed to listen for Ctrl+C");
                    *listen = false;
                }
            },
        }
    }
}

/// Print the reply of the client's active invocation as it grows.
///
/// Returns once the invocation has left `Running`. Ctrl+C terminates it.
pub async fn stream_reply(
    client: &mut ModelClient,
    show_trace: bool,
    poll: Duration,
) -> io::Result<InvocationState> {
    let mut stdout = io::stdout();
    let mut shown = 0;
    let mut interrupted = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        // Read the flag first so the final output is copied after it clears.
        let running = client.is_running();
        let output = client.output();
        if output.len() > shown {
            stdout.write_all(output[shown..].as_bytes())?;
            stdout.flush()?;
            shown = output.len();
        }
        if !running {
            if shown > 0 && !output.ends_with('\n') {
                writeln!(stdout)?;
            }
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            result = &mut ctrl_c, if !interrupted => {
                if let Err(err) = result {
                    warn!(error = %err, "Failed to listen for Ctrl+C");
                }
                interrupted = true;
            }
        }
        if interrupted && client.is_running() {
            client.terminate_active(show_trace);
        }
    }

    let state = client.state();
    match client.outcome() {
        Some(InvocationOutcome::Failed { reason, .. }) => eprintln!("❌ {reason}"),
        Some(InvocationOutcome::Cancelled) => eprintln!("⏹  Reply stopped"),
        _ => {}
    }
    Ok(state)
}

pub async fn run_chat(config: &Config) -> Result<(), Box<dyn Error>> {
    let mut client = ModelClient::from_config(config);
    let store = ChatStore::from_config(config);
    let mut session = ChatSession::new();
    let mut show_trace = config.show_trace();

    println!(
        "💬 Chatting with {} via {}. Type /help for commands.",
        client.model(),
        client.runner()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut listen_for_ctrl_c = true;
    loop {
        print!("> ");
        io::stdout().flush()?;

        let ctrl_c = tokio::signal::ctrl_c();
        let Some(line) = next_prompt_line(&mut lines, ctrl_c, &mut listen_for_ctrl_c).await?
        else {
            println!();
            break;
        };

        match parse_input(&line) {
            ChatInput::Prompt("") => continue,
            ChatInput::Prompt(prompt) => {
                if let Err(e) = client.send_prompt(prompt, show_trace) {
                    eprintln!("❌ {e}");
                    continue;
                }
                stream_reply(&mut client, show_trace, POLL_INTERVAL).await?;
                if let Some(turn) = client.last_turn() {
                    session.record(turn);
                }
            }
            ChatInput::Model(None) => println!("Current model: {}", client.model()),
            ChatInput::Model(Some(name)) => match client.set_model(name) {
                Ok(()) => println!("✅ Switched to model: {}", client.model()),
                Err(e) => eprintln!("❌ {e}"),
            },
            ChatInput::Trace(None) => {
                println!("Trace is {}", if show_trace { "on" } else { "off" });
            }
            ChatInput::Trace(Some(enabled)) => {
                show_trace = enabled;
                client.console().set_enabled(enabled);
                println!("Trace {}", if enabled { "enabled" } else { "disabled" });
            }
            ChatInput::New => {
                session.clear();
                println!("🧹 Started a new conversation");
            }
            ChatInput::Save => {
                if session.is_empty() {
                    println!("Nothing to save yet");
                    continue;
                }
                match store.save(session.turns()) {
                    Ok(path) => println!("💾 Saved to {}", path_display(&path)),
                    Err(e) => eprintln!("❌ Failed to save chat history: {e}"),
                }
            }
            ChatInput::History => match store.list() {
                Ok(paths) if paths.is_empty() => println!("No saved conversations"),
                Ok(paths) => {
                    for path in paths {
                        println!("  {}", path_display(&path));
                    }
                }
                Err(e) => eprintln!("❌ Failed to list chat history: {e}"),
            },
            ChatInput::Help => print_help(),
            ChatInput::Quit => break,
        }
    }

    if client.terminate_active(show_trace) {
        debug!("Stopped the running reply on exit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_prompt() {
        assert_eq!(parse_input("  hello there \n"), ChatInput::Prompt("hello there"));
        assert_eq!(parse_input("   "), ChatInput::Prompt(""));
    }

    #[test]
    fn model_command_with_and_without_name() {
        assert_eq!(parse_input("/model"), ChatInput::Model(None));
        assert_eq!(parse_input("/model   "), ChatInput::Model(None));
        assert_eq!(
            parse_input("/model mistral:7b"),
            ChatInput::Model(Some("mistral:7b"))
        );
    }

    #[test]
    fn trace_command_accepts_on_and_off() {
        assert_eq!(parse_input("/trace"), ChatInput::Trace(None));
        assert_eq!(parse_input("/trace on"), ChatInput::Trace(Some(true)));
        assert_eq!(parse_input("/trace off"), ChatInput::Trace(Some(false)));
        assert_eq!(parse_input("/trace loud"), ChatInput::Prompt("/trace loud"));
    }

    #[test]
    fn session_commands() {
        assert_eq!(parse_input("/new"), ChatInput::New);
        assert_eq!(parse_input("/save"), ChatInput::Save);
        assert_eq!(parse_input("/history"), ChatInput::History);
        assert_eq!(parse_input("/help"), ChatInput::Help);
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("/exit"), ChatInput::Quit);
    }

    #[test]
    fn unknown_commands_go_to_the_model() {
        assert_eq!(parse_input("/usr/bin is"), ChatInput::Prompt("/usr/bin is"));
        assert_eq!(parse_input("/"), ChatInput::Prompt("/"));
    }

    #[tokio::test]
    async fn prompt_line_is_returned() {
        let mut lines = BufReader::new(&b"hello\n"[..]).lines();
        let mut listen = true;
        let line = next_prompt_line(&mut lines, std::future::pending(), &mut listen)
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
        assert!(listen);

        let end = next_prompt_line(&mut lines, std::future::pending(), &mut listen)
            .await
            .unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn ctrl_c_at_the_prompt_leaves_the_chat() {
        // Keep the writer open so the read never finishes.
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        let mut listen = true;
        let line = next_prompt_line(&mut lines, async { Ok::<(), io::Error>(()) }, &mut listen)
            .await
            .unwrap();
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn failed_ctrl_c_listener_falls_back_to_input() {
        let mut lines = BufReader::new(&b"still here\n"[..]).lines();
        let mut listen = true;
        let broken = async { Err::<(), _>(io::Error::other("no signal handler")) };
        let line = next_prompt_line(&mut lines, broken, &mut listen)
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("still here"));
        assert!(!listen);
    }

    #[cfg(unix)]
    mod streaming {
        use super::*;
        use crate::core::invoker::{InvokerOptions, ProcessInvoker};
        use crate::utils::logging::ConsoleSink;
        use crate::utils::test_utils::write_runner_script;
        use tempfile::TempDir;

        #[tokio::test]
        async fn stream_reply_returns_final_state() {
            let dir = TempDir::new().unwrap();
            write_runner_script(dir.path(), "printf 'one '; sleep 0.1; printf two");
            let invoker = ProcessInvoker::new(
                InvokerOptions {
                    working_dir: Some(dir.path().to_path_buf()),
                    ..InvokerOptions::default()
                },
                ConsoleSink::with_writer(io::sink(), false),
            );
            let mut client = ModelClient::new("demo", "sh", invoker);
            client.send_prompt("hi", false).unwrap();

            let state = stream_reply(&mut client, false, Duration::from_millis(5))
                .await
                .unwrap();
            assert_eq!(state, InvocationState::Completed);
            assert_eq!(client.output(), "one two");
        }
    }
}
