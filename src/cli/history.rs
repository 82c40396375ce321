//! Saved conversation listing, display and removal

use std::error::Error;
use std::io;

use crate::cli::HistoryAction;
use crate::core::chat_store::{render_turns, session_number, ChatStore};
use crate::core::config::{path_display, Config};

pub fn run_history(config: &Config, action: HistoryAction) -> Result<(), Box<dyn Error>> {
    let store = ChatStore::from_config(config);
    match action {
        HistoryAction::List => {
            let paths = store.list()?;
            if paths.is_empty() {
                println!("No saved conversations in {}", path_display(store.dir()));
                return Ok(());
            }
            for line in describe_sessions(&store, &paths) {
                println!("{line}");
            }
        }
        HistoryAction::Show { number } => {
            let path = store.path_for(number);
            let turns = match store.load(&path) {
                Ok(turns) => turns,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    eprintln!("❌ No saved conversation #{number}");
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            };
            print!("{}", render_turns(&turns));
        }
        HistoryAction::Delete { number } => {
            let path = store.path_for(number);
            if !path.exists() {
                eprintln!("❌ No saved conversation #{number}");
                std::process::exit(1);
            }
            store.delete(&path)?;
            println!("🗑️  Deleted {}", path_display(&path));
        }
    }
    Ok(())
}

/// `#N  <first prompt>` per session; unreadable files are shown by name.
fn describe_sessions(store: &ChatStore, paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| {
            let number = session_number(path)?;
            let summary = store
                .load(path)
                .ok()
                .and_then(|turns| turns.into_iter().next())
                .map(|turn| first_line(&turn.prompt))
                .unwrap_or_else(|| path_display(path));
            Some(format!("#{number:<4} {summary}"))
        })
        .collect()
}

fn first_line(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > MAX_CHARS {
        let cut: String = line.chars().take(MAX_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{create_test_turn, create_test_turns};
    use tempfile::TempDir;

    #[test]
    fn describes_sessions_by_first_prompt() {
        let dir = TempDir::new().unwrap();
        let store = ChatStore::new(dir.path());
        store.save(&create_test_turns()).unwrap();
        store
            .save(&[create_test_turn("Summarize\nthis text", "Done")])
            .unwrap();

        let paths = store.list().unwrap();
        assert_eq!(
            describe_sessions(&store, &paths),
            vec!["#1    Hello".to_string(), "#2    Summarize".to_string()]
        );
    }

    #[test]
    fn long_prompts_are_shortened() {
        let long = "x".repeat(80);
        let shown = first_line(&long);
        assert_eq!(shown.chars().count(), 61);
        assert!(shown.ends_with('…'));
        assert_eq!(first_line("  short  "), "short");
    }
}
