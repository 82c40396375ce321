//! Plain-text chat history files.
//!
//! A saved session is a flat file of tagged blocks:
//!
//! ```text
//! User Prompt: <text>
//!
//! Response: <text>
//!
//! ```
//!
//! A tag is the whole prefix, trailing space included; any other line
//! continues the entry above it. Files are named
//! `chat_history_<N>.txt` and are written once, never updated in place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::config::Config;

pub const DEFAULT_HISTORY_DIR: &str = "chat_history";
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const FILE_PREFIX: &str = "chat_history_";
const FILE_EXTENSION: &str = ".txt";
const PROMPT_TAG: &str = "User Prompt: ";
const RESPONSE_TAG: &str = "Response: ";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatTurn {
    pub prompt: String,
    pub response: String,
}

impl ChatTurn {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.prompt.is_empty() && self.response.is_empty()
    }
}

/// Ordered exchanges of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSession {
    turns: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Blank turns are ignored; returns whether it was kept.
    pub fn record(&mut self, turn: ChatTurn) -> bool {
        if turn.is_blank() {
            return false;
        }
        self.turns.push(turn);
        true
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

impl From<Vec<ChatTurn>> for ChatSession {
    fn from(turns: Vec<ChatTurn>) -> Self {
        let mut session = ChatSession::new();
        for turn in turns {
            session.record(turn);
        }
        session
    }
}

fn push_entry(out: &mut String, tag: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    out.push_str(tag);
    out.push_str(&text.replace("\r\n", "\n"));
    out.push_str("\n\n");
}

/// Serialize turns. Empty fields are left out and CRLF becomes LF.
pub fn render_turns(turns: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        push_entry(&mut out, PROMPT_TAG, &turn.prompt);
        push_entry(&mut out, RESPONSE_TAG, &turn.response);
    }
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Prompt,
    Response,
}

/// Drops the one blank separator line `render_turns` writes after an entry.
fn close_entry(lines: &mut Vec<&str>) -> String {
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    let text = lines.join("\n");
    lines.clear();
    text
}

/// Parse tagged text back into turns. Never fails: stray text before the
/// first tag is ignored and a prompt without a response keeps an empty one.
pub fn parse_turns(text: &str) -> Vec<ChatTurn> {
    let mut entries: Vec<(EntryKind, String)> = Vec::new();
    let mut current: Option<EntryKind> = None;
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let tagged = line
            .strip_prefix(PROMPT_TAG)
            .map(|rest| (EntryKind::Prompt, rest))
            .or_else(|| {
                line.strip_prefix(RESPONSE_TAG)
                    .map(|rest| (EntryKind::Response, rest))
            });

        match tagged {
            Some((kind, rest)) => {
                if let Some(open) = current.replace(kind) {
                    entries.push((open, close_entry(&mut lines)));
                }
                lines.push(rest);
            }
            None if current.is_some() => lines.push(line),
            None => {}
        }
    }
    if let Some(open) = current {
        entries.push((open, close_entry(&mut lines)));
    }

    let mut turns = Vec::new();
    let mut pending: Option<String> = None;
    for (kind, text) in entries {
        match kind {
            EntryKind::Prompt => {
                if let Some(prompt) = pending.replace(text) {
                    turns.push(ChatTurn::new(prompt, String::new()));
                }
            }
            EntryKind::Response => {
                turns.push(ChatTurn::new(pending.take().unwrap_or_default(), text));
            }
        }
    }
    if let Some(prompt) = pending {
        turns.push(ChatTurn::new(prompt, String::new()));
    }

    turns.retain(|turn| !turn.is_blank());
    turns
}

/// Numbered history files in one directory.
#[derive(Debug, Clone)]
pub struct ChatStore {
    dir: PathBuf,
    limit: usize,
}

impl ChatStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.history_dir()).with_limit(config.history_limit())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, number: u32) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{number}{FILE_EXTENSION}"))
    }

    /// Create the history directory if needed. Does nothing when it exists.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Write `turns` to the first unused `chat_history_<N>.txt`.
    pub fn save(&self, turns: &[ChatTurn]) -> io::Result<PathBuf> {
        let contents = render_turns(turns);
        if contents.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no chat turns to save",
            ));
        }

        self.ensure_dir()?;
        let mut temp_file = NamedTempFile::new_in(&self.dir)?;
        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file().sync_all()?;

        for number in 1..=u32::MAX {
            let path = self.path_for(number);
            if path.exists() {
                continue;
            }
            match temp_file.persist_noclobber(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), turns = turns.len(), "Chat history saved");
                    return Ok(path);
                }
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                    temp_file = err.file;
                }
                Err(err) => return Err(err.error),
            }
        }

        Err(io::Error::other("no free chat history file name"))
    }

    /// Read a saved session. Malformed content yields whatever turns parse.
    pub fn load(&self, path: &Path) -> io::Result<Vec<ChatTurn>> {
        let bytes = fs::read(path)?;
        Ok(parse_turns(&String::from_utf8_lossy(&bytes)))
    }

    /// Remove a saved session; a missing file is not an error.
    pub fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Chat history deleted");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Saved sessions in numeric order, at most `limit` of them.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut numbered = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(number) = session_number(&path) {
                numbered.push((number, path));
            }
        }
        numbered.sort_by_key(|(number, _)| *number);
        numbered.truncate(self.limit);
        Ok(numbered.into_iter().map(|(_, path)| path).collect())
    }
}

/// The `N` in `chat_history_<N>.txt`, if the name follows the convention.
pub fn session_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_EXTENSION)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
