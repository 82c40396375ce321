//! Command-line quoting for prompt text.
//!
//! The escape set is exactly `"` and `\`: each is prefixed with a backslash
//! and every other character passes through untouched. The invoker's
//! tokenizer undoes the same convention.

/// Characters that receive a backslash prefix inside a quoted argument.
pub const ESCAPED_CHARS: &[char] = &['"', '\\'];

/// Escape `text` for embedding between double quotes.
pub fn escape_argument(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for ch in text.chars() {
        if ESCAPED_CHARS.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Escape `text` and wrap it in double quotes.
pub fn quote_argument(text: &str) -> String {
    format!("\"{}\"", escape_argument(text))
}

/// A word the tokenizer would not read back unchanged without quotes.
fn needs_quoting(word: &str) -> bool {
    word.is_empty()
        || word.contains(char::is_whitespace)
        || word.contains('"')
        || word.contains("\\\\")
}

/// `word` as is when it splits back to itself, otherwise quoted.
pub fn command_word(word: &str) -> String {
    if needs_quoting(word) {
        quote_argument(word)
    } else {
        word.to_string()
    }
}

/// Build `<runner> run <model> "<escaped-prompt>"`.
///
/// The runner and model are quoted only when they contain whitespace or
/// characters the tokenizer treats specially, e.g. `"/opt/my tools/ollama"`.
pub fn build_run_command(runner: &str, model: &str, prompt: &str) -> String {
    format!(
        "{} run {} {}",
        command_word(runner),
        command_word(model),
        quote_argument(prompt)
    )
}
