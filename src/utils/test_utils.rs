#[cfg(test)]
use std::io::{self, Write};
#[cfg(test)]
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
use crate::core::chat_store::ChatTurn;

/// In-memory writer whose contents stay readable after the sink takes it.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write a `sh` script named `run` into `dir`.
///
/// A runner of `sh` then turns `sh run <model> "<prompt>"` into an execution
/// of this script with the model as `$1` and the prompt as `$2`.
#[cfg(test)]
pub fn write_runner_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("run");
    std::fs::write(&path, format!("{body}\n")).expect("write runner script");
    path
}

#[cfg(test)]
pub fn create_test_turn(prompt: &str, response: &str) -> ChatTurn {
    ChatTurn {
        prompt: prompt.to_string(),
        response: response.to_string(),
    }
}

#[cfg(test)]
pub fn create_test_turns() -> Vec<ChatTurn> {
    vec![
        create_test_turn("Hello", "Hi there!"),
        create_test_turn("How are you?", "I'm doing well, thank you for asking!"),
        create_test_turn(
            "Write two lines",
            "First line\nSecond line\n\nAfter a gap",
        ),
    ]
}
