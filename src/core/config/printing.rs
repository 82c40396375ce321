use crate::core::config::data::{path_display, Config};

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        for line in self.describe() {
            println!("  {line}");
        }
    }

    /// One `key: value` line per setting, marking defaults.
    pub fn describe(&self) -> Vec<String> {
        fn line<T: std::fmt::Display>(key: &str, set: Option<T>, effective: T) -> String {
            match set {
                Some(value) => format!("{key}: {value}"),
                None => format!("{key}: {effective} (default)"),
            }
        }

        let switch = |on: bool| if on { "on" } else { "off" };
        vec![
            line("runner", self.runner.as_deref(), self.runner()),
            line("default-model", self.default_model.as_deref(), self.model()),
            line(
                "history-dir",
                self.history_dir.as_ref().map(path_display),
                path_display(self.history_dir()),
            ),
            line("history-limit", self.history_limit, self.history_limit()),
            line("chunk-size", self.chunk_size, self.chunk_size()),
            line(
                "show-trace",
                self.show_trace.map(switch),
                switch(self.show_trace()),
            ),
        ]
    }
}
