use std::io::Write;

pub const COLOR_DEFAULT: &str = "\x1b[0m";
pub const COLOR_BOLD: &str = "\x1b[1m";

pub struct Editor {
    history: Vec<String>,
}

impl Editor {
    pub fn new() -> Self {
        Self { history: vec![] }
    }

    pub fn add_history(&mut self, line: &str) {
        if !line.is_empty() {
            self.history.push(line.to_string());
        }
    }

    /// Most recently entered line, reoffered as the default answer.
    pub fn last(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    /// Reads one line, `None` once stdin reaches end of input.
    pub fn readline(&self, prompt: &str) -> std::io::Result<Option<String>> {
        print!("{}", prompt);
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim().to_string()))
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_skips_empty_lines_and_keeps_the_last() {
        let mut editor = Editor::new();
        assert_eq!(editor.last(), None);
        editor.add_history("");
        assert_eq!(editor.last(), None);
        editor.add_history("org/model-a");
        editor.add_history("org/model-b");
        assert_eq!(editor.last(), Some("org/model-b"));
    }
}
