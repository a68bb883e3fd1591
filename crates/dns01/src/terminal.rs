//! Terminal prompter

use std::io::{self, Write};

use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use dns01_core::{parse_yes_no, PromptError, Prompter};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

/// Reads answers with rustyline and writes to stdout
pub struct TerminalPrompter {
    config: Config,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            config: Config::builder().auto_add_history(false).build(),
        }
    }

    fn editor(&self) -> Result<Editor<(), DefaultHistory>, PromptError> {
        Editor::with_config(self.config.clone()).map_err(|e| PromptError::Io(e.to_string()))
    }

    fn readline(&self, question: &str) -> Result<String, PromptError> {
        let mut editor = self.editor()?;
        match editor.readline(question) {
            Ok(line) => Ok(line),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(PromptError::Closed),
            Err(e) => Err(PromptError::Io(e.to_string())),
        }
    }

    fn print_colored(&self, color: Color, marker: &str, message: &str) {
        let mut stdout = io::stdout();
        let printed = execute!(
            stdout,
            SetForegroundColor(color),
            Print(marker),
            ResetColor,
            Print(message),
            Print("\n"),
        );
        if printed.is_err() {
            println!("{}{}", marker, message);
        }
    }

    /// Green check line for completed steps
    pub fn success(&self, message: &str) {
        self.print_colored(Color::Green, "✓ ", message);
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn say(&self, message: &str) {
        let mut stdout = io::stdout();
        let _ = writeln!(stdout, "{}", message);
        let _ = stdout.flush();
    }

    fn confirm(&self, question: &str) -> Result<bool, PromptError> {
        loop {
            let answer = self.readline(question)?;
            match parse_yes_no(&answer) {
                Some(answer) => return Ok(answer),
                None => self.print_colored(Color::Yellow, "", "Please answer y or n."),
            }
        }
    }

    fn read_line(&self, question: &str) -> Result<Option<String>, PromptError> {
        match self.readline(question) {
            Ok(line) => Ok(Some(line.trim().to_string())),
            Err(PromptError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
