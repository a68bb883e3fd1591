//! Scripted operator for E2E tests

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use dns01_core::{parse_yes_no, PromptError, Prompter};

/// Answers questions from a script and keeps a transcript
///
/// When the script runs out the input counts as closed.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            transcript: Mutex::new(Vec::new()),
        })
    }

    /// Everything said and asked, in order
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    /// Whether any line of the transcript contains `needle`
    pub fn saw(&self, needle: &str) -> bool {
        self.transcript.lock().iter().any(|line| line.contains(needle))
    }

    /// Answers not consumed
    pub fn remaining(&self) -> usize {
        self.answers.lock().len()
    }

    fn next_answer(&self, question: &str) -> Option<String> {
        self.transcript.lock().push(question.to_string());
        self.answers.lock().pop_front()
    }
}

impl Prompter for ScriptedPrompter {
    fn say(&self, message: &str) {
        tracing::debug!("Prompter: {}", message);
        self.transcript.lock().push(message.to_string());
    }

    fn confirm(&self, question: &str) -> Result<bool, PromptError> {
        let answer = self.next_answer(question).ok_or(PromptError::Closed)?;
        parse_yes_no(&answer)
            .ok_or_else(|| PromptError::Io(format!("not a yes/no answer: {}", answer)))
    }

    fn read_line(&self, question: &str) -> Result<Option<String>, PromptError> {
        Ok(self.next_answer(question))
    }
}
