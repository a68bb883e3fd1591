//! Operator interaction

use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

#[derive(Debug, Error)]
pub enum PromptError {
    /// Input ended (EOF or interrupt) before an answer was given
    #[error("input closed")]
    Closed,

    #[error("terminal error: {0}")]
    Io(String),
}

/// Line-oriented conversation with the operator
///
/// Implementations decide how text is styled; callers only pass content.
pub trait Prompter: Send + Sync {
    /// Show a line of output
    fn say(&self, message: &str);

    /// Ask a yes/no question
    fn confirm(&self, question: &str) -> Result<bool, PromptError>;

    /// Ask for a line of text; `None` when the input was closed
    fn read_line(&self, question: &str) -> Result<Option<String>, PromptError>;
}

/// Interpret a free-form answer to a yes/no question
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Run a blocking [`Prompter`] call from async code
///
/// On a multi-threaded runtime the worker's other tasks move to another
/// thread while `f` waits for the operator. Elsewhere `f` runs inline.
pub fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("y"), Some(true));
        assert_eq!(parse_yes_no(" YES "), Some(true));
        assert_eq!(parse_yes_no("No"), Some(false));
        assert_eq!(parse_yes_no(""), None);
        assert_eq!(parse_yes_no("maybe"), None);
    }

    #[test]
    fn test_blocking_outside_runtime() {
        assert_eq!(blocking(|| 7), 7);
    }

    #[tokio::test]
    async fn test_blocking_on_current_thread_runs_inline() {
        assert_eq!(blocking(|| "answer"), "answer");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocking_keeps_other_tasks_running() {
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = tokio::spawn(async move {
            // Only completes if the lone worker is free to run the sender
            let sender = tokio::spawn(async move { tx.send(42).unwrap() });
            let received = blocking(|| rx.recv_timeout(Duration::from_secs(5)));
            sender.await.unwrap();
            received
        });
        assert_eq!(waiter.await.unwrap(), Ok(42));
    }
}
