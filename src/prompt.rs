//! Interactive questions for `search` and `snowball`.

use crate::error::{Result, SokError};
use std::collections::VecDeque;
use std::io::{BufRead, Write};

/// Source of operator answers
pub trait Prompter {
    /// Show `question` and return the answer, trimmed and lower-cased.
    ///
    /// End of input aborts the running command.
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Reads answers from stdin
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{question} ")?;
        stdout.flush()?;

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(SokError::Aborted);
        }
        Ok(line.trim().to_lowercase())
    }
}

/// Replays canned answers and records the questions asked
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub questions: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            questions: Vec::new(),
        }
    }

    /// Answers not consumed yet
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .map(|answer| answer.trim().to_lowercase())
            .ok_or(SokError::Aborted)
    }
}
