//! Operator interaction
//!
//! Interactive issuance and operator-driven plugins (manual DNS) talk to the
//! operator through [`Console`]. The terminal implementation uses
//! `dialoguer`; unattended runs use [`NonInteractive`], which refuses to
//! prompt.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password};

pub trait Console: Send + Sync {
    /// Show a line of text
    fn show(&self, message: &str);

    /// Ask for a line of input
    fn prompt(&self, question: &str) -> io::Result<String>;

    /// Ask for a secret without echoing it
    fn prompt_secret(&self, question: &str) -> io::Result<String>;

    /// Ask a yes/no question
    fn confirm(&self, question: &str, default: bool) -> io::Result<bool>;

    /// Whether prompts can be answered
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Terminal console
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn show(&self, message: &str) {
        println!("{}", message);
    }

    fn prompt(&self, question: &str) -> io::Result<String> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()
            .map_err(io::Error::other)
    }

    fn prompt_secret(&self, question: &str) -> io::Result<String> {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .allow_empty_password(true)
            .interact()
            .map_err(io::Error::other)
    }

    fn confirm(&self, question: &str, default: bool) -> io::Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(default)
            .interact()
            .map_err(io::Error::other)
    }
}

/// Console for unattended runs: output goes to the log, prompts fail
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl Console for NonInteractive {
    fn show(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn prompt(&self, question: &str) -> io::Result<String> {
        Err(refused(question))
    }

    fn prompt_secret(&self, question: &str) -> io::Result<String> {
        Err(refused(question))
    }

    fn confirm(&self, question: &str, _default: bool) -> io::Result<bool> {
        Err(refused(question))
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

fn refused(question: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot ask '{}' in unattended mode", question),
    )
}

/// Console answering from a fixed list of replies
///
/// Confirmations accept `y`/`yes`/`n`/`no`; an empty reply takes the
/// default. Everything shown is kept for inspection.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Messages and questions seen so far
    pub fn transcript(&self) -> Vec<String> {
        self.transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn record(&self, line: String) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(line);
        }
    }

    fn next_answer(&self, question: &str) -> io::Result<String> {
        self.record(format!("? {}", question));
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("no scripted answer for '{}'", question),
                )
            })
    }
}

impl Console for ScriptedConsole {
    fn show(&self, message: &str) {
        self.record(message.to_string());
    }

    fn prompt(&self, question: &str) -> io::Result<String> {
        self.next_answer(question)
    }

    fn prompt_secret(&self, question: &str) -> io::Result<String> {
        self.next_answer(question)
    }

    fn confirm(&self, question: &str, default: bool) -> io::Result<bool> {
        let answer = self.next_answer(question)?;
        match answer.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "y" | "yes" => Ok(true),
            "n" | "no" => Ok(false),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a yes/no answer", other),
            )),
        }
    }
}
