//! Prompts on the controlling terminal.
//!
//! stdin/stdout carry frames, so questions go to `/dev/tty` instead. With no
//! terminal attached every prompt counts as dismissed.

use std::io::{BufRead, BufReader, Write};

use async_trait::async_trait;
use tether::UserPrompt;

const TTY_PATH: &str = "/dev/tty";

#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }

    async fn ask(&self, question: String) -> Option<String> {
        let answer = tokio::task::spawn_blocking(move || ask_blocking(&question)).await;
        match answer {
            Ok(Ok(line)) => Some(line),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Terminal prompt unavailable, treating as dismissed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Terminal prompt task failed");
                None
            }
        }
    }
}

fn ask_blocking(question: &str) -> std::io::Result<String> {
    let mut tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(TTY_PATH)?;
    write!(tty, "{question} ")?;
    tty.flush()?;

    let mut line = String::new();
    BufReader::new(tty).read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// `y`/`yes` in any case confirms; anything else declines.
fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl UserPrompt for TerminalPrompt {
    async fn confirm(&self, message: &str) -> bool {
        self.ask(format!("{message} [y/N]"))
            .await
            .is_some_and(|answer| is_affirmative(&answer))
    }

    async fn input_path(&self, message: &str) -> Option<String> {
        self.ask(format!("{message}:"))
            .await
            .filter(|answer| !answer.is_empty())
    }
}
