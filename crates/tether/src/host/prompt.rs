//! Interactive prompts shown to the host's operator.
//!
//! Commands like `deleteFile` and `createFile` suspend on a prompt. The
//! dispatcher only ever awaits these, so a slow answer never blocks other
//! commands.

use async_trait::async_trait;

#[async_trait]
pub trait UserPrompt: Send + Sync {
    /// Yes/no confirmation. `false` covers both decline and dismiss.
    async fn confirm(&self, message: &str) -> bool;

    /// Ask for a workspace-relative path. `None` when dismissed.
    async fn input_path(&self, message: &str) -> Option<String>;
}

/// Fixed answers. Used by headless hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPrompt {
    pub confirm: bool,
    pub path: Option<String>,
}

impl StaticPrompt {
    /// Confirms everything and dismisses path prompts.
    pub fn assume_yes() -> Self {
        Self {
            confirm: true,
            path: None,
        }
    }

    /// Declines everything.
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[async_trait]
impl UserPrompt for StaticPrompt {
    async fn confirm(&self, message: &str) -> bool {
        tracing::debug!(message, answer = self.confirm, "Static confirmation");
        self.confirm
    }

    async fn input_path(&self, message: &str) -> Option<String> {
        tracing::debug!(message, answer = ?self.path, "Static path input");
        self.path.clone()
    }
}
