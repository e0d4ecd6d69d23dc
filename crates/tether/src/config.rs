//! Configuration for the client bridge and the host dispatcher.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::protocol::{CreateFile, DeleteFile, HostCommand, Identity};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a request made with no host attached waits before failing.
pub const DEFAULT_NO_HOST_DELAY: Duration = Duration::from_millis(10);

/// Paths never reported in the file tree.
pub const DEFAULT_IGNORE_PATTERNS: [&str; 4] = [".git", "node_modules", "target", ".DS_Store"];

/// Commands that park on a host-side prompt. They wait on the user, so by
/// default they carry no deadline.
pub const INTERACTIVE_COMMANDS: [&str; 2] = [DeleteFile::NAME, CreateFile::NAME];

/// UI-side settings for [`crate::ClientBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for a host-attached request. `None` waits forever.
    ///
    /// Commands listed in `command_timeouts` use their own entry instead.
    pub request_timeout: Option<Duration>,
    /// Per-command deadline overrides, keyed by command name. An entry of
    /// `None` disables the deadline for that command.
    pub command_timeouts: HashMap<String, Option<Duration>>,
    pub no_host_delay: Duration,
    /// Post a `$/cancel` notice to the host when a request times out.
    pub send_cancel_notice: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: parse_timeout_ms(std::env::var("TETHER_REQUEST_TIMEOUT_MS").ok()),
            command_timeouts: INTERACTIVE_COMMANDS
                .iter()
                .map(|name| (name.to_string(), None))
                .collect(),
            no_host_delay: DEFAULT_NO_HOST_DELAY,
            send_cancel_notice: true,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the deadline for one command. `None` waits forever.
    pub fn with_command_timeout(
        mut self,
        command: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        self.command_timeouts.insert(command.into(), timeout);
        self
    }

    /// Deadline applied to a request for `command`.
    pub fn timeout_for(&self, command: &str) -> Option<Duration> {
        match self.command_timeouts.get(command) {
            Some(timeout) => *timeout,
            None => self.request_timeout,
        }
    }

    pub fn with_no_host_delay(mut self, delay: Duration) -> Self {
        self.no_host_delay = delay;
        self
    }

    pub fn with_cancel_notice(mut self, enabled: bool) -> Self {
        self.send_cancel_notice = enabled;
        self
    }
}

/// `0` disables the deadline; unset or unparsable keeps the default.
fn parse_timeout_ms(raw: Option<String>) -> Option<Duration> {
    match raw.as_deref().map(str::trim).map(str::parse::<u64>) {
        Some(Ok(0)) => None,
        Some(Ok(ms)) => Some(Duration::from_millis(ms)),
        Some(Err(_)) => {
            tracing::warn!("Ignoring unparsable TETHER_REQUEST_TIMEOUT_MS");
            Some(DEFAULT_REQUEST_TIMEOUT)
        }
        None => Some(DEFAULT_REQUEST_TIMEOUT),
    }
}

/// Startup settings for [`crate::HostDispatcher::from_config`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Workspace opened at startup. `None` starts the host with no workspace.
    pub workspace_root: Option<PathBuf>,
    /// Glob patterns matched against each path component and the full
    /// relative path.
    pub ignore_patterns: Vec<String>,
    pub identity: Identity,
    /// Embedding application label reported in `hostVersion`.
    pub host_label: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            identity: identity_from_env(),
            host_label: None,
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_host_label(mut self, label: impl Into<String>) -> Self {
        self.host_label = Some(label.into());
        self
    }
}

fn identity_from_env() -> Identity {
    let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    Identity {
        name: non_empty("TETHER_USER_NAME")
            .or_else(|| non_empty("USER"))
            .or_else(|| non_empty("USERNAME"))
            .unwrap_or_else(|| "unknown".to_string()),
        email: non_empty("TETHER_USER_EMAIL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_env_parsing() {
        assert_eq!(parse_timeout_ms(None), Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(parse_timeout_ms(Some("0".into())), None);
        assert_eq!(
            parse_timeout_ms(Some(" 250 ".into())),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_timeout_ms(Some("soon".into())),
            Some(DEFAULT_REQUEST_TIMEOUT)
        );
    }

    #[test]
    fn bridge_config_builder() {
        let config = BridgeConfig::new()
            .with_request_timeout(None)
            .with_no_host_delay(Duration::from_millis(1))
            .with_cancel_notice(false);
        assert!(config.request_timeout.is_none());
        assert_eq!(config.no_host_delay, Duration::from_millis(1));
        assert!(!config.send_cancel_notice);
    }

    #[test]
    fn interactive_commands_have_no_default_deadline() {
        let config = BridgeConfig::new().with_request_timeout(Some(Duration::from_secs(5)));
        assert_eq!(config.timeout_for("deleteFile"), None);
        assert_eq!(config.timeout_for("createFile"), None);
        assert_eq!(
            config.timeout_for("getFileContent"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.timeout_for("notACommand"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn command_timeout_overrides() {
        let config = BridgeConfig::new()
            .with_request_timeout(None)
            .with_command_timeout("createFile", Some(Duration::from_secs(120)))
            .with_command_timeout("getInitialData", Some(Duration::from_secs(2)));
        assert_eq!(
            config.timeout_for("createFile"),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            config.timeout_for("getInitialData"),
            Some(Duration::from_secs(2))
        );
        assert_eq!(config.timeout_for("deleteFile"), None);
        assert_eq!(config.timeout_for("getFileContent"), None);
    }

    #[test]
    fn host_config_defaults() {
        let config = HostConfig::default();
        assert!(config.workspace_root.is_none());
        assert_eq!(config.ignore_patterns, DEFAULT_IGNORE_PATTERNS);
        assert!(!config.identity.name.is_empty());
    }

    #[test]
    fn host_config_builder() {
        let config = HostConfig::new()
            .with_workspace_root("/srv/project")
            .with_ignore_patterns(["*.log"])
            .with_identity(Identity {
                name: "dev".into(),
                email: None,
            })
            .with_host_label("embedded");
        assert_eq!(config.workspace_root, Some(PathBuf::from("/srv/project")));
        assert_eq!(config.ignore_patterns, vec!["*.log".to_string()]);
        assert_eq!(config.identity.name, "dev");
        assert_eq!(config.host_label.as_deref(), Some("embedded"));
    }
}
