//! tether-host: serve a workspace to a tether UI over stdin/stdout.
//!
//! Frames on stdout, logs on stderr, prompts on the controlling terminal.

mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tether::{HostConfig, HostDispatcher, StaticPrompt, UserPrompt};

use crate::prompt::TerminalPrompt;

#[derive(Parser, Debug)]
#[command(name = "tether-host", version)]
#[command(about = "Answer tether bridge requests against a local workspace")]
struct Args {
    /// Workspace folder to serve. Omit to start with no workspace open
    #[arg(short, long, env = "TETHER_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Glob excluded from the file tree (repeatable, replaces the defaults)
    #[arg(long = "ignore", value_name = "GLOB")]
    ignore: Vec<String>,

    /// Name reported as the operator identity
    #[arg(long, env = "TETHER_USER_NAME")]
    user_name: Option<String>,

    /// Email reported as the operator identity
    #[arg(long, env = "TETHER_USER_EMAIL")]
    user_email: Option<String>,

    /// Confirm every deletion without asking. Path prompts are dismissed
    #[arg(long)]
    assume_yes: bool,
}

impl Args {
    fn host_config(&self) -> HostConfig {
        let mut config =
            HostConfig::new().with_host_label(format!("tether-host {}", env!("CARGO_PKG_VERSION")));
        if let Some(root) = &self.workspace {
            config = config.with_workspace_root(root);
        }
        if !self.ignore.is_empty() {
            config = config.with_ignore_patterns(self.ignore.iter().cloned());
        }
        if let Some(name) = &self.user_name {
            config.identity.name = name.clone();
        }
        if let Some(email) = &self.user_email {
            config.identity.email = Some(email.clone());
        }
        config
    }
}

/// Filter used when `RUST_LOG` is unset. `level` comes from `TETHER_LOG`.
fn default_filter(level: Option<&str>) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("tether={level},tether_host={level}")
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_filter(std::env::var("TETHER_LOG").ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let prompt: Arc<dyn UserPrompt> = if args.assume_yes {
        Arc::new(StaticPrompt::assume_yes())
    } else {
        Arc::new(TerminalPrompt::new())
    };

    let dispatcher = HostDispatcher::from_config(args.host_config(), prompt)
        .await
        .context("failed to start host")?;

    let (endpoint, writer) = tether::stdio();
    dispatcher.run(endpoint).await;
    writer.await.context("stdout writer task failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "tether-host",
            "--workspace",
            "/srv/project",
            "--ignore",
            "*.log",
            "--ignore",
            "dist",
            "--user-name",
            "dev",
            "--user-email",
            "dev@example.com",
            "--assume-yes",
        ])
        .unwrap();

        let config = args.host_config();
        assert_eq!(config.workspace_root, Some(PathBuf::from("/srv/project")));
        assert_eq!(config.ignore_patterns, vec!["*.log".to_string(), "dist".to_string()]);
        assert_eq!(config.identity.name, "dev");
        assert_eq!(config.identity.email.as_deref(), Some("dev@example.com"));
        assert!(args.assume_yes);
        assert!(config.host_label.unwrap().starts_with("tether-host "));
    }

    #[test]
    fn defaults_keep_builtin_ignores() {
        let args = Args::try_parse_from(["tether-host"]).unwrap();
        let config = args.host_config();
        assert!(config.ignore_patterns.iter().any(|p| p == ".git"));
        assert!(!args.assume_yes);
    }

    #[test]
    fn filter_from_log_level() {
        assert_eq!(default_filter(None), "tether=info,tether_host=info");
        assert_eq!(default_filter(Some("debug")), "tether=debug,tether_host=debug");
        assert_eq!(default_filter(Some("warning")), "tether=warn,tether_host=warn");
        assert_eq!(default_filter(Some("bogus")), "tether=info,tether_host=info");
    }
}
