//! Browser-automation collaborator
//!
//! Interactive sign-in and the slow refresh path are delegated to an
//! external program that drives a real browser against the persisted
//! session and writes the updated session back through the same files.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use crate::config::BrowserCommand;

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Make sure the persisted session is authenticated.
    ///
    /// `show_overlay` makes the browser visible for an interactive login;
    /// `fail_fast` asks it to give up instead of waiting for user input.
    /// On success the collaborator must have rewritten the session file.
    async fn ensure_authenticated(&self, show_overlay: bool, fail_fast: bool) -> Result<()>;
}

/// Runs the configured browser program as a child process.
///
/// Invocation: `<program> <args...> [--headless|--show-overlay] [--fail-fast]`
/// with `TEAMS_SESSION_DIR` set to the session directory. Exit status 0 means
/// success. The child is killed if it outlives `timeout` or if the future is
/// dropped.
pub struct CommandBrowser {
    command: BrowserCommand,
    session_dir: std::path::PathBuf,
    timeout: Duration,
}

impl CommandBrowser {
    pub fn new(command: BrowserCommand, session_dir: std::path::PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            session_dir,
            timeout,
        }
    }

    fn build(&self, show_overlay: bool, fail_fast: bool) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg(if show_overlay { "--show-overlay" } else { "--headless" })
            .env("TEAMS_SESSION_DIR", &self.session_dir)
            .kill_on_drop(true);
        if fail_fast {
            cmd.arg("--fail-fast");
        }
        cmd
    }
}

#[async_trait]
impl BrowserSession for CommandBrowser {
    async fn ensure_authenticated(&self, show_overlay: bool, fail_fast: bool) -> Result<()> {
        tracing::info!(
            "Launching browser ({})",
            if show_overlay { "interactive" } else { "headless" }
        );

        let mut child = self
            .build(show_overlay, fail_fast)
            .spawn()
            .with_context(|| format!("Failed to launch {}", self.command.program))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.context("Failed to wait for browser process")?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed-out browser process: {}", e);
                }
                bail!("Browser did not finish within {}s", self.timeout.as_secs());
            }
        };

        if !status.success() {
            bail!("Browser exited with {}", status);
        }
        Ok(())
    }
}

/// Used when no browser program is configured.
pub struct NoBrowser;

#[async_trait]
impl BrowserSession for NoBrowser {
    async fn ensure_authenticated(&self, _show_overlay: bool, _fail_fast: bool) -> Result<()> {
        bail!("no browser_command configured in config.toml")
    }
}
