//! Configuration directory resolution and tunables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the user config root.
const APP_DIR: &str = "teams-session";

/// Dotfile directory used on non-Windows platforms.
const DOT_DIR: &str = ".teams-session";

const SETTINGS_FILE: &str = "config.toml";

/// Tunables read from `config.toml` in the config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Refresh proactively when a token has fewer minutes left than this.
    pub refresh_threshold_minutes: i64,
    /// A session file older than this is reported as likely expired.
    pub session_max_age_hours: u64,
    /// Per-call timeout for token endpoint and authsvc requests.
    pub http_timeout_secs: u64,
    /// Retries for transport-level failures (never for HTTP error responses).
    pub http_max_retries: u32,
    /// External browser-automation program used as the slow refresh path.
    pub browser_command: Option<BrowserCommand>,
    pub browser_timeout_secs: u64,
}

/// Program and arguments for the browser collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_threshold_minutes: 10,
            session_max_age_hours: 12,
            http_timeout_secs: 30,
            http_max_retries: 2,
            browser_command: None,
            browser_timeout_secs: 120,
        }
    }
}

impl Settings {
    /// Load settings from `dir`, falling back to defaults when no file exists.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read settings file")?;
        toml::from_str(&content).context("Failed to parse settings file")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_secs)
    }

    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.refresh_threshold_minutes)
    }
}

/// User-specific directory holding the session and token cache files.
///
/// Never fails: if no home directory can be determined, a directory relative
/// to the working directory is used instead.
pub fn config_dir() -> PathBuf {
    resolve_config_dir(
        cfg!(windows),
        std::env::var_os("APPDATA"),
        home::home_dir(),
        || directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()),
    )
}

fn resolve_config_dir(
    windows: bool,
    appdata: Option<OsString>,
    home: Option<PathBuf>,
    platform_config: impl FnOnce() -> Option<PathBuf>,
) -> PathBuf {
    if windows {
        let roaming = appdata
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(platform_config);
        if let Some(root) = roaming {
            return root.join(APP_DIR);
        }
    } else if let Some(home) = home.filter(|h| !h.as_os_str().is_empty()) {
        return home.join(DOT_DIR);
    }

    tracing::warn!("Could not determine home directory, using working directory");
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DOT_DIR)
}

/// Location of pre-encryption session files: next to the executable.
pub fn legacy_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
