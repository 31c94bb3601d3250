//! Encrypted, owner-only persistence of the session and token cache documents
//!
//! Reads never fail: a missing, corrupt or foreign-machine file is reported as
//! absent, which callers treat exactly like "never logged in".

pub mod crypto;
mod migrate;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, SystemTime};

use crate::auth::TokenCacheSummary;
use crate::session::SessionDocument;
use crypto::{is_encrypted_shape, Cipher, EncryptedBlob};

pub const SESSION_STATE_FILE: &str = "session-state.json";
pub const TOKEN_CACHE_FILE: &str = "token-cache.json";

const DOCUMENTS: [&str; 2] = [SESSION_STATE_FILE, TOKEN_CACHE_FILE];

pub struct SecureStore {
    dir: PathBuf,
    legacy_dir: Option<PathBuf>,
    cipher: Cipher,
    migration: Once,
}

impl SecureStore {
    pub fn new(dir: PathBuf, legacy_dir: Option<PathBuf>, cipher: Cipher) -> Self {
        Self {
            dir,
            legacy_dir,
            cipher,
            migration: Once::new(),
        }
    }

    /// Store in the user's config directory, keyed to this machine.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(
            crate::config::config_dir(),
            crate::config::legacy_dir(),
            Cipher::for_machine()?,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_STATE_FILE)
    }

    pub fn token_cache_path(&self) -> PathBuf {
        self.dir.join(TOKEN_CACHE_FILE)
    }

    pub fn read_session(&self) -> Option<SessionDocument> {
        self.read_document(SESSION_STATE_FILE)
    }

    /// Persist the session. The derived token cache is dropped with it.
    pub fn write_session(&self, doc: &SessionDocument) -> Result<()> {
        self.write_document(SESSION_STATE_FILE, doc)?;
        self.clear_token_cache();
        Ok(())
    }

    pub fn has_session(&self) -> bool {
        self.ensure_migrated();
        self.session_path().is_file()
    }

    pub fn read_token_cache(&self) -> Option<TokenCacheSummary> {
        self.read_document(TOKEN_CACHE_FILE)
    }

    pub fn write_token_cache(&self, summary: &TokenCacheSummary) -> Result<()> {
        self.write_document(TOKEN_CACHE_FILE, summary)
    }

    pub fn clear_token_cache(&self) {
        remove_if_exists(&self.token_cache_path());
    }

    /// Logout: remove both documents.
    pub fn clear_session(&self) {
        remove_if_exists(&self.session_path());
        self.clear_token_cache();
    }

    /// Time since the session file was last written.
    pub fn session_age(&self) -> Option<Duration> {
        self.ensure_migrated();
        let modified = fs::metadata(self.session_path()).ok()?.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    /// True when the session is older than `max_age_hours`, or missing.
    pub fn is_session_likely_expired(&self, max_age_hours: u64) -> bool {
        match self.session_age() {
            Some(age) => age > Duration::from_secs(max_age_hours.saturating_mul(3600)),
            None => true,
        }
    }

    fn ensure_migrated(&self) {
        self.migration.call_once(|| {
            let Some(legacy) = self.legacy_dir.as_deref() else {
                return;
            };
            if let Err(e) = ensure_private_dir(&self.dir) {
                tracing::warn!("Skipping legacy migration: {:#}", e);
                return;
            }
            migrate::migrate_legacy_files(legacy, &self.dir, &DOCUMENTS);
        });
    }

    fn read_document<T: DeserializeOwned + Serialize>(&self, name: &str) -> Option<T> {
        self.ensure_migrated();
        let path = self.dir.join(name);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Ignoring unparseable {}: {}", path.display(), e);
                return None;
            }
        };

        if is_encrypted_shape(&value) {
            let blob: EncryptedBlob = serde_json::from_value(value).ok()?;
            let plaintext = match self.cipher.decrypt(&blob) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        "Could not decrypt {} ({}); treating as not authenticated",
                        path.display(),
                        e
                    );
                    return None;
                }
            };
            return match serde_json::from_str(&plaintext) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    tracing::warn!("Decrypted {} has unexpected shape: {}", path.display(), e);
                    None
                }
            };
        }

        // Legacy plaintext: upgrade in place, then serve it.
        let doc: T = match serde_json::from_value(value) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                return None;
            }
        };
        match self.write_document(name, &doc) {
            Ok(()) => tracing::info!("Encrypted legacy plaintext {}", path.display()),
            Err(e) => tracing::warn!("Failed to encrypt legacy {}: {:#}", path.display(), e),
        }
        Some(doc)
    }

    fn write_document<T: Serialize>(&self, name: &str, doc: &T) -> Result<()> {
        ensure_private_dir(&self.dir)?;

        let plaintext = serde_json::to_string(doc).context("Failed to serialize document")?;
        let blob = self.cipher.encrypt(&plaintext)?;
        let content = serde_json::to_string_pretty(&blob).context("Failed to serialize envelope")?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        write_private_file(&tmp, content.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Create `dir` if needed and restrict it to the owner.
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .context("Failed to set config directory permissions")?;
    }

    Ok(())
}

pub(crate) fn set_private_file(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn write_private_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    set_private_file(path)
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
