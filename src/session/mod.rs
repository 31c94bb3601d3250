//! Persisted browser session (Playwright-style storage state)
//!
//! Cookies plus per-origin localStorage partitions. MSAL keeps its token
//! cache in localStorage, so the session document is also the token store.

pub mod cache;

use serde::{Deserialize, Serialize};

pub use cache::{AccessTokenRecord, CacheRecord, RefreshTokenRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<Origin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Unix seconds; `-1` marks a session cookie.
    #[serde(default = "session_cookie")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "lax")]
    pub same_site: String,
}

fn root_path() -> String {
    "/".to_string()
}

fn session_cookie() -> f64 {
    -1.0
}

fn lax() -> String {
    "Lax".to_string()
}

impl Cookie {
    pub fn expires_at(&self) -> Option<i64> {
        (self.expires > 0.0).then_some(self.expires as i64)
    }
}

/// One browser-storage partition keyed by origin URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub origin: String,
    #[serde(rename = "localStorage", default)]
    pub entries: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// Position of an entry inside the document, stable until the next mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub origin: usize,
    pub entry: usize,
}

impl SessionDocument {
    /// All cookies with this name, across every domain.
    pub fn cookies_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Cookie> + 'a {
        self.cookies.iter().filter(move |c| c.name == name)
    }

    /// Set `value` (and expiry) on every cookie called `name`. Returns how many changed.
    pub fn set_cookie_value(&mut self, name: &str, value: &str, expires: Option<i64>) -> usize {
        let mut updated = 0;
        for cookie in self.cookies.iter_mut().filter(|c| c.name == name) {
            cookie.value = value.to_string();
            if let Some(exp) = expires {
                cookie.expires = exp as f64;
            }
            updated += 1;
        }
        updated
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryLocation, &Origin, &StorageEntry)> {
        self.origins.iter().enumerate().flat_map(|(oi, origin)| {
            origin.entries.iter().enumerate().map(move |(ei, entry)| {
                (
                    EntryLocation {
                        origin: oi,
                        entry: ei,
                    },
                    origin,
                    entry,
                )
            })
        })
    }

    /// Every decodable MSAL credential in every origin.
    pub fn cache_records(&self) -> impl Iterator<Item = (EntryLocation, CacheRecord)> + '_ {
        self.entries()
            .filter_map(|(loc, _, entry)| CacheRecord::decode(&entry.value).map(|r| (loc, r)))
    }

    pub fn entry(&self, loc: EntryLocation) -> Option<&StorageEntry> {
        self.origins.get(loc.origin)?.entries.get(loc.entry)
    }

    /// Rewrite the record at `loc` in place, keeping its storage key.
    ///
    /// Returns `false` (and leaves the entry alone) if `loc` is gone or the
    /// new record's identity fields no longer match the stored record's.
    pub fn replace_record(&mut self, loc: EntryLocation, record: &CacheRecord) -> serde_json::Result<bool> {
        let Some(current) = self.entry(loc) else {
            return Ok(false);
        };
        if let Some(existing) = CacheRecord::decode(&current.value) {
            if existing.cache_key() != record.cache_key() {
                tracing::warn!("Refusing to rewrite {}: cache key would change", current.name);
                return Ok(false);
            }
        }

        let encoded = record.encode()?;
        if let Some(entry) = self
            .origins
            .get_mut(loc.origin)
            .and_then(|o| o.entries.get_mut(loc.entry))
        {
            entry.value = encoded;
        }
        Ok(true)
    }
}
