//! Resolved bearer tokens and the derived token cache summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before `expires_at` at which a token is already treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// A bearer token resolved for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token: String,
    /// Unix seconds; `None` when the issuer gave no expiry.
    pub expires_at: Option<i64>,
}

impl BearerToken {
    pub fn new(token: String, expires_at: Option<i64>) -> Self {
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now().timestamp() + EXPIRY_SKEW_SECS >= exp,
            None => false,
        }
    }

    /// True if the token expires within `window` from now.
    pub fn expires_within(&self, window: chrono::Duration) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now().timestamp() + window.num_seconds() >= exp,
            None => false,
        }
    }

    pub fn minutes_remaining(&self) -> Option<i64> {
        self.expires_at
            .map(|exp| (exp - Utc::now().timestamp()).max(0) / 60)
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// Fast-path cache of the Substrate token, persisted as `token-cache.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCacheSummary {
    pub substrate_token: String,
    pub substrate_token_expiry: i64,
    pub extracted_at: i64,
}

impl TokenCacheSummary {
    pub fn new(token: &BearerToken) -> Option<Self> {
        Some(Self {
            substrate_token: token.token.clone(),
            substrate_token_expiry: token.expires_at?,
            extracted_at: Utc::now().timestamp(),
        })
    }

    pub fn bearer(&self) -> BearerToken {
        BearerToken::new(
            self.substrate_token.clone(),
            Some(self.substrate_token_expiry),
        )
    }
}
