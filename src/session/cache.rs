//! MSAL cache records stored as JSON strings in browser localStorage.
//!
//! Entries are decoded at the boundary into [`CacheRecord`]; anything that is
//! not a recognised credential shape decodes to `None` so a scan over
//! thousands of unrelated entries never fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum CacheRecord {
    RefreshToken(RefreshTokenRecord),
    AccessToken(AccessTokenRecord),
}

impl CacheRecord {
    /// Decode a raw localStorage value. Fails closed.
    pub fn decode(raw: &str) -> Option<Self> {
        // Cheap pre-filter: most entries are not credentials at all.
        if !raw.contains("credentialType") {
            return None;
        }
        let value: Value = serde_json::from_str(raw).ok()?;
        match value.get("credentialType")?.as_str()? {
            "RefreshToken" => serde_json::from_value(value)
                .ok()
                .map(CacheRecord::RefreshToken),
            "AccessToken" => serde_json::from_value(value)
                .ok()
                .map(CacheRecord::AccessToken),
            _ => None,
        }
    }

    /// Composite localStorage key derived from the record's identity fields.
    pub fn cache_key(&self) -> String {
        match self {
            CacheRecord::RefreshToken(r) => r.cache_key(),
            CacheRecord::AccessToken(r) => r.cache_key(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        match self {
            CacheRecord::RefreshToken(r) => serde_json::to_string(r),
            CacheRecord::AccessToken(r) => serde_json::to_string(r),
        }
    }
}

/// Rotating refresh token for one account/client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub secret: String,
    #[serde(default, with = "epoch::option", skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<i64>,
    #[serde(default, with = "epoch::option", skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<i64>,
    /// Fields we do not interpret (`credentialType`, `familyId`, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RefreshTokenRecord {
    pub fn cache_key(&self) -> String {
        let family = self
            .extra
            .get("familyId")
            .and_then(Value::as_str)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.client_id);
        [
            self.home_account_id.as_str(),
            self.environment.as_str(),
            "refreshtoken",
            family,
            "",
            "",
        ]
        .join("-")
        .to_lowercase()
    }

    /// Install a rotated secret.
    pub fn rotate(&mut self, secret: String) {
        self.secret = secret;
        self.last_updated_at = Some(Utc::now().timestamp());
    }
}

/// Access token for one `(client_id, realm, target)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRecord {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    /// Tenant id.
    pub realm: String,
    /// Space-separated scopes; identifies the resource.
    pub target: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub secret: String,
    #[serde(with = "epoch")]
    pub expires_on: i64,
    #[serde(default, with = "epoch::option", skip_serializing_if = "Option::is_none")]
    pub extended_expires_on: Option<i64>,
    #[serde(default, with = "epoch::option", skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn bearer() -> String {
    "Bearer".to_string()
}

impl AccessTokenRecord {
    pub fn cache_key(&self) -> String {
        [
            self.home_account_id.as_str(),
            self.environment.as_str(),
            "accesstoken",
            self.client_id.as_str(),
            self.realm.as_str(),
            self.target.as_str(),
        ]
        .join("-")
        .to_lowercase()
    }

    /// Replace the secret and expiry after a refresh. Identity fields are untouched,
    /// so the record's cache key is unchanged.
    pub fn renew(&mut self, secret: String, expires_on: i64) {
        self.secret = secret;
        self.expires_on = expires_on;
        self.extended_expires_on = Some(expires_on);
        self.cached_at = Some(Utc::now().timestamp());
    }
}

/// MSAL writes epoch seconds as strings; older caches used numbers.
mod epoch {
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        d.deserialize_any(EpochVisitor)
    }

    struct EpochVisitor;

    impl<'de> de::Visitor<'de> for EpochVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("epoch seconds as a string or integer")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            Ok(v as i64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim().parse().map_err(E::custom)
        }
    }

    pub mod option {
        use serde::{de, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::serialize(v, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
            d.deserialize_option(OptionalEpochVisitor)
        }

        /// `null` is an absent timestamp, not a malformed record.
        struct OptionalEpochVisitor;

        impl<'de> de::Visitor<'de> for OptionalEpochVisitor {
            type Value = Option<i64>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("null or epoch seconds as a string or integer")
            }

            fn visit_none<E: de::Error>(self) -> Result<Option<i64>, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Option<i64>, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Option<i64>, D::Error> {
                super::deserialize(d).map(Some)
            }
        }
    }
}
