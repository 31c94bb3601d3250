//! Identity claims decoded from session JWTs
//!
//! The tokens come from our own browser session, so the payload is read
//! without signature verification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Signed-in user as seen by the token issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub object_id: String,
    pub tenant_id: Option<String>,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
}

impl UserIdentity {
    /// Build from decoded claims. `None` if no object id can be found.
    pub fn from_claims(claims: &Value) -> Option<Self> {
        let str_claim = |key: &str| {
            claims
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        // Skype tokens carry `skypeid` as "orgid:<oid>" instead of `oid`.
        let object_id = str_claim("oid").or_else(|| {
            str_claim("skypeid").map(|id| id.strip_prefix("orgid:").unwrap_or(&id).to_string())
        })?;

        let display_name = str_claim("name");
        let (parsed_given, parsed_surname) = display_name
            .as_deref()
            .map(split_display_name)
            .unwrap_or((None, None));

        Some(Self {
            object_id,
            tenant_id: str_claim("tid"),
            given_name: str_claim("given_name").or(parsed_given),
            surname: str_claim("family_name").or(parsed_surname),
            email: str_claim("upn")
                .or_else(|| str_claim("preferred_username"))
                .or_else(|| str_claim("unique_name"))
                .or_else(|| str_claim("email")),
            display_name,
        })
    }

    pub fn from_jwt(token: &str) -> Option<Self> {
        Self::from_claims(&decode_jwt_payload(token)?)
    }
}

/// Decode the payload segment of a JWT.
pub fn decode_jwt_payload(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `exp` claim of a JWT, in unix seconds.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    decode_jwt_payload(token)?.get("exp")?.as_i64()
}

/// Split "Surname, Given" or "Given Surname" into (given, surname).
pub fn split_display_name(name: &str) -> (Option<String>, Option<String>) {
    let name = name.trim();
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    if let Some((surname, given)) = name.split_once(',') {
        return (non_empty(given), non_empty(surname));
    }
    match name.split_once(char::is_whitespace) {
        Some((given, surname)) => (non_empty(given), non_empty(surname)),
        None => (non_empty(name), None),
    }
}
