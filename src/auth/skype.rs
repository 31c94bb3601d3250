//! Skype token exchange
//!
//! The chat-service aggregator access token is exchanged for a first-party
//! Skype token via the Teams authsvc endpoint. The Skype token is what the
//! chat APIs actually require.

use serde::Deserialize;

use crate::error::AuthError;
use crate::http::{HttpTransport, TransportError, TransportRequest};

/// Response from Teams authsvc token exchange
#[derive(Debug, Deserialize)]
pub struct AuthzResponse {
    pub tokens: Option<AuthzTokens>,
    #[serde(rename = "regionGtms")]
    pub region_gtms: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct AuthzTokens {
    #[serde(rename = "skypeToken")]
    pub skype_token: Option<String>,
    #[serde(rename = "expiresIn")]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SkypeGrant {
    pub skype_token: String,
    pub expires_in: Option<u64>,
    pub region_gtms: Option<serde_json::Value>,
}

/// Exchange an aggregator-scope access token for a Skype token.
pub async fn exchange_skype_token(
    transport: &dyn HttpTransport,
    authz_url: &str,
    aggregator_token: &str,
) -> Result<SkypeGrant, AuthError> {
    tracing::debug!("Exchanging aggregator token for Skype token at {}", authz_url);

    let req = TransportRequest::post(authz_url)
        .header("Authorization", format!("Bearer {}", aggregator_token))
        .header("Content-Length", "0");
    let resp = transport.request(req).await.map_err(|e| match e {
        TransportError::Timeout(m) => AuthError::Timeout(m),
        TransportError::Network(m) => AuthError::Network(m),
    })?;

    if !resp.is_success() {
        return Err(match resp.status {
            401 | 403 => AuthError::AuthExpired(format!(
                "Skype token exchange rejected (HTTP {})",
                resp.status
            )),
            status => AuthError::Unknown(format!(
                "Skype token exchange failed (HTTP {}): {}",
                status,
                resp.text()
            )),
        });
    }

    let authz: AuthzResponse = serde_json::from_slice(&resp.body)
        .map_err(|e| AuthError::Unknown(format!("Failed to parse authsvc response: {}", e)))?;

    let tokens = authz
        .tokens
        .ok_or_else(|| AuthError::Unknown("authsvc response missing 'tokens' field".into()))?;
    let skype_token = tokens
        .skype_token
        .ok_or_else(|| AuthError::Unknown("authsvc response missing 'skypeToken'".into()))?;

    Ok(SkypeGrant {
        skype_token,
        expires_in: tokens.expires_in,
        region_gtms: authz.region_gtms,
    })
}
