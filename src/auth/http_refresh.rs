//! Fast refresh path: refresh-token grant per tracked resource
//!
//! Every tracked resource with an access token in the session is refreshed
//! independently and concurrently against the AAD token endpoint. Failures
//! are collected per scope; the batch succeeds if at least one scope did.
//! The Skype token is exchanged afterwards from the aggregator token.

use chrono::Utc;
use futures::future::join_all;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType};
use oauth2::{AuthUrl, ClientId, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl};
use std::sync::Arc;

use super::extract::{best_access_token, refresh_token_record, valid_access_token};
use super::identity::jwt_expiry;
use super::skype::exchange_skype_token;
use super::{AuthConfig, Resource, SKYPE_TOKEN_COOKIE};
use crate::error::{AuthError, ErrorKind};
use crate::http::{HttpTransport, TransportError, TransportRequest};
use crate::session::{AccessTokenRecord, CacheRecord};
use crate::storage::SecureStore;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// New access token from one refresh-token grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_on: i64,
    /// Rotated refresh token, if the endpoint returned one.
    pub refresh_token: Option<String>,
}

/// What one HTTP refresh pass did.
#[derive(Debug, Clone, Default)]
pub struct HttpRefreshReport {
    pub tokens_refreshed: usize,
    pub tokens_attempted: usize,
    pub refresh_token_rotated: bool,
    pub skype_token_refreshed: bool,
    pub failures: Vec<(Resource, ErrorKind)>,
}

pub struct HttpRefresh {
    transport: Arc<dyn HttpTransport>,
    config: AuthConfig,
}

impl HttpRefresh {
    pub fn new(transport: Arc<dyn HttpTransport>, config: AuthConfig) -> Self {
        Self { transport, config }
    }

    /// Refresh every tracked resource and persist the session.
    pub async fn run(&self, store: &SecureStore) -> Result<HttpRefreshReport, AuthError> {
        let mut doc = store
            .read_session()
            .ok_or_else(|| AuthError::AuthRequired("no saved session".to_string()))?;
        let (rt_loc, mut rt) = refresh_token_record(&doc)
            .ok_or_else(|| AuthError::AuthRequired("session holds no refresh token".to_string()))?;

        let targets: Vec<_> = Resource::TRACKED
            .into_iter()
            .filter_map(|r| best_access_token(&doc, r).map(|(loc, at)| (r, loc, at)))
            .collect();
        if targets.is_empty() {
            return Err(AuthError::AuthRequired(
                "session holds no access tokens to refresh".to_string(),
            ));
        }

        tracing::info!("Refreshing {} token scope(s) over HTTP", targets.len());
        let grants = join_all(
            targets
                .iter()
                .map(|(_, _, at)| self.exchange_refresh_token(&rt.secret, at)),
        )
        .await;

        let mut report = HttpRefreshReport {
            tokens_attempted: targets.len(),
            ..Default::default()
        };
        let mut auth_failure = None;
        let mut other_failure = None;
        let mut rotated = None;
        let mut aggregator_token = None;

        for ((resource, loc, mut at), grant) in targets.into_iter().zip(grants) {
            match grant {
                Ok(grant) => {
                    at.renew(grant.access_token, grant.expires_on);
                    let secret = at.secret.clone();
                    let replaced = doc
                        .replace_record(loc, &CacheRecord::AccessToken(at))
                        .map_err(|e| AuthError::Unknown(format!("Failed to encode token: {}", e)))?;
                    if !replaced {
                        let e = AuthError::Unknown(format!("{} token record could not be rewritten", resource));
                        tracing::warn!("Dropping refreshed {} token: {}", resource, e);
                        report.failures.push((resource, e.kind()));
                        other_failure.get_or_insert(e);
                        continue;
                    }
                    if resource == Resource::ChatSvcAgg {
                        aggregator_token = Some(secret);
                    }
                    if rotated.is_none() {
                        rotated = grant.refresh_token;
                    }
                    report.tokens_refreshed += 1;
                    tracing::debug!("Refreshed {} token", resource);
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh {} token: {}", resource, e);
                    report.failures.push((resource, e.kind()));
                    if e.kind() == ErrorKind::AuthExpired {
                        auth_failure.get_or_insert(e);
                    } else {
                        other_failure.get_or_insert(e);
                    }
                }
            }
        }

        if report.tokens_refreshed == 0 {
            return Err(auth_failure
                .or(other_failure)
                .unwrap_or_else(|| AuthError::Unknown("no token scope refreshed".to_string())));
        }

        let rejected: Vec<_> = report
            .failures
            .iter()
            .filter(|(_, kind)| *kind == ErrorKind::AuthExpired)
            .map(|(resource, _)| resource.to_string())
            .collect();
        if !rejected.is_empty() {
            tracing::warn!(
                "Refresh token rejected for {}; those scopes need a new login",
                rejected.join(", ")
            );
        }

        if let Some(new_secret) = rotated.filter(|s| *s != rt.secret) {
            rt.rotate(new_secret);
            report.refresh_token_rotated = doc
                .replace_record(rt_loc, &CacheRecord::RefreshToken(rt))
                .map_err(|e| AuthError::Unknown(format!("Failed to encode refresh token: {}", e)))?;
            if !report.refresh_token_rotated {
                tracing::warn!("Rotated refresh token could not be stored");
            }
        }

        // Sequenced after the scopes: the exchange needs the aggregator secret.
        let aggregator_token = aggregator_token
            .or_else(|| valid_access_token(&doc, Resource::ChatSvcAgg).map(|t| t.token));
        match aggregator_token {
            Some(token) => {
                match exchange_skype_token(self.transport.as_ref(), &self.config.authz_url, &token)
                    .await
                {
                    Ok(grant) => {
                        let expires = jwt_expiry(&grant.skype_token).or_else(|| {
                            grant
                                .expires_in
                                .map(|secs| Utc::now().timestamp() + secs as i64)
                        });
                        let updated =
                            doc.set_cookie_value(SKYPE_TOKEN_COOKIE, &grant.skype_token, expires);
                        if updated == 0 {
                            tracing::warn!("Session has no {} cookie to update", SKYPE_TOKEN_COOKIE);
                        }
                        if grant.region_gtms.is_some() {
                            tracing::debug!("authsvc returned regionGtms");
                        }
                        report.skype_token_refreshed = updated > 0;
                    }
                    Err(e) => tracing::warn!("Skype token exchange failed during refresh: {}", e),
                }
            }
            None => tracing::warn!("No aggregator token available for Skype token exchange"),
        }

        store
            .write_session(&doc)
            .map_err(|e| AuthError::Unknown(format!("Failed to persist session: {:#}", e)))?;

        tracing::info!(
            "HTTP refresh complete: {}/{} scopes, skype token {}",
            report.tokens_refreshed,
            report.tokens_attempted,
            if report.skype_token_refreshed { "refreshed" } else { "unchanged" }
        );
        Ok(report)
    }

    /// Redeem `refresh_token` for a new access token with `at`'s client, tenant and scopes.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        at: &AccessTokenRecord,
    ) -> Result<TokenGrant, AuthError> {
        let tenant = if at.realm.is_empty() {
            "organizations"
        } else {
            at.realm.as_str()
        };
        let client = BasicClient::new(
            ClientId::new(at.client_id.clone()),
            None,
            AuthUrl::new(self.config.authorize_url(tenant))
                .map_err(|e| AuthError::Unknown(format!("Invalid authorize URL: {}", e)))?,
            Some(
                TokenUrl::new(self.config.token_url(tenant))
                    .map_err(|e| AuthError::Unknown(format!("Invalid token URL: {}", e)))?,
            ),
        );

        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let mut request = client.exchange_refresh_token(&refresh_token);
        for scope in at.target.split_whitespace() {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        if !at.target.split_whitespace().any(|s| s == "offline_access") {
            request = request.add_scope(Scope::new("offline_access".to_string()));
        }

        let transport = self.transport.clone();
        let origin = self.config.origin.clone();
        let response = request
            .request_async(move |req| send_oauth_request(transport, origin, req))
            .await
            .map_err(classify_token_error)?;

        let expires_in = response
            .expires_in()
            .map(|d| d.as_secs() as i64)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        Ok(TokenGrant {
            access_token: response.access_token().secret().to_string(),
            expires_on: Utc::now().timestamp() + expires_in,
            refresh_token: response.refresh_token().map(|rt| rt.secret().to_string()),
        })
    }
}

/// Bridge oauth2's HTTP types onto the transport, adding the SPA `Origin`.
async fn send_oauth_request(
    transport: Arc<dyn HttpTransport>,
    origin: String,
    req: oauth2::HttpRequest,
) -> Result<oauth2::HttpResponse, TransportError> {
    let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::POST);
    let headers = req
        .headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();

    let out = TransportRequest {
        method,
        url: req.url.to_string(),
        headers,
        body: req.body,
    }
    .header("Origin", origin)
    .header("client-request-id", uuid::Uuid::new_v4().to_string());

    let resp = transport.request(out).await?;

    let mut headers = oauth2::http::HeaderMap::new();
    for (k, v) in &resp.headers {
        if let (Ok(name), Ok(value)) = (
            oauth2::http::header::HeaderName::from_bytes(k.as_bytes()),
            oauth2::http::HeaderValue::from_str(v),
        ) {
            headers.append(name, value);
        }
    }
    let status_code = oauth2::http::StatusCode::from_u16(resp.status)
        .map_err(|_| TransportError::Network(format!("invalid HTTP status {}", resp.status)))?;

    Ok(oauth2::HttpResponse {
        status_code,
        headers,
        body: resp.body,
    })
}

/// An issuer rejection of the grant is `AuthExpired`; transport trouble stays scope-local.
fn classify_token_error(err: RequestTokenError<TransportError, BasicErrorResponse>) -> AuthError {
    match err {
        RequestTokenError::ServerResponse(resp) => {
            let code: &str = resp.error().as_ref();
            let description = resp.error_description().cloned().unwrap_or_default();
            let rejected = matches!(
                resp.error(),
                BasicErrorResponseType::InvalidGrant
                    | BasicErrorResponseType::InvalidClient
                    | BasicErrorResponseType::UnauthorizedClient
            ) || matches!(code, "interaction_required" | "login_required");
            if rejected {
                AuthError::AuthExpired(format!("refresh token rejected ({}): {}", code, description))
            } else {
                AuthError::Unknown(format!("token endpoint error ({}): {}", code, description))
            }
        }
        RequestTokenError::Request(TransportError::Timeout(m)) => AuthError::Timeout(m),
        RequestTokenError::Request(TransportError::Network(m)) => AuthError::Network(m),
        RequestTokenError::Parse(e, _) => {
            AuthError::Unknown(format!("Failed to parse token response: {}", e))
        }
        RequestTokenError::Other(m) => AuthError::Unknown(m),
    }
}
