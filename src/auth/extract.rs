//! Resolve usable tokens, identity and region from the persisted session
//!
//! Missing data is an expected steady state (not logged in yet, cookie
//! absent, region not discovered) and is reported as `AuthRequired` rather
//! than an error path.

use std::sync::{Arc, Mutex, MutexGuard};

use super::identity::{jwt_expiry, UserIdentity};
use super::region::RegionConfig;
use super::tokens::{BearerToken, TokenCacheSummary};
use super::{Resource, AUTH_TOKEN_COOKIE, SKYPE_TOKEN_COOKIE};
use crate::error::AuthError;
use crate::session::{AccessTokenRecord, CacheRecord, EntryLocation, RefreshTokenRecord, SessionDocument};
use crate::storage::SecureStore;

pub struct TokenExtractor {
    store: Arc<SecureStore>,
    region: Mutex<Option<RegionConfig>>,
}

impl TokenExtractor {
    pub fn new(store: Arc<SecureStore>) -> Self {
        Self {
            store,
            region: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    pub fn load_session(&self) -> Result<SessionDocument, AuthError> {
        self.store
            .read_session()
            .ok_or_else(|| AuthError::AuthRequired("no saved session".to_string()))
    }

    /// Currently valid token for `resource`, if any.
    pub fn access_token(&self, resource: Resource) -> Option<BearerToken> {
        if resource == Resource::Substrate {
            return self.substrate_token();
        }
        let doc = self.store.read_session()?;
        valid_access_token(&doc, resource)
    }

    /// Like [`access_token`](Self::access_token) but says why nothing is usable.
    pub fn token_for(&self, resource: Resource) -> Result<BearerToken, AuthError> {
        if let Some(token) = self.access_token(resource) {
            return Ok(token);
        }
        let doc = self.load_session()?;
        match best_access_token(&doc, resource) {
            Some(_) => Err(AuthError::AuthExpired(format!("{} token has expired", resource))),
            None => Err(AuthError::AuthRequired(format!(
                "session holds no {} token",
                resource
            ))),
        }
    }

    /// Substrate token through the `token-cache.json` fast path.
    pub fn substrate_token(&self) -> Option<BearerToken> {
        if let Some(summary) = self.store.read_token_cache() {
            let token = summary.bearer();
            if !token.is_expired() {
                return Some(token);
            }
        }

        let doc = self.store.read_session()?;
        let token = valid_access_token(&doc, Resource::Substrate)?;
        if let Some(summary) = TokenCacheSummary::new(&token) {
            if let Err(e) = self.store.write_token_cache(&summary) {
                tracing::warn!("Failed to write token cache: {:#}", e);
            }
        }
        Some(token)
    }

    /// Skype (chat identity) token from its cookie.
    pub fn skype_token(&self) -> Option<BearerToken> {
        let doc = self.store.read_session()?;
        skype_token_from(&doc).filter(|t| !t.is_expired())
    }

    /// AAD token carried in the `authtoken` cookie.
    pub fn auth_token(&self) -> Option<BearerToken> {
        let doc = self.store.read_session()?;
        auth_token_from(&doc).filter(|t| !t.is_expired())
    }

    pub fn identity(&self) -> Result<UserIdentity, AuthError> {
        let doc = self.load_session()?;
        identity_from(&doc)
            .ok_or_else(|| AuthError::AuthRequired("no identity token in session".to_string()))
    }

    /// Region config, parsed once and cached until [`invalidate`](Self::invalidate).
    pub fn region(&self) -> Result<RegionConfig, AuthError> {
        let mut cached = self.region_cache();
        if let Some(region) = cached.as_ref() {
            return Ok(region.clone());
        }

        let doc = self.load_session()?;
        let region = RegionConfig::from_session(&doc).ok_or_else(|| {
            AuthError::AuthRequired("no region discovery config in session".to_string())
        })?;
        tracing::debug!(
            "Resolved region {} (partition: {:?})",
            region.region,
            region.region_partition
        );
        *cached = Some(region.clone());
        Ok(region)
    }

    /// Drop derived state after login, logout or a refresh.
    pub fn invalidate(&self) {
        *self.region_cache() = None;
        self.store.clear_token_cache();
    }

    fn region_cache(&self) -> MutexGuard<'_, Option<RegionConfig>> {
        self.region.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Access token record for `resource` with the greatest `expiresOn`, expired or not.
pub fn best_access_token(
    doc: &SessionDocument,
    resource: Resource,
) -> Option<(EntryLocation, AccessTokenRecord)> {
    doc.cache_records()
        .filter_map(|(loc, record)| match record {
            CacheRecord::AccessToken(at) if resource.matches_target(&at.target) => Some((loc, at)),
            _ => None,
        })
        .max_by_key(|(_, at)| at.expires_on)
}

pub fn valid_access_token(doc: &SessionDocument, resource: Resource) -> Option<BearerToken> {
    let (_, at) = best_access_token(doc, resource)?;
    Some(BearerToken::new(at.secret, Some(at.expires_on))).filter(|t| !t.is_expired())
}

/// The current refresh token; the most recently updated one wins.
pub fn refresh_token_record(doc: &SessionDocument) -> Option<(EntryLocation, RefreshTokenRecord)> {
    doc.cache_records()
        .filter_map(|(loc, record)| match record {
            CacheRecord::RefreshToken(rt) if !rt.secret.is_empty() => Some((loc, rt)),
            _ => None,
        })
        .max_by_key(|(_, rt)| rt.last_updated_at.unwrap_or(0))
}

pub fn skype_token_from(doc: &SessionDocument) -> Option<BearerToken> {
    doc.cookies_named(SKYPE_TOKEN_COOKIE)
        .filter(|c| !c.value.is_empty())
        .map(|c| {
            let expires_at = jwt_expiry(&c.value).or_else(|| c.expires_at());
            BearerToken::new(c.value.clone(), expires_at)
        })
        .max_by_key(|t| t.expires_at.unwrap_or(i64::MAX))
}

pub fn auth_token_from(doc: &SessionDocument) -> Option<BearerToken> {
    let cookie = doc.cookies_named(AUTH_TOKEN_COOKIE).next()?;
    let token = bearer_from_auth_cookie(&cookie.value)?;
    let expires_at = jwt_expiry(&token).or_else(|| cookie.expires_at());
    Some(BearerToken::new(token, expires_at))
}

/// `Bearer%3D<jwt>%26Origin%3D...` (or already decoded) -> `<jwt>`
fn bearer_from_auth_cookie(raw: &str) -> Option<String> {
    let decoded = url::form_urlencoded::parse(format!("v={}", raw).as_bytes())
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned())?;
    url::form_urlencoded::parse(decoded.as_bytes())
        .find(|(k, _)| k == "Bearer")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
}

fn identity_from(doc: &SessionDocument) -> Option<UserIdentity> {
    auth_token_from(doc)
        .and_then(|t| UserIdentity::from_jwt(&t.token))
        .or_else(|| skype_token_from(doc).and_then(|t| UserIdentity::from_jwt(&t.token)))
        .or_else(|| {
            Resource::TRACKED.into_iter().find_map(|r| {
                let (_, at) = best_access_token(doc, r)?;
                UserIdentity::from_jwt(&at.secret)
            })
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::identity::tests::make_jwt;
    use crate::auth::region::tests::discovery_entry;
    use crate::session::cache::tests::{access_token_json, refresh_token_json};
    use crate::session::tests::cookie;
    use crate::session::{Origin, StorageEntry};
    use crate::storage::tests::test_store;
    use chrono::Utc;
    use serde_json::json;

    pub(crate) fn now() -> i64 {
        Utc::now().timestamp()
    }

    pub(crate) fn entry(name: &str, value: String) -> StorageEntry {
        StorageEntry {
            name: name.to_string(),
            value,
        }
    }

    /// Session with one refresh token and an access token per tracked resource.
    pub(crate) fn full_session(expires_on: i64) -> SessionDocument {
        let mut entries = vec![entry("msal.rt", refresh_token_json("rt-1"))];
        for resource in Resource::TRACKED {
            entries.push(entry(
                &format!("msal.at.{}", resource),
                access_token_json(
                    &format!("{}/.default", resource.audience()),
                    &format!("{}-old", resource),
                    expires_on,
                ),
            ));
        }
        entries.push(discovery_entry("emea", None));

        let skype = make_jwt(&json!({"skypeid": "orgid:oid-1", "exp": expires_on}));
        let aad = make_jwt(&json!({"oid": "oid-1", "tid": "tid-1", "name": "Doe, Jane", "exp": expires_on}));
        SessionDocument {
            cookies: vec![
                cookie(SKYPE_TOKEN_COOKIE, &skype, ".asyncgw.teams.microsoft.com"),
                cookie(SKYPE_TOKEN_COOKIE, &skype, ".asm.skype.com"),
                cookie(
                    AUTH_TOKEN_COOKIE,
                    &format!("Bearer%3D{}%26Origin%3Dhttps%3A%2F%2Fteams.microsoft.com", aad),
                    "teams.microsoft.com",
                ),
            ],
            origins: vec![Origin {
                origin: "https://teams.microsoft.com".into(),
                entries,
            }],
        }
    }

    fn extractor_with(doc: &SessionDocument) -> (tempfile::TempDir, TokenExtractor) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(test_store(tmp.path()));
        store.write_session(doc).unwrap();
        (tmp, TokenExtractor::new(store))
    }

    #[test]
    fn test_no_session_is_auth_required() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = TokenExtractor::new(Arc::new(test_store(tmp.path())));
        assert!(extractor.access_token(Resource::Spaces).is_none());
        assert!(matches!(
            extractor.token_for(Resource::Spaces),
            Err(AuthError::AuthRequired(_))
        ));
        assert!(matches!(extractor.identity(), Err(AuthError::AuthRequired(_))));
        assert!(matches!(extractor.region(), Err(AuthError::AuthRequired(_))));
    }

    #[test]
    fn test_picks_latest_expiry() {
        let mut doc = full_session(now() + 3600);
        doc.origins[0].entries.push(entry(
            "msal.at.spaces.newer",
            access_token_json("https://api.spaces.skype.com/.default", "spaces-newer", now() + 7200),
        ));
        let (_tmp, extractor) = extractor_with(&doc);
        assert_eq!(extractor.access_token(Resource::Spaces).unwrap().token, "spaces-newer");
    }

    #[test]
    fn test_expired_token_unavailable() {
        let (_tmp, extractor) = extractor_with(&full_session(now() - 60));
        assert!(extractor.access_token(Resource::Graph).is_none());
        assert!(matches!(
            extractor.token_for(Resource::Graph),
            Err(AuthError::AuthExpired(_))
        ));
    }

    #[test]
    fn test_substrate_fast_path_writes_summary() {
        let (_tmp, extractor) = extractor_with(&full_session(now() + 3600));
        assert!(extractor.store().read_token_cache().is_none());

        let token = extractor.substrate_token().unwrap();
        assert_eq!(token.token, "substrate-old");
        let summary = extractor.store().read_token_cache().unwrap();
        assert_eq!(summary.substrate_token, "substrate-old");
        assert_eq!(extractor.substrate_token().unwrap(), token);

        extractor.invalidate();
        assert!(extractor.store().read_token_cache().is_none());
    }

    #[test]
    fn test_cookie_tokens() {
        let (_tmp, extractor) = extractor_with(&full_session(now() + 3600));
        let skype = extractor.skype_token().unwrap();
        assert!(skype.expires_at.unwrap() > now());
        let aad = extractor.auth_token().unwrap();
        assert!(aad.token.starts_with("ey"));
    }

    #[test]
    fn test_bearer_from_auth_cookie_forms() {
        assert_eq!(
            bearer_from_auth_cookie("Bearer%3Dabc.def.ghi%26Origin%3Dhttps%3A%2F%2Fteams.microsoft.com"),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(
            bearer_from_auth_cookie("Bearer=abc.def.ghi&Origin=https://teams.microsoft.com"),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(bearer_from_auth_cookie("garbage"), None);
    }

    #[test]
    fn test_identity_from_auth_cookie() {
        let (_tmp, extractor) = extractor_with(&full_session(now() + 3600));
        let id = extractor.identity().unwrap();
        assert_eq!(id.object_id, "oid-1");
        assert_eq!(id.given_name.as_deref(), Some("Jane"));
    }

    #[test]
    fn test_identity_missing_cookie() {
        let mut doc = full_session(now() + 3600);
        doc.cookies.clear();
        doc.origins[0].entries.retain(|e| !e.name.starts_with("msal.at"));
        let (_tmp, extractor) = extractor_with(&doc);
        assert!(matches!(extractor.identity(), Err(AuthError::AuthRequired(_))));
    }

    #[test]
    fn test_region_cached_until_invalidated() {
        let (_tmp, extractor) = extractor_with(&full_session(now() + 3600));
        assert_eq!(extractor.region().unwrap().region, "emea");

        let mut doc = full_session(now() + 3600);
        doc.origins[0].entries.retain(|e| !e.name.ends_with("DISCOVER-REGION-GTM"));
        doc.origins[0].entries.push(discovery_entry("apac", Some("apac01")));
        extractor.store().write_session(&doc).unwrap();
        assert_eq!(extractor.region().unwrap().region, "emea");

        extractor.invalidate();
        let region = extractor.region().unwrap();
        assert_eq!(region.region, "apac");
        assert!(region.has_partition);
    }

    #[test]
    fn test_refresh_token_record() {
        let doc = full_session(now());
        let (loc, rt) = refresh_token_record(&doc).unwrap();
        assert_eq!(rt.secret, "rt-1");
        assert_eq!(doc.entry(loc).unwrap().name, "msal.rt");
    }
}
