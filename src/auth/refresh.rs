//! Refresh orchestration
//!
//! Strategies run in order until one leaves a valid canonical token behind:
//! the HTTP refresh-token grant first, the headless browser second. At most
//! one refresh runs at a time; a concurrent caller gets
//! [`AuthError::RefreshInProgress`] immediately instead of waiting.

use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::browser::BrowserSession;
use super::extract::{best_access_token, TokenExtractor};
use super::http_refresh::HttpRefresh;
use super::tokens::BearerToken;
use super::{AuthConfig, Resource};
use crate::config::Settings;
use crate::error::{AuthError, ErrorKind};
use crate::http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMethod {
    Http,
    Browser,
}

impl fmt::Display for RefreshMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefreshMethod::Http => "http",
            RefreshMethod::Browser => "browser",
        })
    }
}

/// What a strategy did, before verification.
#[derive(Debug, Clone, Default)]
pub struct StrategyReport {
    pub tokens_refreshed: usize,
    pub tokens_attempted: usize,
    pub skype_token_refreshed: bool,
    pub refresh_token_rotated: bool,
    pub failures: Vec<(Resource, ErrorKind)>,
}

impl StrategyReport {
    /// Scopes whose grant the issuer refused. They stay stale until a new login.
    pub fn rejected_scopes(&self) -> Vec<Resource> {
        self.failures
            .iter()
            .filter(|(_, kind)| *kind == ErrorKind::AuthExpired)
            .map(|(resource, _)| *resource)
            .collect()
    }
}

pub enum StrategyOutcome {
    /// The strategy believes the session was refreshed; still verified.
    Success(StrategyReport),
    /// Could not refresh; the next strategy may.
    Escalate(AuthError),
    /// Stop here; no later strategy can help.
    Failed(AuthError),
}

#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    fn method(&self) -> RefreshMethod;
    async fn attempt(&self, extractor: &TokenExtractor) -> StrategyOutcome;
}

#[async_trait]
impl RefreshStrategy for HttpRefresh {
    fn method(&self) -> RefreshMethod {
        RefreshMethod::Http
    }

    async fn attempt(&self, extractor: &TokenExtractor) -> StrategyOutcome {
        match self.run(extractor.store()).await {
            Ok(report) => StrategyOutcome::Success(StrategyReport {
                tokens_refreshed: report.tokens_refreshed,
                tokens_attempted: report.tokens_attempted,
                skype_token_refreshed: report.skype_token_refreshed,
                refresh_token_rotated: report.refresh_token_rotated,
                failures: report.failures,
            }),
            Err(e) => StrategyOutcome::Escalate(e),
        }
    }
}

/// Slow path: let the browser collaborator refresh the session headlessly.
pub struct BrowserRefresh {
    browser: Arc<dyn BrowserSession>,
}

impl BrowserRefresh {
    pub fn new(browser: Arc<dyn BrowserSession>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl RefreshStrategy for BrowserRefresh {
    fn method(&self) -> RefreshMethod {
        RefreshMethod::Browser
    }

    async fn attempt(&self, extractor: &TokenExtractor) -> StrategyOutcome {
        tracing::info!("Falling back to browser refresh");
        let result = self.browser.ensure_authenticated(false, true).await;
        // The collaborator may have rewritten the session even on failure.
        extractor.invalidate();
        match result {
            Ok(()) => StrategyOutcome::Success(StrategyReport::default()),
            Err(e) => StrategyOutcome::Failed(AuthError::AuthExpired(format!(
                "browser refresh failed: {:#}",
                e
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Expiry of the canonical token after the refresh (unix seconds).
    pub new_expiry: i64,
    pub previous_expiry: Option<i64>,
    pub minutes_gained: i64,
    /// The previous token was already inside the proactive threshold.
    pub refresh_needed: bool,
    /// `None` when nothing was done because no refresh was needed.
    pub method: Option<RefreshMethod>,
    pub report: StrategyReport,
}

/// Clears the in-flight flag when the refresh ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Orchestrator {
    extractor: Arc<TokenExtractor>,
    browser: Arc<dyn BrowserSession>,
    strategies: Vec<Box<dyn RefreshStrategy>>,
    in_progress: AtomicBool,
    threshold: chrono::Duration,
    session_max_age_hours: u64,
}

impl Orchestrator {
    /// HTTP refresh first, browser fallback second.
    pub fn new(
        extractor: Arc<TokenExtractor>,
        transport: Arc<dyn HttpTransport>,
        browser: Arc<dyn BrowserSession>,
        settings: &Settings,
    ) -> Self {
        let strategies: Vec<Box<dyn RefreshStrategy>> = vec![
            Box::new(HttpRefresh::new(transport, AuthConfig::work())),
            Box::new(BrowserRefresh::new(browser.clone())),
        ];
        Self::with_strategies(extractor, browser, strategies, settings)
    }

    pub fn with_strategies(
        extractor: Arc<TokenExtractor>,
        browser: Arc<dyn BrowserSession>,
        strategies: Vec<Box<dyn RefreshStrategy>>,
        settings: &Settings,
    ) -> Self {
        Self {
            extractor,
            browser,
            strategies,
            in_progress: AtomicBool::new(false),
            threshold: settings.refresh_threshold(),
            session_max_age_hours: settings.session_max_age_hours,
        }
    }

    pub fn extractor(&self) -> &TokenExtractor {
        &self.extractor
    }

    /// Refresh the session's tokens.
    ///
    /// Without `force`, a canonical token outside the proactive threshold is
    /// left alone and the outcome has no method.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, AuthError> {
        let _guard = InFlight::acquire(&self.in_progress).ok_or(AuthError::RefreshInProgress)?;

        let previous_expiry = {
            let doc = self.extractor.load_session()?;
            best_access_token(&doc, Resource::CANONICAL).map(|(_, at)| at.expires_on)
        };
        let refresh_needed = previous_expiry
            .map_or(true, |exp| exp - Utc::now().timestamp() <= self.threshold.num_seconds());

        if !force && !refresh_needed {
            if let Some(exp) = previous_expiry {
                tracing::debug!("{} token still fresh, skipping refresh", Resource::CANONICAL);
                return Ok(RefreshOutcome {
                    new_expiry: exp,
                    previous_expiry,
                    minutes_gained: 0,
                    refresh_needed,
                    method: None,
                    report: StrategyReport::default(),
                });
            }
        }

        // A transport failure is not evidence that the grant was rejected; it
        // outranks whatever the later strategies report.
        let mut transient: Option<AuthError> = None;
        let mut last_error = None;
        for strategy in &self.strategies {
            let method = strategy.method();
            match strategy.attempt(&self.extractor).await {
                StrategyOutcome::Success(report) => {
                    self.extractor.invalidate();
                    match self.verify(previous_expiry, refresh_needed) {
                        Ok(new_expiry) => {
                            let minutes_gained =
                                (new_expiry - previous_expiry.unwrap_or_else(|| Utc::now().timestamp()))
                                    / 60;
                            tracing::info!(
                                "Session refreshed via {} (+{} min)",
                                method,
                                minutes_gained
                            );
                            return Ok(RefreshOutcome {
                                new_expiry,
                                previous_expiry,
                                minutes_gained,
                                refresh_needed,
                                method: Some(method),
                                report,
                            });
                        }
                        Err(e) => {
                            tracing::warn!("{} refresh left no usable token: {}", method, e);
                            last_error = Some(e);
                        }
                    }
                }
                StrategyOutcome::Escalate(e) => {
                    tracing::warn!("{} refresh failed: {}", method, e);
                    if e.is_retryable() && transient.is_none() {
                        transient = Some(e.clone());
                    }
                    last_error = Some(e);
                }
                StrategyOutcome::Failed(e) => {
                    tracing::warn!("{} refresh failed: {}", method, e);
                    return Err(transient.unwrap_or(e));
                }
            }
        }

        if let Some(e) = transient {
            return Err(e);
        }
        Err(AuthError::AuthExpired(format!(
            "automatic refresh failed ({})",
            last_error.map_or(ErrorKind::Unknown, |e| e.kind())
        )))
    }

    /// Canonical token must be valid, and must have moved forward if it had to.
    fn verify(&self, previous_expiry: Option<i64>, refresh_needed: bool) -> Result<i64, AuthError> {
        let token = self.extractor.access_token(Resource::CANONICAL).ok_or_else(|| {
            AuthError::AuthExpired(format!("no valid {} token", Resource::CANONICAL))
        })?;
        let new_expiry = token
            .expires_at
            .ok_or_else(|| AuthError::Unknown(format!("{} token has no expiry", Resource::CANONICAL)))?;

        if let (true, Some(prev)) = (refresh_needed, previous_expiry) {
            if new_expiry <= prev {
                return Err(AuthError::Unknown(format!(
                    "stale refresh: {} expiry did not advance",
                    Resource::CANONICAL
                )));
            }
        }
        Ok(new_expiry)
    }

    /// Valid token for `resource`, refreshing first if it is missing or near expiry.
    pub async fn ensure_token(&self, resource: Resource) -> Result<BearerToken, AuthError> {
        self.ensure_with(
            || self.extractor.access_token(resource),
            || self.extractor.token_for(resource),
        )
        .await
    }

    /// Valid Skype token, refreshing first if it is missing or near expiry.
    pub async fn ensure_skype_token(&self) -> Result<BearerToken, AuthError> {
        self.ensure_with(
            || self.extractor.skype_token(),
            || {
                self.extractor.skype_token().ok_or_else(|| {
                    AuthError::AuthExpired("no valid Skype token after refresh".to_string())
                })
            },
        )
        .await
    }

    async fn ensure_with(
        &self,
        lookup: impl Fn() -> Option<BearerToken>,
        after_refresh: impl FnOnce() -> Result<BearerToken, AuthError>,
    ) -> Result<BearerToken, AuthError> {
        if let Some(token) = lookup() {
            if !token.expires_within(self.threshold) {
                return Ok(token);
            }
            // Near expiry but still usable: a failed refresh is not fatal yet.
            return match self.refresh(true).await {
                Ok(_) => Ok(lookup().unwrap_or(token)),
                Err(e) => {
                    tracing::debug!("Proactive refresh did not complete: {}", e);
                    Ok(token)
                }
            };
        }

        let store = self.extractor.store();
        if !store.has_session() {
            return Err(AuthError::AuthRequired("no saved session".to_string()));
        }
        if store.is_session_likely_expired(self.session_max_age_hours) {
            return Err(AuthError::AuthExpired(format!(
                "session is older than {} hours",
                self.session_max_age_hours
            )));
        }

        self.refresh(true).await?;
        after_refresh()
    }

    /// Interactive sign-in through the browser collaborator.
    pub async fn login(&self) -> Result<(), AuthError> {
        let _guard = InFlight::acquire(&self.in_progress).ok_or(AuthError::RefreshInProgress)?;

        let result = self.browser.ensure_authenticated(true, false).await;
        self.extractor.invalidate();
        result.map_err(|e| AuthError::AuthRequired(format!("login failed: {:#}", e)))?;

        if !self.extractor.store().has_session() {
            return Err(AuthError::AuthRequired(
                "browser finished without saving a session".to_string(),
            ));
        }
        tracing::info!("Login complete");
        Ok(())
    }

    /// Delete both documents and every derived cache.
    pub fn logout(&self) {
        self.extractor.store().clear_session();
        self.extractor.invalidate();
        tracing::info!("Logged out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::browser::NoBrowser;
    use crate::auth::extract::tests::{full_session, now};
    use crate::auth::http_refresh::tests::{
        invalid_grant, is_authz, requested_resource, skype_ok, token_ok,
    };
    use crate::http::tests::{json_response, ScriptedTransport};
    use crate::http::{TransportError, TransportRequest, TransportResponse};
    use crate::session::SessionDocument;
    use crate::storage::tests::test_store;
    use crate::storage::SecureStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    type BrowserAction = dyn Fn() -> anyhow::Result<()> + Send + Sync;

    struct StubBrowser {
        calls: AtomicUsize,
        action: Box<BrowserAction>,
    }

    impl StubBrowser {
        fn new(action: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                action: Box::new(action),
            })
        }

        fn failing() -> Arc<Self> {
            Self::new(|| anyhow::bail!("login page shown"))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrowserSession for StubBrowser {
        async fn ensure_authenticated(&self, _show_overlay: bool, _fail_fast: bool) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.action)()
        }
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        store: Arc<SecureStore>,
        transport: Arc<ScriptedTransport>,
        browser: Arc<StubBrowser>,
        orchestrator: Orchestrator,
    }

    fn harness_with(
        doc: Option<SessionDocument>,
        handler: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
        browser: impl FnOnce(Arc<SecureStore>) -> Arc<StubBrowser>,
    ) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(test_store(tmp.path()));
        if let Some(doc) = doc {
            store.write_session(&doc).unwrap();
        }
        let transport = Arc::new(ScriptedTransport::new(handler));
        let browser = browser(store.clone());
        let extractor = Arc::new(TokenExtractor::new(store.clone()));
        let orchestrator =
            Orchestrator::new(extractor, transport.clone(), browser.clone(), &Settings::default());
        Harness {
            _tmp: tmp,
            store,
            transport,
            browser,
            orchestrator,
        }
    }

    fn harness(
        handler: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Harness {
        harness_with(Some(full_session(now() + 300)), handler, |_| {
            StubBrowser::failing()
        })
    }

    fn all_ok(req: &TransportRequest) -> Result<TransportResponse, TransportError> {
        if is_authz(req) {
            return Ok(skype_ok("skype-new"));
        }
        let resource = requested_resource(req).expect("unexpected request");
        Ok(token_ok(&format!("{}-new", resource), None))
    }

    #[tokio::test]
    async fn test_http_refresh_success() {
        let h = harness(all_ok);
        let outcome = h.orchestrator.refresh(false).await.unwrap();

        assert_eq!(outcome.method, Some(RefreshMethod::Http));
        assert!(outcome.refresh_needed);
        assert!(outcome.new_expiry > outcome.previous_expiry.unwrap());
        assert!(outcome.minutes_gained >= 50);
        assert_eq!(outcome.report.tokens_refreshed, 4);
        assert_eq!(h.browser.calls(), 0);
        assert_eq!(
            h.orchestrator.extractor().substrate_token().unwrap().token,
            "substrate-new"
        );
        assert!(!h.orchestrator.in_progress.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        let h = harness_with(Some(full_session(now() + 3600)), all_ok, |_| {
            StubBrowser::failing()
        });
        let outcome = h.orchestrator.refresh(false).await.unwrap();
        assert_eq!(outcome.method, None);
        assert!(!outcome.refresh_needed);
        assert_eq!(h.transport.calls(), 0);

        let forced = h.orchestrator.refresh(true).await.unwrap();
        assert_eq!(forced.method, Some(RefreshMethod::Http));
    }

    #[tokio::test]
    async fn test_partial_failure_is_success() {
        let h = harness(|req| {
            if requested_resource(req) == Some(Resource::Spaces) {
                return Err(TransportError::Timeout("POST token".into()));
            }
            all_ok(req)
        });
        let outcome = h.orchestrator.refresh(false).await.unwrap();
        assert_eq!(outcome.method, Some(RefreshMethod::Http));
        assert_eq!(outcome.report.tokens_refreshed, 3);
        assert_eq!(outcome.report.tokens_attempted, 4);
        assert_eq!(
            outcome.report.failures,
            vec![(Resource::Spaces, ErrorKind::Timeout)]
        );
    }

    #[tokio::test]
    async fn test_rejected_scope_surfaces_in_outcome() {
        let h = harness(|req| {
            if requested_resource(req) == Some(Resource::Graph) {
                return Ok(invalid_grant());
            }
            all_ok(req)
        });
        let outcome = h.orchestrator.refresh(false).await.unwrap();
        assert_eq!(outcome.method, Some(RefreshMethod::Http));
        assert_eq!(outcome.report.rejected_scopes(), vec![Resource::Graph]);
        assert_eq!(h.browser.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_session_is_auth_required() {
        let h = harness_with(None, all_ok, |_| StubBrowser::failing());
        let err = h.orchestrator.refresh(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
        assert_eq!(h.transport.calls(), 0);
        assert_eq!(h.browser.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_grant_falls_back_then_expires() {
        let h = harness(|_| Ok(invalid_grant()));
        let err = h.orchestrator.refresh(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(h.browser.calls(), 1);
        assert!(!h.orchestrator.in_progress.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_browser_fallback_rescues() {
        let h = harness_with(
            Some(full_session(now() + 300)),
            |_| Err(TransportError::Network("offline".into())),
            |store| {
                StubBrowser::new(move || {
                    store.write_session(&full_session(now() + 4000))?;
                    Ok(())
                })
            },
        );
        let outcome = h.orchestrator.refresh(false).await.unwrap();
        assert_eq!(outcome.method, Some(RefreshMethod::Browser));
        assert_eq!(h.browser.calls(), 1);
        assert!(outcome.new_expiry >= now() + 3900);
    }

    #[tokio::test]
    async fn test_browser_without_improvement_is_auth_expired() {
        let h = harness_with(
            Some(full_session(now() + 300)),
            |_| Ok(invalid_grant()),
            |_| StubBrowser::new(|| Ok(())),
        );
        let err = h.orchestrator.refresh(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(h.browser.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_refresh_escalates() {
        // Issued expiry lands before the previous one.
        let h = harness_with(
            Some(full_session(now() + 500)),
            |req| {
                if is_authz(req) {
                    return Ok(skype_ok("skype-new"));
                }
                Ok(json_response(
                    200,
                    json!({"token_type": "Bearer", "access_token": "short", "expires_in": 400}),
                ))
            },
            |_| StubBrowser::failing(),
        );
        let err = h.orchestrator.refresh(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(h.browser.calls(), 1);
    }

    #[tokio::test]
    async fn test_outage_keeps_transport_error() {
        let h = harness(|_| Err(TransportError::Network("dns failure".into())));
        let err = h.orchestrator.refresh(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
        assert!(!err.requires_login());
        assert_eq!(h.browser.calls(), 1);

        let h = harness(|_| Err(TransportError::Timeout("POST token".into())));
        let err = h.orchestrator.refresh(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_outage_without_browser_keeps_transport_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(test_store(tmp.path()));
        store.write_session(&full_session(now() + 300)).unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(TokenExtractor::new(store)),
            Arc::new(ScriptedTransport::new(|_| {
                Err(TransportError::Network("dns failure".into()))
            })),
            Arc::new(NoBrowser),
            &Settings::default(),
        );
        let err = orchestrator.refresh(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_outage_with_expired_token_is_retryable() {
        let h = harness_with(
            Some(full_session(now() - 600)),
            |_| Err(TransportError::Network("dns failure".into())),
            |_| StubBrowser::failing(),
        );
        let err = h.orchestrator.ensure_token(Resource::Graph).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
    }

    struct GatedTransport {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for GatedTransport {
        async fn request(&self, _req: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Err(TransportError::Network("released".into()))
        }
    }

    #[tokio::test]
    async fn test_single_flight() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(test_store(tmp.path()));
        store.write_session(&full_session(now() + 300)).unwrap();
        let transport = Arc::new(GatedTransport {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(TokenExtractor::new(store)),
            transport.clone(),
            StubBrowser::failing(),
            &Settings::default(),
        ));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(false).await })
        };
        transport.entered.notified().await;
        let calls_before = transport.calls.load(Ordering::SeqCst);

        let err = orchestrator.refresh(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshInProgress);
        assert!(err.is_retryable());
        assert_eq!(transport.calls.load(Ordering::SeqCst), calls_before);

        transport.release.notify_waiters();
        let first = first.await.unwrap();
        assert_eq!(first.unwrap_err().kind(), ErrorKind::Network);
        assert!(!orchestrator.in_progress.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_ensure_token_uses_cached() {
        let h = harness_with(Some(full_session(now() + 3600)), all_ok, |_| {
            StubBrowser::failing()
        });
        let token = h.orchestrator.ensure_token(Resource::Spaces).await.unwrap();
        assert_eq!(token.token, "spaces-old");
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_token_refreshes_near_expiry() {
        let h = harness(all_ok);
        let token = h.orchestrator.ensure_token(Resource::Graph).await.unwrap();
        assert_eq!(token.token, "graph-new");
    }

    #[tokio::test]
    async fn test_ensure_token_keeps_usable_token_when_refresh_fails() {
        let h = harness(|_| Ok(invalid_grant()));
        let token = h.orchestrator.ensure_token(Resource::Graph).await.unwrap();
        assert_eq!(token.token, "graph-old");
    }

    #[tokio::test]
    async fn test_ensure_token_expired_session() {
        let h = harness_with(Some(full_session(now() - 600)), all_ok, |_| {
            StubBrowser::failing()
        });
        let token = h.orchestrator.ensure_token(Resource::ChatSvcAgg).await.unwrap();
        assert_eq!(token.token, "chatsvcagg-new");

        let h = harness_with(Some(full_session(now() - 600)), |_| Ok(invalid_grant()), |_| {
            StubBrowser::failing()
        });
        let err = h.orchestrator.ensure_token(Resource::ChatSvcAgg).await.unwrap_err();
        assert!(err.requires_login());
    }

    #[tokio::test]
    async fn test_ensure_skype_token() {
        let h = harness_with(Some(full_session(now() + 3600)), all_ok, |_| {
            StubBrowser::failing()
        });
        assert!(h.orchestrator.ensure_skype_token().await.is_ok());
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let h = harness_with(None, all_ok, |store| {
            StubBrowser::new(move || {
                store.write_session(&full_session(now() + 3600))?;
                Ok(())
            })
        });
        h.orchestrator.login().await.unwrap();
        assert!(h.store.has_session());
        assert_eq!(h.orchestrator.extractor().region().unwrap().region, "emea");

        h.orchestrator.logout();
        assert!(!h.store.has_session());
        assert!(h.store.read_token_cache().is_none());
        assert_eq!(
            h.orchestrator.extractor().region().unwrap_err().kind(),
            ErrorKind::AuthRequired
        );
    }

    #[tokio::test]
    async fn test_login_failure_is_auth_required() {
        let h = harness_with(None, all_ok, |_| StubBrowser::failing());
        let err = h.orchestrator.login().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
    }
}
