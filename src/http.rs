//! HTTP transport used for token endpoint and authsvc calls
//!
//! The refresh code only sees [`HttpTransport`], so tests can script
//! responses without a network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportRequest {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure before any HTTP response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(&self, req: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport with a per-call timeout and bounded retries.
///
/// Only connect/timeout failures are retried. Any HTTP response, including
/// 4xx auth errors, is returned as-is on the first attempt.
pub struct ReqwestTransport {
    http: reqwest::Client,
    max_retries: u32,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, max_retries })
    }

    async fn send_once(&self, req: &TransportRequest) -> Result<TransportResponse, reqwest::Error> {
        let mut builder = self.http.request(req.method.clone(), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(&self, req: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut attempt = 0;
        loop {
            match self.send_once(&req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        "{} {} failed ({}), retry {}/{}",
                        req.method,
                        req.url,
                        e,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(e) if e.is_timeout() => {
                    return Err(TransportError::Timeout(format!("{} {}", req.method, req.url)))
                }
                Err(e) => return Err(TransportError::Network(format!("{:#}", e))),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Handler =
        dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

    /// Transport answering from a closure and recording every request.
    pub(crate) struct ScriptedTransport {
        handler: Box<Handler>,
        calls: AtomicUsize,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(
            handler: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn request(
            &self,
            req: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(req.clone());
            (self.handler)(&req)
        }
    }

    pub(crate) fn body_str(req: &TransportRequest) -> String {
        String::from_utf8_lossy(&req.body).into_owned()
    }

    pub(crate) fn json_response(status: u16, body: serde_json::Value) -> TransportResponse {
        TransportResponse {
            status,
            headers: vec![("content-type".into(), "application/json; charset=utf-8".into())],
            body: body.to_string().into_bytes(),
        }
    }

    #[test]
    fn test_request_builder() {
        let req = TransportRequest::post("https://example.com/token")
            .header("Origin", "https://teams.microsoft.com");
        assert_eq!(req.method, reqwest::Method::POST);
        assert_eq!(req.headers.len(), 1);
        assert!(body_str(&req).is_empty());
    }

    #[test]
    fn test_success_range() {
        assert!(json_response(204, serde_json::Value::Null).is_success());
        assert!(!json_response(403, serde_json::Value::Null).is_success());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2), 0).unwrap();
        let err = transport
            .request(TransportRequest::post("http://127.0.0.1:9/token"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Network(_) | TransportError::Timeout(_)
        ));
    }
}
