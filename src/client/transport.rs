//! One HTTP exchange, with no session logic.
//!
//! The interceptor builds an `ApiRequest`, a `Transport` sends it. `HttpTransport`
//! is the reqwest implementation; tests substitute scripted transports.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};
use serde_json::Value;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// `None` for an empty body (204, or no JSON).
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` bounds each whole exchange; expiry surfaces as `TransportError::Timeout`.
    /// A path on `base` (`https://host/api`) prefixes every request path.
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base).context("invalid base URL")?;
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        let client = reqwest::Client::builder().timeout(timeout).build().context("building HTTP client")?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Network(format!("invalid request path {}: {}", path, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.endpoint(&req.path)?;
        let mut builder = self
            .client
            .request(req.method.clone(), url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, req.request_id.as_str());
        if let Some(token) = &req.bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Network(e.to_string()))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(classify)?;
        let body = if bytes.is_empty() { None } else { serde_json::from_slice(&bytes).ok() };
        Ok(ApiResponse { status, body })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(base: &str, path: &str) -> String {
        HttpTransport::new(base, Duration::from_secs(1)).unwrap().endpoint(path).unwrap().to_string()
    }

    #[test]
    fn base_path_prefixes_request_paths() {
        assert_eq!(url("http://kb.local/api", "/auth/login"), "http://kb.local/api/auth/login");
        assert_eq!(url("http://kb.local/api/", "/auth/login"), "http://kb.local/api/auth/login");
        assert_eq!(url("http://kb.local", "/auth/me"), "http://kb.local/auth/me");
        assert_eq!(url("http://kb.local/v1/api", "documents/search?q=a%20b"), "http://kb.local/v1/api/documents/search?q=a%20b");
    }
}
