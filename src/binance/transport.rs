// =============================================================================
// HTTP transport seam — the one capability the REST client needs
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

use super::error::BinanceError;

/// Raw response handed back by a transport.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a GET request against a fully built URL.
///
/// The REST client owns URL building and response interpretation; an
/// implementation only moves bytes and enforces its timeout.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, url: &str) -> Result<HttpResponse, BinanceError>;
}

/// Default transport backed by `reqwest` with a fixed overall timeout.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        debug!(timeout_secs = timeout.as_secs(), "reqwest transport initialised");
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, url: &str) -> Result<HttpResponse, BinanceError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BinanceError::transport(&e, e.is_timeout()))?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .text()
            .await
            .map_err(|e| BinanceError::transport(&e, e.is_timeout()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}
