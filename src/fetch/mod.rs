//! Image byte retrieval with progressively more permissive strategies.

use anyhow::{Result, anyhow};
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::transport::RetryPolicy;

mod http;
mod intercept;
mod relay;

pub use http::HttpTransport;
pub use intercept::{InterceptGuard, InterceptRule, InterceptorRegistry};
pub use relay::{HttpRelay, PageRelay, RelayFuture, RelayResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchTier {
    ReferrerSpoofed,
    Direct,
    Relayed,
}

impl FetchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchTier::ReferrerSpoofed => "referrer-spoofed",
            FetchTier::Direct => "direct",
            FetchTier::Relayed => "relayed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub bytes: Vec<u8>,
    pub tier: FetchTier,
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: HeaderMap,
}

impl TransportRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            headers: HeaderMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'a>>;

/// Privileged network access. Implementations apply the rules of their
/// [`InterceptorRegistry`] to every request and response they handle.
pub trait ImageTransport: Send + Sync {
    fn get(&self, request: TransportRequest) -> TransportFuture<'_>;

    /// `None` when header interception is unavailable.
    fn interceptors(&self) -> Option<Arc<InterceptorRegistry>> {
        None
    }
}

pub struct FetchResolver {
    transport: Arc<dyn ImageTransport>,
    relay: Option<Arc<dyn PageRelay>>,
    relay_policy: RetryPolicy,
}

impl FetchResolver {
    pub fn new(transport: Arc<dyn ImageTransport>) -> Self {
        Self {
            transport,
            relay: None,
            relay_policy: RetryPolicy::default(),
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn PageRelay>, policy: RetryPolicy) -> Self {
        self.relay = Some(relay);
        self.relay_policy = policy;
        self
    }

    /// Tries the referrer-spoofed, direct and relayed strategies in order.
    /// Each tier runs at most once per call.
    pub async fn fetch(&self, url: &str, page_url: Option<&str>) -> Result<FetchResult, FetchError> {
        validate_url(url)?;
        let page_url = page_url.map(str::trim).filter(|value| !value.is_empty());
        let mut failures = Vec::new();

        match self.fetch_spoofed(url, page_url).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                warn!("referrer-spoofed fetch failed for {}: {:#}", url, err);
                failures.push(format!("referrer-spoofed: {:#}", err));
            }
        }

        match self.fetch_plain(url).await {
            Ok(bytes) => {
                return Ok(FetchResult {
                    bytes,
                    tier: FetchTier::Direct,
                });
            }
            Err(err) => {
                warn!("direct fetch failed for {}: {:#}", url, err);
                failures.push(format!("direct: {:#}", err));
            }
        }

        match self.fetch_relayed(url).await {
            Ok(bytes) => Ok(FetchResult {
                bytes,
                tier: FetchTier::Relayed,
            }),
            Err(err) => {
                warn!("relayed fetch failed for {}: {:#}", url, err);
                failures.push(format!("relayed: {:#}", err));
                Err(FetchError::Exhausted {
                    url: url.to_string(),
                    failures,
                })
            }
        }
    }

    async fn fetch_spoofed(&self, url: &str, page_url: Option<&str>) -> Result<FetchResult> {
        let (Some(page_url), Some(registry)) = (page_url, self.transport.interceptors()) else {
            debug!("no page URL or interception for {}; fetching plainly", url);
            let bytes = self.fetch_plain(url).await?;
            return Ok(FetchResult {
                bytes,
                tier: FetchTier::Direct,
            });
        };
        let _guard = registry.register(InterceptRule::new(url, page_url));
        let bytes = self.fetch_plain(url).await?;
        Ok(FetchResult {
            bytes,
            tier: FetchTier::ReferrerSpoofed,
        })
    }

    async fn fetch_plain(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.transport.get(TransportRequest::get(url)).await?;
        if !response.is_success() {
            return Err(anyhow!("HTTP {}", response.status));
        }
        Ok(response.body)
    }

    async fn fetch_relayed(&self, url: &str) -> Result<Vec<u8>> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| anyhow!("no page relay configured"))?;
        let response = self
            .relay_policy
            .run("relay", |_| relay.relay(url))
            .await?;
        if !response.success {
            return Err(anyhow!(
                "relay refused: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        match response.bytes {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(anyhow!("relay returned no data")),
        }
    }
}

fn validate_url(url: &str) -> Result<(), FetchError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}
