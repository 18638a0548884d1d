use anyhow::{Context, Result, anyhow};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{HttpResponse, ImageTransport, InterceptorRegistry, TransportFuture, TransportRequest};

const USER_AGENT: &str = concat!("image-translate-overlay/", env!("CARGO_PKG_VERSION"));

/// Network transport backed by `reqwest`, with header interception.
pub struct HttpTransport {
    client: reqwest::Client,
    interceptors: Arc<InterceptorRegistry>,
    max_body_bytes: usize,
}

impl HttpTransport {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            interceptors: InterceptorRegistry::new(),
            max_body_bytes,
        })
    }
}

impl ImageTransport for HttpTransport {
    fn get(&self, request: TransportRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let TransportRequest { url, mut headers } = request;
            self.interceptors.rewrite_request(&url, &mut headers);
            debug!("GET {}", url);
            let response = self
                .client
                .get(&url)
                .headers(headers)
                .send()
                .await
                .with_context(|| format!("request to {} failed", url))?;
            let status = response.status().as_u16();
            let mut headers = response.headers().clone();
            self.interceptors.rewrite_response(&url, &mut headers);
            let mut body = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.with_context(|| format!("failed to read body from {}", url))?;
                if body.len() + chunk.len() > self.max_body_bytes {
                    return Err(anyhow!(
                        "body of {} exceeds {} bytes",
                        url,
                        self.max_body_bytes
                    ));
                }
                body.extend_from_slice(&chunk);
            }
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }

    fn interceptors(&self) -> Option<Arc<InterceptorRegistry>> {
        Some(Arc::clone(&self.interceptors))
    }
}
