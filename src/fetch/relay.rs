use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Answer from the page context. `success == false` is a final answer, not
/// a delivery failure.
#[derive(Debug, Clone, Default)]
pub struct RelayResponse {
    pub success: bool,
    pub bytes: Option<Vec<u8>>,
    pub error: Option<String>,
}

pub type RelayFuture<'a> = Pin<Box<dyn Future<Output = Result<RelayResponse>> + Send + 'a>>;

/// Asks the context that rendered the page to fetch an image with its own
/// credentials. An `Err` means the request never got an answer.
pub trait PageRelay: Send + Sync {
    fn relay<'a>(&'a self, url: &'a str) -> RelayFuture<'a>;
}

#[derive(Debug, Deserialize)]
struct RelayWire {
    success: bool,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Relay reached over HTTP: `POST {"url": ...}` answered with
/// `{"success", "data" (base64), "error"}`.
pub struct HttpRelay {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelay {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build relay client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl PageRelay for HttpRelay {
    fn relay<'a>(&'a self, url: &'a str) -> RelayFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&json!({ "url": url }))
                .send()
                .await
                .with_context(|| format!("relay at {} unreachable", self.endpoint))?;
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(anyhow!("relay endpoint returned {}: {}", status, text.trim()));
            }
            decode_wire(&text)
        })
    }
}

fn decode_wire(text: &str) -> Result<RelayResponse> {
    let wire: RelayWire = serde_json::from_str(text).context("malformed relay response")?;
    let bytes = match wire.data.as_deref().map(str::trim) {
        Some(data) if !data.is_empty() => Some(
            BASE64
                .decode(data)
                .context("relay data is not valid base64")?,
        ),
        _ => None,
    };
    Ok(RelayResponse {
        success: wire.success,
        bytes,
        error: wire.error,
    })
}
