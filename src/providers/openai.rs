use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use crate::translator::{LoadFuture, TextTranslator, TranslateFuture};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const TOOL_NAME: &str = "deliver_translation";

/// Translation engine backed by an OpenAI-compatible chat completions API.
/// The reply is forced through a single tool call so it carries nothing but
/// the translation.
#[derive(Debug, Clone)]
pub struct OpenAiTranslator {
    key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiTranslator {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.base_url = trimmed.to_string();
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_chat_completions(
        &self,
        text: &str,
        source_tag: &str,
        target_tag: &str,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = request_body(&self.model, text, source_tag, target_tag);

        let mut attempt = 0usize;
        let mut delay = RATE_LIMIT_BASE_DELAY;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.key)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("request to {} failed", url))?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_translation(&text);
            }
            if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
                delay = wait_with_backoff("OpenAI", attempt, delay, retry_after).await;
                continue;
            }
            return Err(anyhow!(
                "OpenAI API error ({}): {}",
                status,
                extract_openai_error(&text).unwrap_or(text)
            ));
        }
    }
}

impl TextTranslator for OpenAiTranslator {
    fn load(&self) -> LoadFuture<'_> {
        Box::pin(async move {
            if self.key.trim().is_empty() {
                return Err(anyhow!("OpenAI API key is empty"));
            }
            debug!("using OpenAI model {} at {}", self.model, self.base_url);
            Ok(())
        })
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        source_tag: &'a str,
        target_tag: &'a str,
    ) -> TranslateFuture<'a> {
        Box::pin(self.call_chat_completions(text, source_tag, target_tag))
    }
}

fn request_body(model: &str, text: &str, source_tag: &str, target_tag: &str) -> Value {
    let system = format!(
        "You translate short text recognized in an image (comic balloons, captions, signs). \
         Translate from {} to {}. Keep it as short as the original, keep names as they are, \
         and do not add explanations. Return the result by calling {}.",
        source_tag, target_tag, TOOL_NAME
    );
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": text}
        ],
        "tools": [
            {
                "type": "function",
                "function": {
                    "name": TOOL_NAME,
                    "description": "Deliver the translated text.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "translation": {"type": "string"}
                        },
                        "required": ["translation"]
                    }
                }
            }
        ],
        "tool_choice": {"type": "function", "function": {"name": TOOL_NAME}}
    })
}

fn extract_translation(text: &str) -> Result<String> {
    let payload: ChatResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let message = payload
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| anyhow!("no choices returned from OpenAI"))?;

    if let Some(call) = message
        .tool_calls
        .iter()
        .find(|call| call.function.name == TOOL_NAME)
    {
        let args: Value = serde_json::from_str(&call.function.arguments)
            .with_context(|| "failed to parse OpenAI tool arguments")?;
        return args
            .get("translation")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("tool call is missing 'translation'"));
    }
    message
        .content
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("no tool call returned from OpenAI"))
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let parts = [
        error.message,
        error.kind.map(|kind| format!("type: {}", kind)),
        error.code.map(|code| format!("code: {}", code)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect::<Vec<_>>();
    if parts.is_empty() {
        Some("unknown error".to_string())
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}
