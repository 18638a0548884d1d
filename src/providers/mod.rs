use anyhow::{Result, anyhow};

mod openai;
mod retry;

pub use openai::{DEFAULT_MODEL, OpenAiTranslator};

/// API key from the command line, else `OPENAI_API_KEY`.
pub fn resolve_key(override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }
    get_env("OPENAI_API_KEY")
        .ok_or_else(|| anyhow!("API key not found (pass --key or set OPENAI_API_KEY)"))
}

/// Accepts `model` or `openai:model`; other providers are rejected.
pub fn resolve_model(model_arg: Option<&str>, configured: Option<&str>) -> Result<String> {
    let Some(raw) = model_arg.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(configured
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string());
    };
    match raw.split_once(':') {
        Some((provider, model)) if provider.eq_ignore_ascii_case("openai") => {
            let model = model.trim();
            Ok(if model.is_empty() { DEFAULT_MODEL } else { model }.to_string())
        }
        Some((provider, _)) => Err(anyhow!(
            "unsupported provider '{}'; only OpenAI-compatible endpoints are available",
            provider
        )),
        None if raw.eq_ignore_ascii_case("openai") => Ok(DEFAULT_MODEL.to_string()),
        None => Ok(raw.to_string()),
    }
}

/// Settings value first, then `OPENAI_BASE_URL`.
pub fn resolve_base_url(configured: Option<&str>) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| get_env("OPENAI_BASE_URL"))
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_argument_forms() {
        assert_eq!(resolve_model(None, None).unwrap(), DEFAULT_MODEL);
        assert_eq!(resolve_model(None, Some("gpt-x")).unwrap(), "gpt-x");
        assert_eq!(resolve_model(Some("openai:gpt-y"), Some("gpt-x")).unwrap(), "gpt-y");
        assert_eq!(resolve_model(Some("OpenAI"), None).unwrap(), DEFAULT_MODEL);
        assert_eq!(resolve_model(Some("local-model"), None).unwrap(), "local-model");
        assert!(resolve_model(Some("gemini:flash"), None).is_err());
    }

    #[test]
    fn explicit_key_wins() {
        assert_eq!(resolve_key(Some("sk-test")).unwrap(), "sk-test");
    }
}
