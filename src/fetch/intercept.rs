use reqwest::Url;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, HeaderMap, HeaderValue, REFERER};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Header rewrite applied to requests for one image URL while a spoofed fetch
/// is in flight.
#[derive(Debug, Clone)]
pub struct InterceptRule {
    url: String,
    host: Option<String>,
    path: Option<String>,
    referer: String,
}

impl InterceptRule {
    pub fn new(url: &str, referer: &str) -> Self {
        let parsed = Url::parse(url).ok();
        let host = parsed
            .as_ref()
            .and_then(Url::host_str)
            .map(str::to_ascii_lowercase);
        let path = parsed
            .as_ref()
            .map(|parsed| parsed.path().to_string())
            .filter(|path| path.len() > 1);
        Self {
            url: url.to_string(),
            host,
            path,
            referer: referer.to_string(),
        }
    }

    /// Exact URL, or a URL on the same host whose path ends with the rule's
    /// path, so differently encoded spellings of one URL still match.
    pub fn matches(&self, candidate: &str) -> bool {
        if candidate == self.url {
            return true;
        }
        let (Some(host), Some(path)) = (self.host.as_deref(), self.path.as_deref()) else {
            return false;
        };
        let Ok(candidate) = Url::parse(candidate) else {
            return false;
        };
        candidate
            .host_str()
            .is_some_and(|candidate_host| candidate_host.eq_ignore_ascii_case(host))
            && candidate.path().ends_with(path)
    }
}

#[derive(Debug, Default)]
pub struct InterceptorRegistry {
    next_id: AtomicU64,
    rules: Mutex<Vec<(u64, InterceptRule)>>,
}

impl InterceptorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs `rule` until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, rule: InterceptRule) -> InterceptGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("intercepting {}", rule.url);
        self.rules().push((id, rule));
        InterceptGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn active(&self) -> usize {
        self.rules().len()
    }

    /// Replaces any `Referer` with the page URL of the first matching rule.
    pub fn rewrite_request(&self, url: &str, headers: &mut HeaderMap) {
        let Some(referer) = self.matching(url).map(|rule| rule.referer) else {
            return;
        };
        headers.remove(REFERER);
        if let Ok(value) = HeaderValue::from_str(&referer) {
            headers.insert(REFERER, value);
        }
    }

    pub fn rewrite_response(&self, url: &str, headers: &mut HeaderMap) {
        if self.matching(url).is_some() {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
    }

    fn matching(&self, url: &str) -> Option<InterceptRule> {
        self.rules()
            .iter()
            .find(|(_, rule)| rule.matches(url))
            .map(|(_, rule)| rule.clone())
    }

    fn remove(&self, id: u64) {
        self.rules().retain(|(existing, _)| *existing != id);
    }

    fn rules(&self) -> MutexGuard<'_, Vec<(u64, InterceptRule)>> {
        self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[must_use = "the interception is removed as soon as the guard is dropped"]
pub struct InterceptGuard {
    registry: Arc<InterceptorRegistry>,
    id: u64,
}

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
