use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ocr::{DEFAULT_MIN_CONFIDENCE, OverlayStyle, RenderMode};
use crate::page::DEFAULT_MIN_IMAGE_SIDE;
use crate::scheduler::DEFAULT_MAX_CONCURRENT;
use crate::transport::{DEFAULT_ATTEMPTS, DEFAULT_DELAY, RetryPolicy};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const HOME_DIR_NAME: &str = ".image-translate-overlay";
const DEFAULT_MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Per-domain record consulted when a page is scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    pub source_lang: String,
    pub target_lang: String,
    pub auto_run: bool,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            source_lang: "auto".to_string(),
            target_lang: "en".to_string(),
            auto_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub max_concurrent: usize,
    pub min_confidence: f32,
    pub min_image_side: f32,
    pub fetch_timeout: Duration,
    pub max_image_bytes: usize,
    pub relay_url: Option<String>,
    pub transport_attempts: usize,
    pub transport_delay: Duration,
    pub render_mode: RenderMode,
    pub overlay: OverlayStyle,
    pub translator_model: Option<String>,
    pub translator_base_url: Option<String>,
    pub defaults: SiteSettings,
    sites: HashMap<String, SiteFile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_image_side: DEFAULT_MIN_IMAGE_SIDE,
            fetch_timeout: Duration::from_secs(30),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            relay_url: None,
            transport_attempts: DEFAULT_ATTEMPTS,
            transport_delay: DEFAULT_DELAY,
            render_mode: RenderMode::default(),
            overlay: OverlayStyle::default(),
            translator_model: None,
            translator_base_url: None,
            defaults: SiteSettings::default(),
            sites: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    scan: Option<ScanSection>,
    fetch: Option<FetchSection>,
    transport: Option<TransportSection>,
    overlay: Option<OverlaySection>,
    translator: Option<TranslatorSection>,
    defaults: Option<SiteFile>,
    sites: Option<HashMap<String, SiteFile>>,
}

#[derive(Debug, Default, Deserialize)]
struct ScanSection {
    max_concurrent: Option<usize>,
    min_confidence: Option<f32>,
    min_image_side: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchSection {
    timeout_secs: Option<u64>,
    max_image_bytes: Option<usize>,
    relay_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TransportSection {
    attempts: Option<usize>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySection {
    mode: Option<RenderMode>,
    text_color: Option<String>,
    fill_color: Option<String>,
    fill_opacity: Option<f32>,
    success_border: Option<String>,
    font_scale: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslatorSection {
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SiteFile {
    source_lang: Option<String>,
    target_lang: Option<String>,
    auto_run: Option<bool>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_from_paths(&ordered_paths)
}

/// Merges the existing files among `paths`, later files winning.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content).with_context(|| {
                format!("failed to parse settings: {}", path.display())
            })?;
        }
    }
    Ok(settings)
}

impl Settings {
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    /// Site record for `host`, falling back through parent domains to
    /// `[defaults]`.
    pub fn site(&self, host: Option<&str>) -> SiteSettings {
        let mut resolved = self.defaults.clone();
        let Some(host) = host.map(|value| value.trim().to_ascii_lowercase()) else {
            return resolved;
        };
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let mut candidate = Some(host);
        while let Some(domain) = candidate {
            if let Some(site) = self.sites.get(domain) {
                apply_site(&mut resolved, site);
                return resolved;
            }
            candidate = domain
                .split_once('.')
                .map(|(_, parent)| parent)
                .filter(|parent| parent.contains('.'));
        }
        resolved
    }

    pub fn transport_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transport_attempts, self.transport_delay)
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(scan) = incoming.scan {
            if let Some(max) = scan.max_concurrent
                && max > 0
            {
                self.max_concurrent = max;
            }
            if let Some(min) = scan.min_confidence
                && (0.0..=100.0).contains(&min)
            {
                self.min_confidence = min;
            }
            if let Some(side) = scan.min_image_side
                && side >= 0.0
            {
                self.min_image_side = side;
            }
        }
        if let Some(fetch) = incoming.fetch {
            if let Some(secs) = fetch.timeout_secs
                && secs > 0
            {
                self.fetch_timeout = Duration::from_secs(secs);
            }
            if let Some(bytes) = fetch.max_image_bytes
                && bytes > 0
            {
                self.max_image_bytes = bytes;
            }
            if let Some(url) = non_empty(fetch.relay_url) {
                self.relay_url = Some(url);
            }
        }
        if let Some(transport) = incoming.transport {
            if let Some(attempts) = transport.attempts
                && attempts > 0
            {
                self.transport_attempts = attempts;
            }
            if let Some(delay) = transport.delay_ms {
                self.transport_delay = Duration::from_millis(delay);
            }
        }
        if let Some(overlay) = incoming.overlay {
            if let Some(mode) = overlay.mode {
                self.render_mode = mode;
            }
            if let Some(color) = non_empty(overlay.text_color) {
                self.overlay.text_color = color;
            }
            if let Some(color) = non_empty(overlay.fill_color) {
                self.overlay.fill_color = color;
            }
            if let Some(opacity) = overlay.fill_opacity {
                self.overlay.fill_opacity = opacity.clamp(0.0, 1.0);
            }
            if let Some(color) = non_empty(overlay.success_border) {
                self.overlay.success_border = color;
            }
            if let Some(scale) = overlay.font_scale
                && scale > 0.0
            {
                self.overlay.font_scale = scale;
            }
        }
        if let Some(translator) = incoming.translator {
            if let Some(model) = non_empty(translator.model) {
                self.translator_model = Some(model);
            }
            if let Some(url) = non_empty(translator.base_url) {
                self.translator_base_url = Some(url);
            }
        }
        if let Some(defaults) = incoming.defaults {
            apply_site(&mut self.defaults, &defaults);
        }
        if let Some(sites) = incoming.sites {
            for (domain, site) in sites {
                let entry = self.sites.entry(domain.trim().to_ascii_lowercase()).or_default();
                if site.source_lang.is_some() {
                    entry.source_lang = site.source_lang;
                }
                if site.target_lang.is_some() {
                    entry.target_lang = site.target_lang;
                }
                if site.auto_run.is_some() {
                    entry.auto_run = site.auto_run;
                }
            }
        }
    }
}

fn apply_site(target: &mut SiteSettings, site: &SiteFile) {
    if let Some(lang) = non_empty(site.source_lang.clone()) {
        target.source_lang = lang;
    }
    if let Some(lang) = non_empty(site.target_lang.clone()) {
        target.target_lang = lang;
    }
    if let Some(auto_run) = site.auto_run {
        target.auto_run = auto_run;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(HOME_DIR_NAME))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_match_built_in_defaults() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).unwrap();
        let built_in = Settings::default();
        assert_eq!(settings.max_concurrent, built_in.max_concurrent);
        assert_eq!(settings.min_confidence, built_in.min_confidence);
        assert_eq!(settings.min_image_side, built_in.min_image_side);
        assert_eq!(settings.transport_policy(), built_in.transport_policy());
        assert_eq!(settings.render_mode, RenderMode::Layer);
        assert_eq!(settings.overlay.font_scale, built_in.overlay.font_scale);
        assert_eq!(settings.translator_model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(settings.defaults, SiteSettings::default());
    }

    #[test]
    fn later_files_override_earlier_keys() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("settings.toml");
        let local = dir.path().join("settings.local.toml");
        fs::write(
            &base,
            "[scan]\nmax_concurrent = 2\nmin_confidence = 40.0\n[overlay]\nmode = \"raster\"\n",
        )
        .unwrap();
        fs::write(&local, "[scan]\nmax_concurrent = 4\n").unwrap();

        let settings =
            load_from_paths(&[base, dir.path().join("missing.toml"), local]).unwrap();

        assert_eq!(settings.max_concurrent, 4);
        assert_eq!(settings.min_confidence, 40.0);
        assert_eq!(settings.render_mode, RenderMode::Raster);
    }

    #[test]
    fn site_records_fall_back_through_parent_domains() {
        let mut settings = Settings::default();
        settings
            .merge_str(
                r#"
                [defaults]
                target_lang = "ko"

                [sites."manga.example"]
                source_lang = "ja"
                auto_run = true
                "#,
            )
            .unwrap();

        let site = settings.site(Some("www.manga.example"));
        assert_eq!(site.source_lang, "ja");
        assert_eq!(site.target_lang, "ko");
        assert!(site.auto_run);

        assert_eq!(settings.site(Some("cdn.manga.example")).source_lang, "ja");
        assert_eq!(settings.site(Some("other.example")), settings.defaults);
        assert!(!settings.site(None).auto_run);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut settings = Settings::default();
        assert!(settings.merge_str("[scan\nmax_concurrent = 1").is_err());
        assert!(settings.merge_str("[overlay]\nmode = \"canvas\"").is_err());
    }
}
