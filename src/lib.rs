use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub mod error;
pub mod fetch;
pub mod languages;
pub mod logging;
pub mod ocr;
pub mod page;
pub mod pipeline;
mod providers;
pub mod scheduler;
pub mod settings;
pub mod translator;
pub mod transport;

#[cfg(test)]
mod test_util;

pub use page::Page;
pub use pipeline::Pipeline;
pub use providers::{DEFAULT_MODEL, OpenAiTranslator};
pub use scheduler::{ScanReport, Scheduler, SchedulerOptions, TaskStatus};

use fetch::{FetchResolver, HttpRelay, HttpTransport};
use ocr::{OverlayRenderer, RecognizerManager, RenderMode, TesseractFactory};
use settings::Settings;
use translator::{TranslationInvoker, TranslatorHandle};

/// Command-line overrides; `None` keeps the settings value.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub page_url: Option<String>,
    pub lang: Option<String>,
    pub source_lang: Option<String>,
    pub scan: bool,
    pub render: Option<RenderMode>,
    pub concurrency: Option<usize>,
    pub min_confidence: Option<f32>,
    pub relay_url: Option<String>,
    pub key: Option<String>,
    pub model: Option<String>,
    pub settings_path: Option<String>,
    pub ocr_engine_langs: Option<String>,
}

#[derive(Debug)]
pub struct RunOutput {
    pub html: String,
    /// `None` when no scan was triggered.
    pub report: Option<ScanReport>,
}

pub async fn run(config: Config, html: &str) -> Result<RunOutput> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    apply_overrides(&mut settings, &config)?;

    let page = Page::parse(html, config.page_url.as_deref());
    let site = settings.site(page.host());
    if !config.scan && !site.auto_run {
        info!(
            "auto-run is off for {}; pass --scan to translate images",
            page.host().unwrap_or("this page")
        );
        return Ok(RunOutput {
            html: html.to_string(),
            report: None,
        });
    }

    let source_lang = config.source_lang.clone().unwrap_or(site.source_lang);
    let target_lang = config.lang.clone().unwrap_or(site.target_lang);
    validate_lang_codes(&source_lang, &target_lang)?;

    let pipeline = Arc::new(build_pipeline(&config, &settings)?);
    let options = SchedulerOptions {
        max_concurrent: settings.max_concurrent,
        min_image_side: settings.min_image_side,
        dispatch: settings.transport_policy(),
    };
    let report = scan_page(&page, pipeline, options, &source_lang, &target_lang).await;
    Ok(RunOutput {
        html: page.to_html(),
        report: Some(report),
    })
}

/// Queues every candidate on `page` and drives them to completion, then
/// releases the recognizer.
pub async fn scan_page(
    page: &Page,
    pipeline: Arc<Pipeline>,
    options: SchedulerOptions,
    source_lang: &str,
    target_lang: &str,
) -> ScanReport {
    let mut scheduler = Scheduler::new(Arc::clone(&pipeline), options);
    let queued = scheduler.scan(page, source_lang, target_lang);
    info!(
        "queued {} image(s) ({} -> {}, {} overlay)",
        queued,
        source_lang,
        target_lang,
        pipeline.renderer().mode().as_str()
    );
    let report = scheduler.run_loop().await;
    pipeline.recognizers().shutdown().await;
    report
}

fn apply_overrides(settings: &mut Settings, config: &Config) -> Result<()> {
    if let Some(mode) = config.render {
        settings.render_mode = mode;
    }
    if let Some(concurrency) = config.concurrency {
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }
        settings.max_concurrent = concurrency;
    }
    if let Some(min) = config.min_confidence {
        if !(0.0..=100.0).contains(&min) {
            return Err(anyhow!("min confidence must be within 0-100 (got {})", min));
        }
        settings.min_confidence = min;
    }
    if let Some(url) = config.relay_url.as_deref().map(str::trim)
        && !url.is_empty()
    {
        settings.relay_url = Some(url.to_string());
    }
    Ok(())
}

fn build_pipeline(config: &Config, settings: &Settings) -> Result<Pipeline> {
    let transport = HttpTransport::new(settings.fetch_timeout, settings.max_image_bytes)?;
    let mut fetcher = FetchResolver::new(Arc::new(transport));
    if let Some(url) = settings.relay_url.as_deref() {
        let relay = HttpRelay::new(url, settings.fetch_timeout)?;
        fetcher = fetcher.with_relay(Arc::new(relay), settings.transport_policy());
    }

    let mut factory = TesseractFactory::new();
    if let Some(languages) = config.ocr_engine_langs.as_deref() {
        factory = factory.with_engine_languages(languages);
    }

    let key = providers::resolve_key(config.key.as_deref())
        .with_context(|| "no API key found for the translation engine")?;
    let model = providers::resolve_model(
        config.model.as_deref(),
        settings.translator_model.as_deref(),
    )?;
    let mut engine = OpenAiTranslator::new(key).with_model(model);
    if let Some(base_url) = providers::resolve_base_url(settings.translator_base_url.as_deref()) {
        engine = engine.with_base_url(base_url);
    }

    Ok(Pipeline::new(
        fetcher,
        Arc::new(RecognizerManager::new(Arc::new(factory))),
        TranslationInvoker::new(Arc::new(TranslatorHandle::new(Arc::new(engine)))),
        OverlayRenderer::new(settings.render_mode, settings.overlay.clone()),
        settings.min_confidence,
    ))
}

fn validate_lang_codes(source_lang: &str, target_lang: &str) -> Result<()> {
    let source = source_lang.trim();
    if !source.eq_ignore_ascii_case("auto") && !languages::is_known(source) {
        return Err(anyhow!("unknown source language '{}'", source));
    }
    if !languages::is_known(target_lang) {
        return Err(anyhow!("unknown target language '{}'", target_lang.trim()));
    }
    Ok(())
}
