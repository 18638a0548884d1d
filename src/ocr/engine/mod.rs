mod geom;
mod parse;
mod tesseract;
mod text;

use anyhow::{Context, Result, anyhow};
use std::io::Write;
use tracing::debug;

use crate::ocr::{
    CreateRecognizerFuture, RecognizeFuture, Recognizer, RecognizerFactory, RecognizerOutput,
};

pub(crate) use geom::{looks_vertical, scale_bbox};
pub(crate) use parse::parse_tabular;

/// Builds tesseract-backed recognizers. The requested language is a
/// traineddata tag such as `jpn`; `engine_languages` overrides it with an
/// explicit `+`-joined list.
#[derive(Debug, Clone, Default)]
pub struct TesseractFactory {
    engine_languages: Option<String>,
}

impl TesseractFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine_languages(mut self, languages: impl Into<String>) -> Self {
        let languages = languages.into();
        if !languages.trim().is_empty() {
            self.engine_languages = Some(languages);
        }
        self
    }
}

impl RecognizerFactory for TesseractFactory {
    fn create(&self, lang: &str) -> CreateRecognizerFuture {
        let lang = lang.to_string();
        let requested = self
            .engine_languages
            .clone()
            .unwrap_or_else(|| lang.clone());
        Box::pin(async move {
            let languages = tokio::task::spawn_blocking(move || -> Result<String> {
                let available = tesseract::installed_languages()?;
                tesseract::resolve_languages(&requested, &available)
            })
            .await
            .with_context(|| "tesseract language lookup panicked")??;
            debug!("tesseract ready for '{}' ({})", lang, languages);
            Ok(Box::new(TesseractRecognizer {
                language: lang,
                engine_languages: languages,
            }) as Box<dyn Recognizer>)
        })
    }
}

pub struct TesseractRecognizer {
    language: String,
    engine_languages: String,
}

impl Recognizer for TesseractRecognizer {
    fn language(&self) -> &str {
        &self.language
    }

    fn recognize<'a>(&'a mut self, image: &'a [u8]) -> RecognizeFuture<'a> {
        let bytes = image.to_vec();
        let languages = self.engine_languages.clone();
        Box::pin(async move {
            let tsv = tokio::task::spawn_blocking(move || run_on_bytes(&bytes, &languages))
                .await
                .with_context(|| "tesseract task panicked")??;
            Ok(RecognizerOutput::tabular(tsv))
        })
    }
}

fn run_on_bytes(bytes: &[u8], languages: &str) -> Result<String> {
    let extension = infer::get(bytes)
        .filter(|kind| kind.mime_type().starts_with("image/"))
        .map(|kind| kind.extension())
        .ok_or_else(|| anyhow!("payload is not a recognizable image"))?;
    let mut tmp = tempfile::Builder::new()
        .suffix(&format!(".{}", extension))
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    tmp.write_all(bytes)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush().ok();
    tesseract::recognize_tsv(tmp.path(), languages)
}
