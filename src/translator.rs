use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{OnceCell, watch};
use tracing::{debug, info};

use crate::error::TranslationError;
use crate::languages;
use crate::ocr::{LineBlock, TranslatedBlock};

pub type TranslateFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// External translation engine. Tags are already mapped through
/// [`languages::translator_tag`].
pub trait TextTranslator: Send + Sync {
    fn load(&self) -> LoadFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        source_tag: &'a str,
        target_tag: &'a str,
    ) -> TranslateFuture<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Ready,
    Failed(String),
}

/// Process-wide handle that loads the engine once and reports progress.
pub struct TranslatorHandle {
    engine: Arc<dyn TextTranslator>,
    loaded: OnceCell<()>,
    state: watch::Sender<ModelState>,
}

impl TranslatorHandle {
    pub fn new(engine: Arc<dyn TextTranslator>) -> Self {
        let (state, _) = watch::channel(ModelState::NotLoaded);
        Self {
            engine,
            loaded: OnceCell::new(),
            state,
        }
    }

    pub fn state(&self) -> ModelState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelState> {
        self.state.subscribe()
    }

    pub async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                self.state.send_replace(ModelState::Loading);
                match self.engine.load().await {
                    Ok(()) => {
                        self.state.send_replace(ModelState::Ready);
                        info!("translation engine ready");
                        Ok(())
                    }
                    Err(err) => {
                        self.state.send_replace(ModelState::Failed(format!("{:#}", err)));
                        Err(err)
                    }
                }
            })
            .await
            .map(|_| ())
    }

    async fn translate(&self, text: &str, source_tag: &str, target_tag: &str) -> Result<String> {
        self.ensure_loaded().await?;
        self.engine.translate(text, source_tag, target_tag).await
    }
}

/// Translates blocks one at a time, keeping their order.
pub struct TranslationInvoker {
    handle: Arc<TranslatorHandle>,
}

impl TranslationInvoker {
    pub fn new(handle: Arc<TranslatorHandle>) -> Self {
        Self { handle }
    }

    pub async fn translate_blocks(
        &self,
        blocks: Vec<LineBlock>,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslatedBlock>, TranslationError> {
        let source_tag = languages::translator_tag(source_lang);
        let target_tag = languages::translator_tag(target_lang);
        debug!(
            "translating {} block(s) {} -> {}",
            blocks.len(),
            source_tag,
            target_tag
        );
        let mut translated = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.into_iter().enumerate() {
            let text = self
                .handle
                .translate(&block.text, source_tag, target_tag)
                .await
                .map_err(|err| TranslationError {
                    index,
                    detail: format!("{:#}", err),
                })?;
            translated.push(TranslatedBlock {
                block,
                translated_text: text.trim().to_string(),
            });
        }
        Ok(translated)
    }
}
