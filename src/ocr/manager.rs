use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::RecognizerError;
use crate::ocr::{Recognizer, RecognizerFactory, RecognizerOutput};

/// Owns the single live recognizer. It is created on first use and rebuilt
/// only when the requested language changes; the previous engine is
/// terminated first.
pub struct RecognizerManager {
    factory: Arc<dyn RecognizerFactory>,
    current: Mutex<Option<Box<dyn Recognizer>>>,
}

impl RecognizerManager {
    pub fn new(factory: Arc<dyn RecognizerFactory>) -> Self {
        Self {
            factory,
            current: Mutex::new(None),
        }
    }

    pub async fn recognize(
        &self,
        lang: &str,
        image: &[u8],
    ) -> Result<RecognizerOutput, RecognizerError> {
        let mut slot = self.current.lock().await;
        let reuse = slot
            .as_ref()
            .map(|recognizer| recognizer.language() == lang)
            .unwrap_or(false);
        if !reuse {
            if let Some(mut previous) = slot.take() {
                info!(
                    "recognizer language changed {} -> {}; tearing down",
                    previous.language(),
                    lang
                );
                previous.terminate();
            }
            let created = self
                .factory
                .create(lang)
                .await
                .map_err(|err| RecognizerError::Init {
                    lang: lang.to_string(),
                    detail: format!("{:#}", err),
                })?;
            info!("recognizer initialized for '{}'", lang);
            *slot = Some(created);
        }
        let Some(recognizer) = slot.as_mut() else {
            return Err(RecognizerError::Init {
                lang: lang.to_string(),
                detail: "recognizer slot is empty".to_string(),
            });
        };
        recognizer
            .recognize(image)
            .await
            .map_err(|err| RecognizerError::Recognize(format!("{:#}", err)))
    }

    pub async fn current_language(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|recognizer| recognizer.language().to_string())
    }

    pub async fn shutdown(&self) {
        if let Some(mut recognizer) = self.current.lock().await.take() {
            recognizer.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FailingRecognizerFactory, StaticRecognizerFactory};

    #[tokio::test]
    async fn initializes_once_per_language() {
        let factory = Arc::new(StaticRecognizerFactory::new(Default::default()));
        let manager = RecognizerManager::new(factory.clone());

        manager.recognize("ja", b"img").await.unwrap();
        manager.recognize("ja", b"img").await.unwrap();
        assert_eq!(factory.created(), vec!["ja".to_string()]);
        assert!(factory.terminated().is_empty());

        manager.recognize("ko", b"img").await.unwrap();
        assert_eq!(factory.created(), vec!["ja".to_string(), "ko".to_string()]);
        assert_eq!(factory.terminated(), vec!["ja".to_string()]);
        assert_eq!(manager.current_language().await.as_deref(), Some("ko"));

        manager.shutdown().await;
        assert_eq!(factory.terminated(), vec!["ja".to_string(), "ko".to_string()]);
        assert!(manager.current_language().await.is_none());
    }

    #[tokio::test]
    async fn init_failures_are_not_memoized() {
        let manager = RecognizerManager::new(Arc::new(FailingRecognizerFactory));
        let err = manager.recognize("ja", b"img").await.unwrap_err();
        assert!(matches!(err, RecognizerError::Init { .. }));
        assert!(manager.current_language().await.is_none());
    }
}
