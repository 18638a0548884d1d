//! Per-task processing, run by the worker pool: fetch, recognize, normalize,
//! filter, translate, render.

use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RecognizerError, Step, StepContext, StepError};
use crate::fetch::{FetchResolver, FetchTier};
use crate::languages;
use crate::ocr::{
    DisplaySize, FilterStats, HostImage, Overlay, OverlayRenderer, RecognizerManager,
    filter_blocks, normalize,
};
use crate::translator::TranslationInvoker;

/// Everything a worker needs to process one image. Carries no document
/// handles so it can cross into the pool.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub id: usize,
    pub url: String,
    pub page_url: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub display: DisplaySize,
}

#[derive(Debug)]
pub enum PipelineOutput {
    /// Nothing survived recognition and filtering.
    NoText,
    Rendered { overlay: Overlay, blocks: usize },
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub id: usize,
    pub tier: Option<FetchTier>,
    pub stats: Option<FilterStats>,
    pub result: Result<PipelineOutput, StepError>,
}

#[derive(Debug, Default)]
struct Trace {
    tier: Option<FetchTier>,
    stats: Option<FilterStats>,
}

pub struct Pipeline {
    fetcher: FetchResolver,
    recognizers: Arc<RecognizerManager>,
    translator: TranslationInvoker,
    renderer: OverlayRenderer,
    min_confidence: f32,
}

impl Pipeline {
    pub fn new(
        fetcher: FetchResolver,
        recognizers: Arc<RecognizerManager>,
        translator: TranslationInvoker,
        renderer: OverlayRenderer,
        min_confidence: f32,
    ) -> Self {
        Self {
            fetcher,
            recognizers,
            translator,
            renderer,
            min_confidence,
        }
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    pub fn recognizers(&self) -> &Arc<RecognizerManager> {
        &self.recognizers
    }

    pub async fn run(&self, job: TaskJob) -> TaskOutcome {
        let mut trace = Trace::default();
        let result = self.execute(&job, &mut trace).await;
        TaskOutcome {
            id: job.id,
            tier: trace.tier,
            stats: trace.stats,
            result,
        }
    }

    async fn execute(&self, job: &TaskJob, trace: &mut Trace) -> Result<PipelineOutput, StepError> {
        let fetched = self
            .fetcher
            .fetch(&job.url, job.page_url.as_deref())
            .await
            .at_step(Step::Fetch)?;
        trace.tier = Some(fetched.tier);
        debug!(
            "task {}: fetched {} bytes via {}",
            job.id,
            fetched.bytes.len(),
            fetched.tier.as_str()
        );

        let (native_width, native_height) = native_size(&fetched.bytes).at_step(Step::Decode)?;

        let output = self
            .recognizers
            .recognize(languages::recognizer_tag(&job.source_lang), &fetched.bytes)
            .await
            .at_step(Step::Recognize)?;
        let blocks = normalize(output, languages::joiner_for(&job.source_lang));
        let (kept, stats) = filter_blocks(blocks, self.min_confidence);
        trace.stats = Some(stats);
        if stats.dropped() > 0 {
            debug!(
                "task {}: dropped {} block(s) (empty={}, degenerate={}, low-confidence={})",
                job.id,
                stats.dropped(),
                stats.empty_text,
                stats.degenerate_box,
                stats.low_confidence
            );
        }
        if kept.is_empty() {
            info!("task {}: no text found in {}", job.id, job.url);
            return Ok(PipelineOutput::NoText);
        }

        let translated = self
            .translator
            .translate_blocks(kept, &job.source_lang, &job.target_lang)
            .await
            .at_step(Step::Translate)?;

        let host = HostImage {
            display: job.display,
            bytes: &fetched.bytes,
        };
        let overlay = self
            .renderer
            .render(&host, &translated, native_width, native_height)
            .at_step(Step::Render)?;
        Ok(PipelineOutput::Rendered {
            overlay,
            blocks: translated.len(),
        })
    }
}

fn native_size(bytes: &[u8]) -> Result<(u32, u32), RecognizerError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| RecognizerError::Decode(err.to_string()))?
        .into_dimensions()
        .map_err(|err| RecognizerError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResolver;
    use crate::ocr::{OverlayStyle, RecognizerOutput, RenderMode};
    use crate::test_util::{
        FailingRecognizerFactory, MockTransport, RecordingTranslator, StaticRecognizerFactory,
        png_bytes,
    };
    use crate::translator::TranslatorHandle;

    const URL: &str = "https://cdn.example/page.png";
    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
5\t1\t1\t1\t1\t1\t100\t100\t50\t50\t90\tこんにちは\n\
5\t1\t1\t1\t1\t2\t150\t100\t50\t50\t80\t世界\n\
5\t1\t1\t1\t2\t1\t100\t300\t20\t20\t10\tノイズ\n";

    fn job(display: DisplaySize) -> TaskJob {
        TaskJob {
            id: 7,
            url: URL.to_string(),
            page_url: None,
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            display,
        }
    }

    fn pipeline(
        transport: Arc<MockTransport>,
        recognizers: Arc<RecognizerManager>,
        translator: Arc<RecordingTranslator>,
        mode: RenderMode,
    ) -> Pipeline {
        Pipeline::new(
            FetchResolver::new(transport),
            recognizers,
            TranslationInvoker::new(Arc::new(TranslatorHandle::new(translator))),
            OverlayRenderer::new(mode, OverlayStyle::default()),
            30.0,
        )
    }

    #[tokio::test]
    async fn renders_translated_layer_in_display_space() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, 200, png_bytes(1000, 600));
        let factory = Arc::new(StaticRecognizerFactory::new(RecognizerOutput::tabular(TSV)));
        let translator = Arc::new(RecordingTranslator::new());
        let pipeline = pipeline(
            transport,
            Arc::new(RecognizerManager::new(factory.clone())),
            translator.clone(),
            RenderMode::Layer,
        );

        let outcome = pipeline
            .run(job(DisplaySize::new(Some(500.0), None)))
            .await;

        assert_eq!(outcome.id, 7);
        assert_eq!(outcome.tier, Some(FetchTier::Direct));
        assert_eq!(outcome.stats.map(|s| (s.kept, s.low_confidence)), Some((1, 1)));
        assert_eq!(factory.created(), vec!["jpn".to_string()]);
        assert_eq!(
            translator.calls(),
            vec![("こんにちは世界".to_string(), "ja".to_string(), "en".to_string())]
        );
        match outcome.result {
            Ok(PipelineOutput::Rendered {
                overlay: Overlay::Layer(layer),
                blocks,
            }) => {
                assert_eq!(blocks, 1);
                assert_eq!((layer.width, layer.height), (500.0, 300.0));
                let region = &layer.regions[0];
                assert_eq!((region.x, region.y, region.width, region.height), (50.0, 50.0, 50.0, 25.0));
                assert_eq!(region.text, "[en] こんにちは世界");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn raster_mode_produces_png() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, 200, png_bytes(400, 400));
        let factory = Arc::new(StaticRecognizerFactory::new(RecognizerOutput::tabular(TSV)));
        let pipeline = pipeline(
            transport,
            Arc::new(RecognizerManager::new(factory)),
            Arc::new(RecordingTranslator::new()),
            RenderMode::Raster,
        );

        let outcome = pipeline.run(job(DisplaySize::default())).await;

        match outcome.result {
            Ok(PipelineOutput::Rendered {
                overlay: Overlay::Raster(raster),
                ..
            }) => {
                assert_eq!(raster.mime, "image/png");
                assert_eq!(native_size(&raster.bytes).unwrap(), (400, 400));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_recognition_is_no_text() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, 200, png_bytes(100, 100));
        let factory = Arc::new(StaticRecognizerFactory::new(RecognizerOutput::default()));
        let translator = Arc::new(RecordingTranslator::new());
        let pipeline = pipeline(
            transport,
            Arc::new(RecognizerManager::new(factory)),
            translator.clone(),
            RenderMode::Layer,
        );

        let outcome = pipeline.run(job(DisplaySize::default())).await;

        assert!(matches!(outcome.result, Ok(PipelineOutput::NoText)));
        assert!(translator.calls().is_empty());
    }

    #[tokio::test]
    async fn failures_are_tagged_with_their_step() {
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline(
            transport.clone(),
            Arc::new(RecognizerManager::new(Arc::new(FailingRecognizerFactory))),
            Arc::new(RecordingTranslator::new()),
            RenderMode::Layer,
        );

        let err = pipeline.run(job(DisplaySize::default())).await.result.unwrap_err();
        assert_eq!(err.step, Step::Fetch);
        assert!(err.to_string().starts_with("[fetch] all fetch tiers failed"));

        transport.respond(URL, 200, b"not an image".to_vec());
        let err = pipeline.run(job(DisplaySize::default())).await.result.unwrap_err();
        assert_eq!(err.step, Step::Decode);

        transport.respond(URL, 200, png_bytes(100, 100));
        let outcome = pipeline.run(job(DisplaySize::default())).await;
        assert_eq!(outcome.tier, Some(FetchTier::Direct));
        let err = outcome.result.unwrap_err();
        assert_eq!(err.step, Step::Recognize);
        assert!(err.to_string().starts_with("[recognize] recognizer initialization failed"));
    }
}
