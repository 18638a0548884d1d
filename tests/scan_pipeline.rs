use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::anyhow;
use image_translate_overlay::fetch::{
    FetchResolver, HttpResponse, ImageTransport, TransportFuture, TransportRequest,
};
use image_translate_overlay::ocr::{
    CreateRecognizerFuture, OverlayRenderer, OverlayStyle, RecognizeFuture, Recognizer,
    RecognizerFactory, RecognizerManager, RecognizerOutput, RenderMode,
};
use image_translate_overlay::translator::{
    LoadFuture, TextTranslator, TranslateFuture, TranslationInvoker, TranslatorHandle,
};
use image_translate_overlay::{Page, Pipeline, SchedulerOptions, TaskStatus, scan_page};
use reqwest::header::HeaderMap;

const PAGE: &str = r#"<html><body>
<p>chapter one</p>
<img src="p1.png" width="500" height="300">
<img src="missing.png" width="500" height="300">
<img src="icon.png" width="16" height="16">
</body></html>"#;

const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
5\t1\t1\t1\t1\t1\t100\t100\t200\t50\t92\tこんにちは\n";

struct Pages {
    files: HashMap<String, Vec<u8>>,
}

impl ImageTransport for Pages {
    fn get(&self, request: TransportRequest) -> TransportFuture<'_> {
        let response = match self.files.get(&request.url) {
            Some(body) => HttpResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: body.clone(),
            },
            None => HttpResponse {
                status: 404,
                headers: HeaderMap::new(),
                body: Vec::new(),
            },
        };
        Box::pin(async move { Ok(response) })
    }
}

struct FixedFactory;

impl RecognizerFactory for FixedFactory {
    fn create(&self, lang: &str) -> CreateRecognizerFuture {
        let language = lang.to_string();
        Box::pin(async move { Ok(Box::new(FixedRecognizer { language }) as Box<dyn Recognizer>) })
    }
}

struct FixedRecognizer {
    language: String,
}

impl Recognizer for FixedRecognizer {
    fn language(&self) -> &str {
        &self.language
    }

    fn recognize<'a>(&'a mut self, _image: &'a [u8]) -> RecognizeFuture<'a> {
        Box::pin(async move { Ok(RecognizerOutput::tabular(TSV)) })
    }
}

struct Glossary;

impl TextTranslator for Glossary {
    fn load(&self) -> LoadFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        _source_tag: &'a str,
        _target_tag: &'a str,
    ) -> TranslateFuture<'a> {
        Box::pin(async move {
            match text {
                "こんにちは" => Ok("Hello".to_string()),
                other => Err(anyhow!("no entry for {}", other)),
            }
        })
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn pipeline(mode: RenderMode) -> Arc<Pipeline> {
    let mut files = HashMap::new();
    files.insert("https://manga.example/ch1/p1.png".to_string(), png(1000, 600));
    let fetcher = FetchResolver::new(Arc::new(Pages { files }));
    Arc::new(Pipeline::new(
        fetcher,
        Arc::new(RecognizerManager::new(Arc::new(FixedFactory))),
        TranslationInvoker::new(Arc::new(TranslatorHandle::new(Arc::new(Glossary)))),
        OverlayRenderer::new(mode, OverlayStyle::default()),
        30.0,
    ))
}

/// The overlay layer and its text regions, which close together.
fn layer_fragment(html: &str) -> &str {
    let start = html.find(r#"<div class="imgtr-layer""#).unwrap();
    let end = html[start..].find("</div></div>").unwrap() + start + "</div></div>".len();
    &html[start..end]
}

#[tokio::test]
async fn scan_overlays_translated_text_and_unwinds_failures() {
    let page = Page::parse(PAGE, Some("https://manga.example/ch1/index.html"));
    let report = scan_page(
        &page,
        pipeline(RenderMode::Layer),
        SchedulerOptions::default(),
        "ja",
        "en",
    )
    .await;

    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.count(TaskStatus::Done), 1);
    assert_eq!(report.count(TaskStatus::Failed), 1);
    assert_eq!(report.max_in_flight(), 1);

    let done = report
        .tasks
        .iter()
        .find(|task| task.status == TaskStatus::Done)
        .unwrap();
    assert_eq!(
        done.summary(),
        "task 0 done via direct: 1 block(s) (https://manga.example/ch1/p1.png)"
    );

    let html = page.to_html();
    insta::assert_snapshot!(
        layer_fragment(&html),
        @r#"<div class="imgtr-layer" style="position:absolute;left:0;top:0;width:500px;height:300px;pointer-events:none;"><div class="imgtr-text" style="position:absolute;left:50px;top:50px;min-width:100px;height:25px;font-size:20px;line-height:25px;color:#111111;background:rgba(255,255,255,0.85);white-space:nowrap;overflow:visible;">Hello</div></div>"#
    );
    assert_eq!(html.matches(r#"data-imgtr-status="done""#).count(), 1);
    assert_eq!(html.matches("imgtr-wrap").count(), 1);
    assert!(html.contains(r#"src="missing.png""#));
    assert!(!html.contains("imgtr-badge"));
}

#[tokio::test]
async fn raster_mode_swaps_the_image_source() {
    let page = Page::parse(PAGE, Some("https://manga.example/ch1/index.html"));
    let report = scan_page(
        &page,
        pipeline(RenderMode::Raster),
        SchedulerOptions::default(),
        "ja",
        "en",
    )
    .await;

    assert_eq!(report.count(TaskStatus::Done), 1);
    let html = page.to_html();
    assert!(html.contains(r#"data-imgtr-original-src="p1.png""#));
    assert!(html.contains(r#"src="data:image/png;base64,"#));
}
