use anyhow::anyhow;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::fetch::{
    HttpResponse, ImageTransport, InterceptorRegistry, PageRelay, RelayFuture, RelayResponse,
    TransportFuture, TransportRequest,
};
use crate::ocr::{
    BBox, CreateRecognizerFuture, LineBlock, RecognizeFuture, Recognizer, RecognizerFactory,
    RecognizerOutput,
};
use crate::translator::{LoadFuture, TextTranslator, TranslateFuture};

pub(crate) fn block(text: &str, confidence: f32, bbox: BBox) -> LineBlock {
    LineBlock {
        text: text.to_string(),
        confidence,
        bbox,
        is_vertical: false,
    }
}

/// Tabular dump holding the words "Hello" and "World" on one line.
pub(crate) fn hello_world_tsv() -> String {
    [
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext",
        "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\tHello",
        "5\t1\t1\t1\t1\t2\t10\t0\t10\t10\t80\tWorld",
    ]
    .join("\n")
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([240, 240, 240, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[derive(Default)]
struct Lifecycle {
    created: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
}

/// Hands out recognizers that always return the same output.
pub(crate) struct StaticRecognizerFactory {
    output: RecognizerOutput,
    lifecycle: Arc<Lifecycle>,
}

impl StaticRecognizerFactory {
    pub(crate) fn new(output: RecognizerOutput) -> Self {
        Self {
            output,
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    pub(crate) fn created(&self) -> Vec<String> {
        self.lifecycle.created.lock().expect("lock").clone()
    }

    pub(crate) fn terminated(&self) -> Vec<String> {
        self.lifecycle.terminated.lock().expect("lock").clone()
    }
}

impl RecognizerFactory for StaticRecognizerFactory {
    fn create(&self, lang: &str) -> CreateRecognizerFuture {
        self.lifecycle
            .created
            .lock()
            .expect("lock")
            .push(lang.to_string());
        let recognizer = StaticRecognizer {
            language: lang.to_string(),
            output: self.output.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
        };
        Box::pin(async move { Ok(Box::new(recognizer) as Box<dyn Recognizer>) })
    }
}

struct StaticRecognizer {
    language: String,
    output: RecognizerOutput,
    lifecycle: Arc<Lifecycle>,
}

impl Recognizer for StaticRecognizer {
    fn language(&self) -> &str {
        &self.language
    }

    fn recognize<'a>(&'a mut self, _image: &'a [u8]) -> RecognizeFuture<'a> {
        let output = self.output.clone();
        Box::pin(async move { Ok(output) })
    }

    fn terminate(&mut self) {
        self.lifecycle
            .terminated
            .lock()
            .expect("lock")
            .push(self.language.clone());
    }
}

pub(crate) struct FailingRecognizerFactory;

impl RecognizerFactory for FailingRecognizerFactory {
    fn create(&self, lang: &str) -> CreateRecognizerFuture {
        let lang = lang.to_string();
        Box::pin(async move { Err(anyhow!("traineddata for '{}' is unreachable", lang)) })
    }
}

/// Translator returning `"[<target>] <text>"` and recording every call.
#[derive(Default)]
pub(crate) struct RecordingTranslator {
    calls: Mutex<Vec<(String, String, String)>>,
    loads: AtomicUsize,
    fail_on: Option<String>,
    panic_once: AtomicBool,
}

impl RecordingTranslator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    /// The first translate call panics; later calls behave normally.
    pub(crate) fn panicking_once(self) -> Self {
        self.panic_once.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().expect("lock").clone()
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TextTranslator for RecordingTranslator {
    fn load(&self) -> LoadFuture<'_> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        source_tag: &'a str,
        target_tag: &'a str,
    ) -> TranslateFuture<'a> {
        Box::pin(async move {
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("translator crashed on '{}'", text);
            }
            self.calls.lock().expect("lock").push((
                text.to_string(),
                source_tag.to_string(),
                target_tag.to_string(),
            ));
            if self.fail_on.as_deref() == Some(text) {
                return Err(anyhow!("engine rejected '{}'", text));
            }
            Ok(format!("[{}] {}", target_tag, text))
        })
    }
}

/// In-memory transport. Unknown URLs answer 404.
#[derive(Default)]
pub(crate) struct MockTransport {
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    requests: Mutex<Vec<TransportRequest>>,
    registry: Option<Arc<InterceptorRegistry>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_interceptors() -> Self {
        Self {
            registry: Some(InterceptorRegistry::new()),
            ..Self::default()
        }
    }

    pub(crate) fn respond(&self, url: &str, status: u16, body: Vec<u8>) {
        self.responses
            .lock()
            .expect("lock")
            .insert(url.to_string(), (status, body));
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub(crate) fn registry(&self) -> Option<Arc<InterceptorRegistry>> {
        self.registry.clone()
    }
}

impl ImageTransport for MockTransport {
    fn get(&self, mut request: TransportRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            if let Some(registry) = &self.registry {
                registry.rewrite_request(&request.url, &mut request.headers);
            }
            let (status, body) = self
                .responses
                .lock()
                .expect("lock")
                .get(&request.url)
                .cloned()
                .unwrap_or((404, Vec::new()));
            let mut headers = HeaderMap::new();
            if let Some(registry) = &self.registry {
                registry.rewrite_response(&request.url, &mut headers);
            }
            self.requests.lock().expect("lock").push(request);
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }

    fn interceptors(&self) -> Option<Arc<InterceptorRegistry>> {
        self.registry.clone()
    }
}

enum RelayScript {
    Succeed(Vec<u8>),
    Refuse(String),
}

pub(crate) struct MockRelay {
    script: RelayScript,
    drop_first: usize,
    calls: AtomicUsize,
}

impl MockRelay {
    pub(crate) fn succeeding(bytes: Vec<u8>) -> Self {
        Self::dropping_first(0, bytes)
    }

    pub(crate) fn refusing(error: &str) -> Self {
        Self {
            script: RelayScript::Refuse(error.to_string()),
            drop_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Loses the first `count` requests before answering.
    pub(crate) fn dropping_first(count: usize, bytes: Vec<u8>) -> Self {
        Self {
            script: RelayScript::Succeed(bytes),
            drop_first: count,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageRelay for MockRelay {
    fn relay<'a>(&'a self, _url: &'a str) -> RelayFuture<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if call < self.drop_first {
                return Err(anyhow!("relay message {} lost", call + 1));
            }
            Ok(match &self.script {
                RelayScript::Succeed(bytes) => RelayResponse {
                    success: true,
                    bytes: Some(bytes.clone()),
                    error: None,
                },
                RelayScript::Refuse(error) => RelayResponse {
                    success: false,
                    bytes: None,
                    error: Some(error.clone()),
                },
            })
        })
    }
}
