mod engine;
mod filter;
mod manager;
mod measure;
mod normalize;
mod render;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

pub use engine::TesseractFactory;
pub use filter::{DEFAULT_MIN_CONFIDENCE, FilterStats, filter_blocks};
pub use manager::RecognizerManager;
pub use normalize::{RecognitionShape, normalize};
pub use render::{
    DisplaySize, HostImage, Overlay, OverlayRenderer, OverlayStyle, PlacedText, RasterImage,
    RenderMode, TextLayer,
};

/// Axis-aligned box in native image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_ltwh(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            x0: left,
            y0: top,
            x1: left + width,
            y1: top + height,
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|value| value.is_finite());
        !finite || self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

/// Normalized unit of recognized text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineBlock {
    pub text: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub is_vertical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedBlock {
    pub block: LineBlock,
    pub translated_text: String,
}

/// One structured record as reported by a recognizer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognizedItem {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub is_vertical: Option<bool>,
}

/// Raw recognizer output. Engines fill whichever representation they have;
/// [`RecognitionShape`] decides which one is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognizerOutput {
    #[serde(default)]
    pub lines: Vec<RecognizedItem>,
    #[serde(default)]
    pub words: Vec<RecognizedItem>,
    #[serde(default)]
    pub blocks: Vec<RecognizedItem>,
    #[serde(default)]
    pub tsv: Option<String>,
}

impl RecognizerOutput {
    pub fn tabular(tsv: impl Into<String>) -> Self {
        Self {
            tsv: Some(tsv.into()),
            ..Self::default()
        }
    }
}

pub type RecognizeFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<RecognizerOutput>> + Send + 'a>>;
pub type CreateRecognizerFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<Box<dyn Recognizer>>> + Send>>;

/// A live recognition engine bound to one language.
pub trait Recognizer: Send {
    fn language(&self) -> &str;
    fn recognize<'a>(&'a mut self, image: &'a [u8]) -> RecognizeFuture<'a>;
    fn terminate(&mut self) {}
}

pub trait RecognizerFactory: Send + Sync {
    fn create(&self, lang: &str) -> CreateRecognizerFuture;
}
