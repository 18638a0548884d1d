use crate::ocr::engine::{looks_vertical, parse_tabular};
use crate::ocr::{LineBlock, RecognizedItem, RecognizerOutput};

/// The representation chosen out of a recognizer's output, richest first.
#[derive(Debug, Clone)]
pub enum RecognitionShape {
    StructuredLines(Vec<RecognizedItem>),
    StructuredWords(Vec<RecognizedItem>),
    StructuredBlocks(Vec<RecognizedItem>),
    TabularFallback(String),
    Empty,
}

impl RecognitionShape {
    pub fn name(&self) -> &'static str {
        match self {
            RecognitionShape::StructuredLines(_) => "lines",
            RecognitionShape::StructuredWords(_) => "words",
            RecognitionShape::StructuredBlocks(_) => "blocks",
            RecognitionShape::TabularFallback(_) => "tabular",
            RecognitionShape::Empty => "empty",
        }
    }
}

impl From<RecognizerOutput> for RecognitionShape {
    fn from(output: RecognizerOutput) -> Self {
        if !output.lines.is_empty() {
            RecognitionShape::StructuredLines(output.lines)
        } else if !output.words.is_empty() {
            RecognitionShape::StructuredWords(output.words)
        } else if !output.blocks.is_empty() {
            RecognitionShape::StructuredBlocks(output.blocks)
        } else if let Some(tsv) = output.tsv.filter(|tsv| !tsv.trim().is_empty()) {
            RecognitionShape::TabularFallback(tsv)
        } else {
            RecognitionShape::Empty
        }
    }
}

/// Converts recognizer output into line blocks in reading order (top, then
/// left).
pub fn normalize(output: RecognizerOutput, joiner: &str) -> Vec<LineBlock> {
    let mut blocks = match RecognitionShape::from(output) {
        RecognitionShape::StructuredLines(items)
        | RecognitionShape::StructuredWords(items)
        | RecognitionShape::StructuredBlocks(items) => from_structured(items),
        RecognitionShape::TabularFallback(tsv) => parse_tabular(&tsv, joiner),
        RecognitionShape::Empty => Vec::new(),
    };
    sort_reading_order(&mut blocks);
    blocks
}

fn from_structured(items: Vec<RecognizedItem>) -> Vec<LineBlock> {
    items
        .into_iter()
        .map(|item| {
            let text = item.text.trim().to_string();
            let bbox = item.bbox.unwrap_or_default();
            let confidence = if item.confidence.is_finite() {
                item.confidence.clamp(0.0, 100.0)
            } else {
                0.0
            };
            LineBlock {
                is_vertical: item
                    .is_vertical
                    .unwrap_or_else(|| looks_vertical(&bbox, &text)),
                text,
                confidence,
                bbox,
            }
        })
        .collect()
}

pub(crate) fn sort_reading_order(blocks: &mut [LineBlock]) {
    blocks.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });
}
