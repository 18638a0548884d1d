use serde::Serialize;

use crate::ocr::LineBlock;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 30.0;

/// Drop counts per reason. Diagnostics only; an all-dropped image is still a
/// successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub kept: usize,
    pub empty_text: usize,
    pub degenerate_box: usize,
    pub low_confidence: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.empty_text + self.degenerate_box + self.low_confidence
    }
}

pub fn filter_blocks(blocks: Vec<LineBlock>, min_confidence: f32) -> (Vec<LineBlock>, FilterStats) {
    let mut stats = FilterStats::default();
    let kept = blocks
        .into_iter()
        .filter(|block| {
            if block.text.trim().is_empty() {
                stats.empty_text += 1;
                return false;
            }
            if block.bbox.is_degenerate() {
                stats.degenerate_box += 1;
                return false;
            }
            // NaN never passes.
            if !(block.confidence >= min_confidence) {
                stats.low_confidence += 1;
                return false;
            }
            true
        })
        .collect::<Vec<_>>();
    stats.kept = kept.len();
    (kept, stats)
}
