use std::collections::HashMap;
use tracing::debug;

use crate::ocr::{BBox, LineBlock};

use super::geom::{looks_vertical, union_bbox};
use super::text::{join_fragments, mean};

const REQUIRED_COLUMNS: [&str; 12] = [
    "level",
    "page_num",
    "block_num",
    "par_num",
    "line_num",
    "word_num",
    "left",
    "top",
    "width",
    "height",
    "conf",
    "text",
];

type LineKey = (i64, i64, i64, i64);

struct Columns {
    level: usize,
    page: usize,
    block: usize,
    par: usize,
    line: usize,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    conf: usize,
    text: usize,
}

impl Columns {
    fn locate(header: &str) -> Option<Self> {
        let index: HashMap<&str, usize> = header
            .split('\t')
            .enumerate()
            .map(|(idx, name)| (name.trim(), idx))
            .collect();
        if let Some(missing) = REQUIRED_COLUMNS
            .iter()
            .find(|name| !index.contains_key(*name))
        {
            debug!("tabular output lacks column '{}'", missing);
            return None;
        }
        let at = |name: &str| index.get(name).copied();
        Some(Self {
            level: at("level")?,
            page: at("page_num")?,
            block: at("block_num")?,
            par: at("par_num")?,
            line: at("line_num")?,
            left: at("left")?,
            top: at("top")?,
            width: at("width")?,
            height: at("height")?,
            conf: at("conf")?,
            text: at("text")?,
        })
    }
}

struct Fragment {
    text: String,
    conf: f32,
    bbox: BBox,
}

struct Row<'a> {
    level: i64,
    key: LineKey,
    bbox: BBox,
    conf: f32,
    text: &'a str,
}

/// Groups leaf rows of a tab-separated recognizer dump into line blocks.
/// Returns an empty list when a required column is missing.
pub(crate) fn parse_tabular(tsv: &str, joiner: &str) -> Vec<LineBlock> {
    let mut lines = tsv.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let Some(columns) = Columns::locate(header) else {
        return Vec::new();
    };

    let rows = lines
        .filter(|row| !row.trim().is_empty())
        .filter_map(|row| parse_row(row, &columns))
        .collect::<Vec<_>>();
    let Some(leaf_level) = rows.iter().map(|row| row.level).max() else {
        return Vec::new();
    };

    let mut order: Vec<LineKey> = Vec::new();
    let mut groups: HashMap<LineKey, Vec<Fragment>> = HashMap::new();
    let mut skipped = 0usize;
    for row in rows.into_iter().filter(|row| row.level == leaf_level) {
        let text = row.text.trim();
        if row.conf <= 0.0 || text.is_empty() {
            skipped += 1;
            continue;
        }
        let fragments = groups.entry(row.key).or_insert_with(|| {
            order.push(row.key);
            Vec::new()
        });
        fragments.push(Fragment {
            text: text.to_string(),
            conf: row.conf,
            bbox: row.bbox,
        });
    }
    if skipped > 0 {
        debug!("skipped {} empty or unconfident leaf rows", skipped);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter_map(|fragments| build_block(&fragments, joiner))
        .collect()
}

fn parse_row<'a>(row: &'a str, columns: &Columns) -> Option<Row<'a>> {
    let cells = row.split('\t').collect::<Vec<_>>();
    let int = |idx: usize| cells.get(idx)?.trim().parse::<i64>().ok();
    let num = |idx: usize| cells.get(idx)?.trim().parse::<f32>().ok();
    Some(Row {
        level: int(columns.level)?,
        key: (
            int(columns.page)?,
            int(columns.block)?,
            int(columns.par)?,
            int(columns.line)?,
        ),
        bbox: BBox::from_ltwh(
            num(columns.left)?,
            num(columns.top)?,
            num(columns.width)?,
            num(columns.height)?,
        ),
        conf: num(columns.conf).unwrap_or(-1.0),
        text: cells.get(columns.text).copied().unwrap_or(""),
    })
}

fn build_block(fragments: &[Fragment], joiner: &str) -> Option<LineBlock> {
    let first = fragments.first()?;
    let text = join_fragments(fragments.iter().map(|f| f.text.as_str()), joiner);
    let bbox = fragments
        .iter()
        .skip(1)
        .fold(first.bbox, |acc, f| union_bbox(&acc, &f.bbox));
    let confs = fragments.iter().map(|f| f.conf).collect::<Vec<_>>();
    Some(LineBlock {
        is_vertical: looks_vertical(&bbox, &text),
        text,
        confidence: mean(&confs).clamp(0.0, 100.0),
        bbox,
    })
}
