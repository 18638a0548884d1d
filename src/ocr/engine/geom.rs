use crate::ocr::BBox;

pub(crate) fn union_bbox(a: &BBox, b: &BBox) -> BBox {
    BBox {
        x0: a.x0.min(b.x0),
        y0: a.y0.min(b.y0),
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
    }
}

pub(crate) fn scale_bbox(bbox: &BBox, scale_x: f32, scale_y: f32) -> BBox {
    BBox {
        x0: bbox.x0 * scale_x,
        y0: bbox.y0 * scale_y,
        x1: bbox.x1 * scale_x,
        y1: bbox.y1 * scale_y,
    }
}

/// Tall multi-glyph boxes are treated as vertical script columns.
pub(crate) fn looks_vertical(bbox: &BBox, text: &str) -> bool {
    text.chars().filter(|ch| !ch.is_whitespace()).count() > 1
        && bbox.height() > bbox.width() * 1.5
}
