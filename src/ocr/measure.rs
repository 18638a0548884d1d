fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xAC00..=0xD7AF
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}

/// Approximate rendered width of `text` without font metrics.
pub(crate) fn measure_text_width_px(text: &str, font_size: f32) -> f32 {
    estimate_text_width_units(text) * font_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_glyphs_are_wider_than_latin() {
        assert!(measure_text_width_px("漢字", 10.0) > measure_text_width_px("ab", 10.0));
        assert_eq!(measure_text_width_px("", 12.0), 0.0);
    }
}
