use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use crate::error::RenderError;
use crate::ocr::TranslatedBlock;
use crate::ocr::engine::scale_bbox;
use crate::ocr::measure::measure_text_width_px;

pub const MIN_FONT_PX: f32 = 8.0;
const DEFAULT_FONT_SCALE: f32 = 0.8;

/// How a finished overlay is attached to the host image. A run uses one mode
/// for every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Positioned text layer above the untouched image.
    #[default]
    Layer,
    /// Translation composited into a redrawn copy of the image.
    Raster,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Layer => "layer",
            RenderMode::Raster => "raster",
        }
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "layer" => Ok(RenderMode::Layer),
            "raster" => Ok(RenderMode::Raster),
            other => Err(format!(
                "unknown render mode '{}' (expected layer or raster)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub text_color: String,
    pub fill_color: String,
    pub fill_opacity: f32,
    pub success_border: String,
    pub font_scale: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            text_color: "#111111".to_string(),
            fill_color: "#ffffff".to_string(),
            fill_opacity: 0.85,
            success_border: "#2e7d32".to_string(),
            font_scale: DEFAULT_FONT_SCALE,
        }
    }
}

/// Size the host element is rendered at, as far as the document declares it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplaySize {
    pub width: Option<f32>,
    pub height: Option<f32>,
}

impl DisplaySize {
    pub fn new(width: Option<f32>, height: Option<f32>) -> Self {
        let positive = |value: Option<f32>| value.filter(|v| v.is_finite() && *v > 0.0);
        Self {
            width: positive(width),
            height: positive(height),
        }
    }

    /// Fills undeclared sides from the native aspect ratio.
    pub fn resolve(&self, native_width: u32, native_height: u32) -> (f32, f32) {
        let nw = native_width as f32;
        let nh = native_height as f32;
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, w * nh / nw),
            (None, Some(h)) => (h * nw / nh, h),
            (None, None) => (nw, nh),
        }
    }
}

pub struct HostImage<'a> {
    pub display: DisplaySize,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedText {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
    pub text: String,
    pub vertical: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayer {
    pub width: f32,
    pub height: f32,
    pub regions: Vec<PlacedText>,
}

#[derive(Debug, Clone)]
pub struct RasterImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub enum Overlay {
    Layer(TextLayer),
    Raster(RasterImage),
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    mode: RenderMode,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(mode: RenderMode, style: OverlayStyle) -> Self {
        Self { mode, style }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn render(
        &self,
        host: &HostImage<'_>,
        blocks: &[TranslatedBlock],
        native_width: u32,
        native_height: u32,
    ) -> Result<Overlay, RenderError> {
        if native_width == 0 || native_height == 0 {
            return Err(RenderError::EmptyImage {
                width: native_width,
                height: native_height,
            });
        }
        match self.mode {
            RenderMode::Layer => {
                let (width, height) = host.display.resolve(native_width, native_height);
                let scale_x = width / native_width as f32;
                let scale_y = height / native_height as f32;
                Ok(Overlay::Layer(TextLayer {
                    width,
                    height,
                    regions: place_blocks(blocks, scale_x, scale_y, self.style.font_scale),
                }))
            }
            RenderMode::Raster => {
                let regions = place_blocks(blocks, 1.0, 1.0, self.style.font_scale);
                let svg = compose_svg(host.bytes, native_width, native_height, &regions, &self.style);
                let bytes = render_svg_png(&svg)?;
                Ok(Overlay::Raster(RasterImage {
                    bytes,
                    mime: "image/png".to_string(),
                }))
            }
        }
    }
}

/// Maps native boxes into display space and picks a font size per region.
pub(crate) fn place_blocks(
    blocks: &[TranslatedBlock],
    scale_x: f32,
    scale_y: f32,
    font_scale: f32,
) -> Vec<PlacedText> {
    blocks
        .iter()
        .map(|translated| {
            let scaled = scale_bbox(&translated.block.bbox, scale_x, scale_y);
            let width = scaled.width();
            let height = scaled.height();
            let vertical = translated.block.is_vertical;
            PlacedText {
                x: scaled.x0,
                y: scaled.y0,
                width,
                height,
                font_size: fit_font_size(
                    &translated.translated_text,
                    width,
                    height,
                    vertical,
                    font_scale,
                ),
                text: translated.translated_text.clone(),
                vertical,
            }
        })
        .collect()
}

/// Vertical columns size from their width since the translation reads
/// horizontally across them. Past the floor the text overflows sideways.
fn fit_font_size(text: &str, width: f32, height: f32, vertical: bool, font_scale: f32) -> f32 {
    let reference = if vertical { width } else { height };
    let mut size = (reference * font_scale).min(height);
    let measured = measure_text_width_px(text.trim(), size);
    if measured > width && measured > 0.0 {
        size *= width / measured;
    }
    size.max(MIN_FONT_PX)
}

fn compose_svg(
    image_bytes: &[u8],
    width: u32,
    height: u32,
    regions: &[PlacedText],
    style: &OverlayStyle,
) -> String {
    let mime = infer::get(image_bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("image/png");
    let data_uri = format!("data:{};base64,{}", mime, BASE64.encode(image_bytes));

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));
    for region in regions {
        let padding = (region.font_size * 0.15).max(1.0);
        svg.push_str(&format!(
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="{fill}" fill-opacity="{opacity}"/>"#,
            x = region.x,
            y = region.y,
            w = region.width,
            h = region.height,
            fill = escape_xml(&style.fill_color),
            opacity = style.fill_opacity
        ));
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" fill="{color}" font-family="sans-serif">{text}</text>"#,
            x = region.x + padding,
            y = region.y + region.height * 0.5 + region.font_size * 0.35,
            size = region.font_size,
            color = escape_xml(&style.text_color),
            text = escape_xml(&region.text)
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn render_svg_png(svg: &str) -> Result<Vec<u8>, RenderError> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options)
        .map_err(|err| RenderError::Raster(format!("failed to parse SVG: {}", err)))?;
    let size = tree.size().to_int_size();
    let mut pixmap = Pixmap::new(size.width(), size.height())
        .ok_or_else(|| RenderError::Raster("empty SVG size".to_string()))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| RenderError::Raster("failed to build image buffer from SVG".to_string()))?;
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|err| RenderError::Raster(format!("failed to encode PNG: {}", err)))?;
    Ok(bytes)
}

pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
