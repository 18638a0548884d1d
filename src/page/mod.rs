//! The host document: candidate discovery and the per-image scaffolding that
//! shows task progress.

use kuchiki::NodeRef;
use kuchiki::traits::*;
use reqwest::Url;
use tracing::{debug, warn};

use crate::ocr::DisplaySize;

mod scaffold;

pub(crate) use scaffold::{
    attach_layer, attach_raster, mark_no_text, mark_processing, mark_queued, status, unwind,
};

pub const STATUS_ATTR: &str = "data-imgtr-status";
pub const RESULT_ATTR: &str = "data-imgtr-result";
pub const ORIGINAL_SRC_ATTR: &str = "data-imgtr-original-src";
pub const WRAP_CLASS: &str = "imgtr-wrap";
pub const BADGE_CLASS: &str = "imgtr-badge";
pub const LAYER_CLASS: &str = "imgtr-layer";
pub const TEXT_CLASS: &str = "imgtr-text";

/// Icons and tracking pixels fall below this side length.
pub const DEFAULT_MIN_IMAGE_SIDE: f32 = 64.0;

/// An `<img>` worth translating, with its absolute URL.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub element: NodeRef,
    pub url: String,
    pub display: DisplaySize,
}

pub struct Page {
    document: NodeRef,
    url: Option<Url>,
}

impl Page {
    pub fn parse(html: &str, page_url: Option<&str>) -> Self {
        let url = page_url
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|value| match Url::parse(value) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!("ignoring page url '{}': {}", value, err);
                    None
                }
            });
        Self {
            document: kuchiki::parse_html().one(html),
            url,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_ref().map(Url::as_str)
    }

    pub fn host(&self) -> Option<&str> {
        self.url.as_ref().and_then(Url::host_str)
    }

    /// Visible images without a status marker whose known displayed sides are
    /// at least `min_side`, in document order.
    pub fn candidates(&self, min_side: f32) -> Vec<Candidate> {
        let Ok(images) = self.document.select("img") else {
            return Vec::new();
        };
        images
            .filter_map(|image| self.candidate(image.as_node(), min_side))
            .collect()
    }

    pub fn to_html(&self) -> String {
        self.document.to_string()
    }

    fn candidate(&self, node: &NodeRef, min_side: f32) -> Option<Candidate> {
        let element = node.as_element()?;
        let attrs = element.attributes.borrow();
        if attrs.get(STATUS_ATTR).is_some_and(|value| !value.trim().is_empty()) {
            return None;
        }
        let src = ["src", "data-src"]
            .iter()
            .filter_map(|name| attrs.get(*name))
            .map(str::trim)
            .find(|value| !value.is_empty() && !value.starts_with("data:"))?;
        if attrs.contains("hidden") {
            debug!("skipping hidden image {}", src);
            return None;
        }

        let style = attrs.get("style").unwrap_or_default();
        let mut width = attrs.get("width").and_then(parse_px);
        let mut height = attrs.get("height").and_then(parse_px);
        for (property, value) in declarations(style) {
            match property.as_str() {
                "display" if value == "none" => return None,
                "visibility" if value == "hidden" => return None,
                "width" => width = parse_px(&value).or(width),
                "height" => height = parse_px(&value).or(height),
                _ => {}
            }
        }
        let display = DisplaySize::new(width, height);
        let too_small = [display.width, display.height]
            .into_iter()
            .flatten()
            .any(|side| side < min_side);
        if too_small {
            // `display` would resolve to `tracing::field::display` inside the macro.
            let size = &display;
            debug!("skipping small image {} ({:?})", src, size);
            return None;
        }

        let url = self.resolve(src)?;
        Some(Candidate {
            element: node.clone(),
            url,
            display,
        })
    }

    fn resolve(&self, src: &str) -> Option<String> {
        let resolved = match &self.url {
            Some(base) => base.join(src),
            None => Url::parse(src),
        };
        match resolved {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url.to_string()),
            Ok(url) => {
                debug!("skipping image with unsupported scheme {}", url);
                None
            }
            Err(err) => {
                debug!("skipping unresolvable image src '{}': {}", src, err);
                None
            }
        }
    }
}

fn declarations(style: &str) -> impl Iterator<Item = (String, String)> + '_ {
    style.split(';').filter_map(|declaration| {
        let (property, value) = declaration.split_once(':')?;
        Some((
            property.trim().to_ascii_lowercase(),
            value.trim().to_ascii_lowercase(),
        ))
    })
}

fn parse_px(value: &str) -> Option<f32> {
    let value = value.trim();
    let number = value.strip_suffix("px").unwrap_or(value).trim();
    number.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}
