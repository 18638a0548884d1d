use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use kuchiki::NodeRef;
use kuchiki::traits::*;

use super::{
    BADGE_CLASS, LAYER_CLASS, ORIGINAL_SRC_ATTR, RESULT_ATTR, STATUS_ATTR, TEXT_CLASS, WRAP_CLASS,
};
use crate::error::RenderError;
use crate::ocr::{OverlayStyle, RasterImage, TextLayer};

const WRAP_STYLE: &str = "position:relative;display:inline-block;";
const BADGE_STYLE: &str = "position:absolute;left:4px;top:4px;padding:1px 6px;\
font:12px/1.4 sans-serif;color:#fff;background:rgba(0,0,0,0.6);border-radius:3px;";

pub(crate) fn status(node: &NodeRef) -> Option<String> {
    get_attr(node, STATUS_ATTR).filter(|value| !value.is_empty())
}

/// Wraps the image and shows a "queued" badge next to it.
pub(crate) fn mark_queued(node: &NodeRef) -> Result<(), RenderError> {
    if node.parent().is_none() {
        return Err(RenderError::Attach("image is detached from the document".to_string()));
    }
    let wrapper = element("span", WRAP_CLASS)?;
    set_attr(&wrapper, "style", WRAP_STYLE);
    let badge = element("span", BADGE_CLASS)?;
    set_attr(&badge, "style", BADGE_STYLE);
    badge.append(NodeRef::new_text("queued"));

    node.insert_before(wrapper.clone());
    wrapper.append(node.clone());
    wrapper.append(badge);
    set_attr(node, STATUS_ATTR, "queued");
    Ok(())
}

pub(crate) fn mark_processing(node: &NodeRef) {
    set_attr(node, STATUS_ATTR, "processing");
    if let Some(badge) = wrapper_of(node).and_then(|wrapper| badge_of(&wrapper)) {
        replace_text(&badge, "processing");
    }
}

/// Swaps the badge for a positioned text layer. The wrapper stays as the
/// layer's containing block.
pub(crate) fn attach_layer(
    node: &NodeRef,
    layer: &TextLayer,
    style: &OverlayStyle,
) -> Result<(), RenderError> {
    let wrapper = wrapper_of(node)
        .ok_or_else(|| RenderError::Attach("image lost its wrapper".to_string()))?;
    let container = element("div", LAYER_CLASS)?;
    set_attr(
        &container,
        "style",
        &format!(
            "position:absolute;left:0;top:0;width:{}px;height:{}px;pointer-events:none;",
            px(layer.width),
            px(layer.height)
        ),
    );
    let fill = css_rgba(&style.fill_color, style.fill_opacity);
    for region in &layer.regions {
        let text = element("div", TEXT_CLASS)?;
        set_attr(
            &text,
            "style",
            &format!(
                "position:absolute;left:{}px;top:{}px;min-width:{}px;height:{}px;\
                 font-size:{}px;line-height:{}px;color:{};background:{};\
                 white-space:nowrap;overflow:visible;",
                px(region.x),
                px(region.y),
                px(region.width),
                px(region.height),
                px(region.font_size),
                px(region.height),
                style.text_color,
                fill
            ),
        );
        text.append(NodeRef::new_text(region.text.as_str()));
        container.append(text);
    }

    if let Some(badge) = badge_of(&wrapper) {
        badge.detach();
    }
    wrapper.append(container);
    finish(node, style);
    Ok(())
}

/// Replaces the displayed pixels with the composited copy, keeping the
/// original source for reversal.
pub(crate) fn attach_raster(node: &NodeRef, raster: &RasterImage, style: &OverlayStyle) {
    unwrap(node);
    if get_attr(node, ORIGINAL_SRC_ATTR).is_none()
        && let Some(original) = get_attr(node, "src")
    {
        set_attr(node, ORIGINAL_SRC_ATTR, &original);
    }
    let data_uri = format!("data:{};base64,{}", raster.mime, BASE64.encode(&raster.bytes));
    set_attr(node, "src", &data_uri);
    finish(node, style);
}

pub(crate) fn mark_no_text(node: &NodeRef) {
    unwrap(node);
    set_attr(node, STATUS_ATTR, "done");
    set_attr(node, RESULT_ATTR, "no-text");
}

/// Restores the element to how discovery found it, status marker included.
pub(crate) fn unwind(node: &NodeRef) {
    unwrap(node);
    remove_attr(node, STATUS_ATTR);
}

fn finish(node: &NodeRef, style: &OverlayStyle) {
    set_attr(node, STATUS_ATTR, "done");
    append_style(node, &format!("outline:3px solid {}", style.success_border));
}

fn unwrap(node: &NodeRef) {
    if let Some(wrapper) = wrapper_of(node) {
        wrapper.insert_before(node.clone());
        wrapper.detach();
    }
}

fn wrapper_of(node: &NodeRef) -> Option<NodeRef> {
    node.parent().filter(|parent| has_class(parent, WRAP_CLASS))
}

fn badge_of(wrapper: &NodeRef) -> Option<NodeRef> {
    wrapper.children().find(|child| has_class(child, BADGE_CLASS))
}

fn has_class(node: &NodeRef, class: &str) -> bool {
    get_attr(node, "class").is_some_and(|value| value.split_whitespace().any(|c| c == class))
}

fn element(tag: &str, class: &str) -> Result<NodeRef, RenderError> {
    let document = kuchiki::parse_html().one(format!(r#"<{tag} class="{class}"></{tag}>"#));
    let node = document
        .select_first(tag)
        .map_err(|_| RenderError::Attach(format!("failed to build <{}> element", tag)))?
        .as_node()
        .clone();
    node.detach();
    Ok(node)
}

fn replace_text(node: &NodeRef, text: &str) {
    for child in node.children().collect::<Vec<_>>() {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}

fn get_attr(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|element| element.attributes.borrow().get(name).map(str::to_string))
}

fn set_attr(node: &NodeRef, name: &str, value: &str) {
    if let Some(element) = node.as_element() {
        element
            .attributes
            .borrow_mut()
            .insert(name, value.to_string());
    }
}

fn remove_attr(node: &NodeRef, name: &str) {
    if let Some(element) = node.as_element() {
        element.attributes.borrow_mut().remove(name);
    }
}

fn append_style(node: &NodeRef, declaration: &str) {
    let existing = get_attr(node, "style").unwrap_or_default();
    let existing = existing.trim().trim_end_matches(';');
    let style = if existing.is_empty() {
        format!("{};", declaration)
    } else {
        format!("{};{};", existing, declaration)
    };
    set_attr(node, "style", &style);
}

fn px(value: f32) -> String {
    format!("{}", (value * 100.0).round() / 100.0)
}

/// `#rgb`/`#rrggbb` with alpha; other color syntaxes pass through opaque.
fn css_rgba(color: &str, alpha: f32) -> String {
    let Some(hex) = color.trim().strip_prefix('#') else {
        return color.to_string();
    };
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return color.to_string();
    }
    let expanded = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => hex.to_string(),
        _ => return color.to_string(),
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => {
            format!("rgba({},{},{},{})", r, g, b, alpha.clamp(0.0, 1.0))
        }
        _ => color.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::PlacedText;
    use crate::page::{DEFAULT_MIN_IMAGE_SIDE, Page};

    const HTML: &str = r#"<p>before<img src="https://cdn.example/a.png" alt="x" width="200" height="100">after</p>"#;

    fn first_image(page: &Page) -> NodeRef {
        page.candidates(DEFAULT_MIN_IMAGE_SIDE)
            .into_iter()
            .next()
            .map(|candidate| candidate.element)
            .unwrap()
    }

    #[test]
    fn queued_scaffold_unwinds_to_original_markup() {
        let page = Page::parse(HTML, None);
        let before = page.to_html();
        let image = first_image(&page);

        mark_queued(&image).unwrap();
        assert_eq!(status(&image).as_deref(), Some("queued"));
        assert!(page.to_html().contains(r#"class="imgtr-badge""#));
        assert!(page.to_html().contains(">queued</span>"));

        mark_processing(&image);
        assert!(page.to_html().contains(">processing</span>"));
        assert!(page.candidates(DEFAULT_MIN_IMAGE_SIDE).is_empty());

        unwind(&image);
        assert_eq!(page.to_html(), before);
        assert_eq!(status(&image), None);
        assert_eq!(page.candidates(DEFAULT_MIN_IMAGE_SIDE).len(), 1);
    }

    #[test]
    fn layer_replaces_badge_and_escapes_text() {
        let page = Page::parse(HTML, None);
        let image = first_image(&page);
        mark_queued(&image).unwrap();

        let layer = TextLayer {
            width: 200.0,
            height: 100.0,
            regions: vec![PlacedText {
                x: 10.0,
                y: 12.5,
                width: 80.0,
                height: 20.0,
                font_size: 16.0,
                text: "<Hi & bye>".to_string(),
                vertical: false,
            }],
        };
        attach_layer(&image, &layer, &OverlayStyle::default()).unwrap();

        let html = page.to_html();
        assert!(!html.contains("imgtr-badge"));
        assert!(html.contains(r#"class="imgtr-wrap""#));
        assert!(html.contains("&lt;Hi &amp; bye&gt;"));
        assert!(html.contains("left:10px;top:12.5px;min-width:80px;height:20px;font-size:16px;"));
        assert!(html.contains("background:rgba(255,255,255,0.85)"));
        assert!(html.contains("white-space:nowrap"));
        assert_eq!(status(&image).as_deref(), Some("done"));
        assert_eq!(
            get_attr(&image, "style").as_deref(),
            Some("outline:3px solid #2e7d32;")
        );
    }

    #[test]
    fn raster_swaps_source_and_drops_wrapper() {
        let page = Page::parse(HTML, None);
        let image = first_image(&page);
        mark_queued(&image).unwrap();

        let raster = RasterImage {
            bytes: b"png".to_vec(),
            mime: "image/png".to_string(),
        };
        attach_raster(&image, &raster, &OverlayStyle::default());

        let html = page.to_html();
        assert!(!html.contains("imgtr-wrap"));
        assert_eq!(
            get_attr(&image, ORIGINAL_SRC_ATTR).as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(
            get_attr(&image, "src").as_deref(),
            Some("data:image/png;base64,cG5n")
        );
    }

    #[test]
    fn no_text_is_a_soft_done() {
        let page = Page::parse(HTML, None);
        let image = first_image(&page);
        mark_queued(&image).unwrap();
        mark_no_text(&image);
        assert!(!page.to_html().contains("imgtr-wrap"));
        assert_eq!(status(&image).as_deref(), Some("done"));
        assert_eq!(get_attr(&image, RESULT_ATTR).as_deref(), Some("no-text"));
    }

    #[test]
    fn rgba_conversion() {
        assert_eq!(css_rgba("#fff", 0.5), "rgba(255,255,255,0.5)");
        assert_eq!(css_rgba("#102030", 1.0), "rgba(16,32,48,1)");
        assert_eq!(css_rgba("white", 0.5), "white");
        assert_eq!(css_rgba("#€", 0.5), "#€");
        assert_eq!(css_rgba("#ggg", 0.5), "#ggg");
        assert_eq!(css_rgba("#éé", 0.5), "#éé");
    }
}
