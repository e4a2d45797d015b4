//! Letterboxd film pages: the detail page (title, year, external links) and
//! the poster fragment. Both are plain HTML scraped with CSS selectors.
use scraper::{ElementRef, Html, Selector};

pub mod detail;
pub mod poster;

pub use detail::{parse_detail, DetailAdapter, DetailFields, ExternalLink};
pub use poster::{extract_image_url, PosterAdapter};

pub const DEFAULT_BASE_URL: &str = "https://letterboxd.com";
pub const CDN_PREFIX: &str = "https://a.ltrbxd.com/resized/";
const PLACEHOLDER_MARKER: &str = "s.ltrbxd.com/static/img/empty-poster";
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// Normalize a poster URL to the stable path the rest of the system stores:
/// no query string, no CDN prefix, no file extension. Placeholders and empty
/// inputs yield `None`.
pub fn normalize_image_url(raw: &str) -> Option<String> {
    let without_query = raw.split('?').next().unwrap_or_default().trim();
    if without_query.is_empty() || without_query.contains(PLACEHOLDER_MARKER) {
        return None;
    }
    let path = without_query
        .strip_prefix(CDN_PREFIX)
        .unwrap_or(without_query);

    let last_segment_start = path.rfind('/').map_or(0, |i| i + 1);
    let trimmed = match path[last_segment_start..].rfind('.') {
        Some(dot) => {
            let ext = &path[last_segment_start + dot + 1..];
            if IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                &path[..last_segment_start + dot]
            } else {
                path
            }
        }
        None => path,
    };

    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Flatten a stored image URL for export: placeholders and bare CDN prefixes
/// become "", anything else is normalized.
pub fn clean_image_url(stored: Option<&str>) -> String {
    stored.and_then(normalize_image_url).unwrap_or_default()
}

pub(crate) fn select_first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

pub(crate) fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<String>();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
