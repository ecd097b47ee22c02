//! Surface outbound URIs from HTML and CSS documents.
//!
//! HTML is walked in document order so a `<base href>` replaces the
//! resolution base for everything after it. CSS is scanned for `url(...)`
//! tokens. Both extractors also run over local files, for revalidated
//! documents that came back 304.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use quarry_core::error::Result;

/// Attribute names whose values are URIs.
const URI_ATTRIBUTES: &[&str] = &[
    "action", "archive", "background", "code", "codebase", "cite", "classid", "data",
    "formaction", "href", "icon", "lowsrc", "longdesc", "manifest", "profile", "poster", "src",
    "usemap",
];

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'][^)]*?))\s*\)"#)
        .expect("static pattern")
});

/// Resolve one raw attribute value against the current base.
///
/// Surrounding whitespace is ignored; empty values and bare `#` are skipped.
fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "#" {
        return None;
    }
    base.join(raw).ok()
}

/// Extract outbound URIs from an HTML document.
///
/// The initial base is the document's own URI. A `<base href>` is itself
/// emitted and replaces the base for subsequent attributes.
pub fn extract_html(body: &str, document_uri: &Url) -> Vec<Url> {
    let doc = Html::parse_document(body);
    let mut base = document_uri.clone();
    let mut out = Vec::new();

    for node in doc.tree.root().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        if element.value().name() == "base" {
            if let Some(href) = element.value().attr("href") {
                if let Some(resolved) = resolve(&base, href) {
                    out.push(resolved.clone());
                    base = resolved;
                }
            }
            continue;
        }
        for (name, value) in element.value().attrs() {
            if URI_ATTRIBUTES.contains(&name) {
                if let Some(resolved) = resolve(&base, value) {
                    out.push(resolved);
                }
            }
        }
    }

    out
}

/// Extract `url(...)` references from a CSS document.
pub fn extract_css(body: &str, document_uri: &Url) -> Vec<Url> {
    CSS_URL
        .captures_iter(body)
        .filter_map(|caps| {
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))?
                .as_str();
            resolve(document_uri, raw)
        })
        .collect()
}

/// Extract links from a local file, choosing the parser by extension.
///
/// Unknown extensions yield nothing.
pub fn extract_local_file(path: &Path, document_uri: &Url) -> Result<Vec<Url>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => {
            let body = std::fs::read_to_string(path)?;
            Ok(extract_html(&body, document_uri))
        }
        Some("css") => {
            let body = std::fs::read_to_string(path)?;
            Ok(extract_css(&body, document_uri))
        }
        _ => Ok(Vec::new()),
    }
}
