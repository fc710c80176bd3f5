//! Asset discovery and targeted attribute rewriting for HTML documents.
//!
//! The document is never re-serialized. Scanning records the byte span of every
//! `href`/`src` value it turns into an [`AssetReference`], and [`HtmlRewriter::apply`]
//! splices local paths into exactly those spans, leaving every other byte alone.
//!
//! Markup inside comments and inside `<script>`, `<style>` and `<textarea>` bodies
//! is skipped, so string literals such as `"<img src=x>"` in inline scripts are
//! not mistaken for elements.

use regex::bytes::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::OnceLock;
use url::Url;

use crate::cache_path::AssetClass;
use crate::error::ResolutionError;
use crate::url_resolver::{is_data_uri, resolve};

/// A stylesheet, script or image link discovered in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReference {
    /// Attribute value exactly as written in the document.
    pub original_url: String,
    pub resolved_url: Url,
    pub asset_class: AssetClass,
    /// Set once the asset is available locally; only set references get rewritten.
    pub local_relative_path: Option<String>,
    #[serde(skip)]
    span: Range<usize>,
}

impl AssetReference {
    /// Byte range of the attribute value inside the scanned document.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }
}

/// A reference that was found but could not be resolved to a fetchable URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub original_url: String,
    pub asset_class: AssetClass,
    pub error: ResolutionError,
}

#[derive(Debug, Clone)]
pub struct Scan {
    /// Base used for resolution: the page URL, or the document's `<base href>`.
    pub base_url: Url,
    pub references: Vec<AssetReference>,
    pub unresolved: Vec<UnresolvedReference>,
}

#[derive(Clone)]
pub struct HtmlRewriter {
    page_url: Url,
}

struct Attribute {
    name: String,
    value: Option<(String, Range<usize>)>,
}

struct Element {
    name: String,
    attributes: Vec<Attribute>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&(String, Range<usize>)> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.as_ref())
    }

    fn asset_attr(&self) -> Option<(AssetClass, &(String, Range<usize>))> {
        match self.name.as_str() {
            "link" => {
                let (rel, _) = self.attr("rel")?;
                let is_stylesheet = rel
                    .split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"));
                if !is_stylesheet {
                    return None;
                }
                self.attr("href").map(|v| (AssetClass::Stylesheet, v))
            }
            "script" => self.attr("src").map(|v| (AssetClass::Script, v)),
            "img" => self.attr("src").map(|v| (AssetClass::Image, v)),
            _ => None,
        }
    }
}

// Matches raw bytes; the document may be in any encoding.
// Quotes open a value only right after `=`, so `alt=it's` is one unquoted value.
fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(
            r#"(?s-u)<!-->|<!--->|<!--.*?-->|<(?i:(link|script|img|base|style|textarea))\b((?:\s*[^\s>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*))?|\s*/)*)\s*>"#,
        )
        .expect("tag pattern is valid")
    })
}

fn attr_regex() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"(?-u)([^\s>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]*)))?"#)
            .expect("attribute pattern is valid")
    })
}

/// Offset of `</name` at or after `from`, compared case-insensitively.
fn find_closing(html: &[u8], from: usize, name: &str) -> Option<usize> {
    let needle = name.as_bytes();
    (from..html.len().saturating_sub(1)).find(|&start| {
        html[start..].starts_with(b"</")
            && html
                .get(start + 2..start + 2 + needle.len())
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(needle))
    })
}

fn lex_elements(html: &[u8]) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut pos = 0;

    while let Some(caps) = tag_regex().captures_at(html, pos) {
        let whole = caps.get(0).map_or(pos..html.len(), |m| m.range());
        pos = whole.end.max(pos + 1).min(html.len());

        // Comments match without a tag name
        let (Some(name), Some(attrs)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let name = String::from_utf8_lossy(name.as_bytes()).to_ascii_lowercase();

        let attributes = attr_regex()
            .captures_iter(attrs.as_bytes())
            .filter_map(|attr| {
                let attr_name = String::from_utf8_lossy(attr.get(1)?.as_bytes()).to_ascii_lowercase();
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map(|m| {
                        let start = attrs.start() + m.start();
                        let text = String::from_utf8_lossy(m.as_bytes()).into_owned();
                        (text, start..start + m.len())
                    });
                Some(Attribute {
                    name: attr_name,
                    value,
                })
            })
            .collect();

        if matches!(name.as_str(), "script" | "style" | "textarea") {
            pos = find_closing(html, pos, &name).unwrap_or(html.len());
        }

        elements.push(Element { name, attributes });

        if pos >= html.len() {
            break;
        }
    }

    elements
}

impl HtmlRewriter {
    pub fn new(page_url: &Url) -> Self {
        Self {
            page_url: page_url.clone(),
        }
    }

    /// Enumerates stylesheet links, external scripts and images in document order.
    ///
    /// `data:` URIs and empty values are skipped entirely. Other references that
    /// fail to resolve are reported in [`Scan::unresolved`].
    pub fn scan(&self, html: impl AsRef<[u8]>) -> Scan {
        let elements = lex_elements(html.as_ref());

        let base_url = elements
            .iter()
            .filter(|e| e.name == "base")
            .find_map(|e| e.attr("href"))
            .and_then(|(href, _)| {
                let decoded = html_escape::decode_html_entities(href);
                resolve(&self.page_url, &decoded).ok()
            })
            .unwrap_or_else(|| self.page_url.clone());

        let mut references = Vec::new();
        let mut unresolved = Vec::new();

        for element in &elements {
            let Some((asset_class, (raw, span))) = element.asset_attr() else {
                continue;
            };

            let decoded = html_escape::decode_html_entities(raw);
            if decoded.trim().is_empty() || is_data_uri(&decoded) {
                continue;
            }

            match resolve(&base_url, &decoded) {
                Ok(resolved_url) => references.push(AssetReference {
                    original_url: raw.clone(),
                    resolved_url,
                    asset_class,
                    local_relative_path: None,
                    span: span.clone(),
                }),
                Err(error) => {
                    tracing::debug!("Skipping unresolvable reference {}: {}", raw, error);
                    unresolved.push(UnresolvedReference {
                        original_url: raw.clone(),
                        asset_class,
                        error,
                    });
                }
            }
        }

        Scan {
            base_url,
            references,
            unresolved,
        }
    }

    /// Replaces the attribute value of every reference that has a local path.
    ///
    /// `html` must be the same bytes the references were scanned from. References
    /// without a local path keep their original value.
    pub fn apply(html: impl AsRef<[u8]>, references: &[AssetReference]) -> Vec<u8> {
        let html = html.as_ref();
        let mut replacements: Vec<(Range<usize>, &str)> = references
            .iter()
            .filter_map(|r| r.local_relative_path.as_deref().map(|p| (r.span(), p)))
            .filter(|(span, _)| span.start <= span.end && span.end <= html.len())
            .collect();
        replacements.sort_by_key(|(span, _)| span.start);

        let mut rewritten = Vec::with_capacity(html.len());
        let mut cursor = 0;
        for (span, local_path) in replacements {
            if span.start < cursor {
                continue;
            }
            rewritten.extend_from_slice(&html[cursor..span.start]);
            rewritten.extend_from_slice(local_path.as_bytes());
            cursor = span.end;
        }
        rewritten.extend_from_slice(&html[cursor..]);
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> HtmlRewriter {
        HtmlRewriter::new(&Url::parse("https://example.com/play/").unwrap())
    }

    #[test]
    fn test_scan_finds_assets_in_document_order() {
        let html = r#"
            <html>
                <head>
                    <link rel="stylesheet" href="/style.css">
                    <link rel="icon" href="/favicon.ico">
                    <script src="game.js"></script>
                    <script>var inline = 1;</script>
                </head>
                <body>
                    <img src="img/hero.png" alt="hero">
                    <link rel="alternate stylesheet" href="//cdn.example.com/alt.css">
                    <a href="/other">Link</a>
                </body>
            </html>
        "#;

        let scan = rewriter().scan(html);
        let found: Vec<_> = scan
            .references
            .iter()
            .map(|r| (r.asset_class, r.resolved_url.as_str()))
            .collect();

        assert_eq!(
            found,
            vec![
                (AssetClass::Stylesheet, "https://example.com/style.css"),
                (AssetClass::Script, "https://example.com/play/game.js"),
                (AssetClass::Image, "https://example.com/play/img/hero.png"),
                (AssetClass::Stylesheet, "https://cdn.example.com/alt.css"),
            ]
        );
        assert!(scan.unresolved.is_empty());
    }

    #[test]
    fn test_data_uri_images_are_not_references() {
        let html = r#"<img src="data:image/gif;base64,R0lGOD"><img src="a.png">"#;
        let scan = rewriter().scan(html);
        assert_eq!(scan.references.len(), 1);
        assert_eq!(scan.references[0].original_url, "a.png");
        assert!(scan.unresolved.is_empty());
    }

    #[test]
    fn test_markup_inside_scripts_and_comments_is_ignored() {
        let html = concat!(
            "<!-- <img src=\"commented.png\"> -->",
            "<script>document.write('<img src=\"fake.png\">');</script>",
            "<img src=\"real.png\">",
        );
        let scan = rewriter().scan(html);
        assert_eq!(scan.references.len(), 1);
        assert_eq!(scan.references[0].original_url, "real.png");
    }

    #[test]
    fn test_quoting_styles_and_case() {
        let html = "<IMG SRC='one.png'><img src=two.png /><Script Src=\"three.js\"></Script>";
        let scan = rewriter().scan(html);
        let originals: Vec<_> = scan.references.iter().map(|r| r.original_url.as_str()).collect();
        assert_eq!(originals, vec!["one.png", "two.png", "three.js"]);
    }

    #[test]
    fn test_base_href_overrides_page_url() {
        let html = r#"<head><base href="https://static.example.net/v2/"></head><img src="x.png">"#;
        let scan = rewriter().scan(html);
        assert_eq!(scan.base_url.as_str(), "https://static.example.net/v2/");
        assert_eq!(
            scan.references[0].resolved_url.as_str(),
            "https://static.example.net/v2/x.png"
        );
    }

    #[test]
    fn test_entities_are_decoded_before_resolution() {
        let html = r#"<script src="loader.js?a=1&amp;b=2"></script>"#;
        let scan = rewriter().scan(html);
        assert_eq!(scan.references[0].original_url, "loader.js?a=1&amp;b=2");
        assert_eq!(
            scan.references[0].resolved_url.as_str(),
            "https://example.com/play/loader.js?a=1&b=2"
        );
    }

    #[test]
    fn test_unsupported_reference_is_reported() {
        let html = r#"<img src="javascript:alert(1)"><img src="ok.png">"#;
        let scan = rewriter().scan(html);
        assert_eq!(scan.references.len(), 1);
        assert_eq!(scan.unresolved.len(), 1);
        assert_eq!(scan.unresolved[0].asset_class, AssetClass::Image);
    }

    #[test]
    fn test_apply_rewrites_only_localized_references() {
        let html = r#"<link href="s.css" rel="stylesheet">
<img   src="a.png"  class="x"><img src="b.png">"#;
        let mut scan = rewriter().scan(html);
        scan.references[0].local_relative_path = Some("css/s.css".to_string());
        scan.references[2].local_relative_path = Some("images/b.png".to_string());

        let rewritten = String::from_utf8(HtmlRewriter::apply(html, &scan.references)).unwrap();
        assert_eq!(
            rewritten,
            r#"<link href="css/s.css" rel="stylesheet">
<img   src="a.png"  class="x"><img src="images/b.png">"#
        );
    }

    #[test]
    fn test_apply_without_local_paths_is_identity() {
        let html = "<html>\n  <body><img src=\"a.png\">\n</body></html>\n";
        let scan = rewriter().scan(html);
        assert_eq!(HtmlRewriter::apply(html, &scan.references), html.as_bytes());
    }

    #[test]
    fn test_latin1_text_survives_rewrite() {
        let html = b"<p>caf\xE9 cr\xE8me</p><img alt=\"\xE9t\xE9\" src=\"a.png\"><p>\xA9 2009</p>";

        let mut scan = rewriter().scan(html);
        assert_eq!(scan.references.len(), 1);
        assert_eq!(scan.references[0].original_url, "a.png");
        scan.references[0].local_relative_path = Some("images/a.png".to_string());

        let rewritten = HtmlRewriter::apply(html, &scan.references);
        assert_eq!(
            rewritten,
            b"<p>caf\xE9 cr\xE8me</p><img alt=\"\xE9t\xE9\" src=\"images/a.png\"><p>\xA9 2009</p>"
        );
        assert!(!rewritten.windows(3).any(|w| w == [0xEF, 0xBF, 0xBD]));
    }

    #[test]
    fn test_apostrophe_in_unquoted_value_does_not_swallow_tags() {
        let html = r#"<img alt=it's src="a.png"><script src="b.js"></script><p>Don't</p><img src="c.png">"#;
        let scan = rewriter().scan(html);
        let originals: Vec<_> = scan.references.iter().map(|r| r.original_url.as_str()).collect();
        assert_eq!(originals, vec!["a.png", "b.js", "c.png"]);
    }

    #[test]
    fn test_empty_comments_end_immediately() {
        let html = r#"<!--><img src="a.png"><!---><img src="b.png"><!-- real --><img src="c.png">"#;
        let scan = rewriter().scan(html);
        let originals: Vec<_> = scan.references.iter().map(|r| r.original_url.as_str()).collect();
        assert_eq!(originals, vec!["a.png", "b.png", "c.png"]);
    }
}
