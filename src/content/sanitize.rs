//! HTML sanitization and URL rewriting.
//!
//! Extracted content is rebuilt from scratch out of a tag allow-list rather
//! than filtered in place: anything not explicitly allowed either disappears
//! with its subtree (scripts, embeds, forms) or is unwrapped so its text
//! survives (layout wrappers, custom elements).

use scraper::{ElementRef, Html, Node};
use url::Url;

use crate::util::collapse_whitespace;

/// Tags copied to the output (with filtered attributes)
const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "blockquote", "pre",
    "code", "em", "strong", "b", "i", "u", "s", "sub", "sup", "a", "img", "figure", "figcaption",
    "table", "thead", "tbody", "tr", "th", "td", "span", "div", "dl", "dt", "dd", "abbr", "cite",
    "q", "small", "mark", "del", "ins", "time",
];

/// Tags removed together with everything inside them
const DROPPED_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "form", "noscript", "template", "svg", "math",
    "head", "title", "meta", "link", "base", "button", "select", "textarea", "input", "video",
    "audio", "canvas",
];

const VOID_TAGS: &[&str] = &["br", "hr", "img"];

/// Lazy-loading attributes checked before `src`; `src` is often a placeholder.
const IMAGE_SOURCE_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original", "src"];

/// Elements that separate words when flattening to text
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "hr", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "pre", "tr", "td", "th", "table", "section", "article", "header", "footer", "figure",
    "figcaption", "dd", "dt", "dl", "main", "aside", "nav",
];

/// Nesting beyond this depth is flattened to text.
const MAX_DEPTH: usize = 256;

/// Sanitize an HTML fragment for display.
///
/// Relative `href`/`src` values are resolved against `base_url`. When the base
/// is not a valid absolute URL, relative references are dropped instead.
///
/// # Examples
///
/// ```
/// use feedwell::content::sanitize_html;
///
/// let html = r#"<p onclick="x()">Hi <a href="/about">there</a><script>bad()</script></p>"#;
/// assert_eq!(
///     sanitize_html(html, "https://example.com/posts/1"),
///     r#"<p>Hi <a href="https://example.com/about" rel="noopener noreferrer" target="_blank">there</a></p>"#
/// );
/// ```
pub fn sanitize_html(html: &str, base_url: &str) -> String {
    let base = Url::parse(base_url).ok();
    let fragment = Html::parse_fragment(html);

    let mut out = String::with_capacity(html.len());
    write_children(fragment.root_element(), base.as_ref(), &mut out, 0);
    out.trim().to_string()
}

/// Flatten HTML to plain text with collapsed whitespace.
///
/// Dropped subtrees (scripts, styles, etc.) contribute no text.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len() / 2);
    collect_text(fragment.root_element(), &mut out, 0);
    collapse_whitespace(&out)
}

/// Plain-text length of an element, ignoring dropped subtrees.
pub(crate) fn element_text_len(element: ElementRef<'_>) -> usize {
    let mut out = String::new();
    collect_text(element, &mut out, 0);
    collapse_whitespace(&out).chars().count()
}

fn collect_text(element: ElementRef<'_>, out: &mut String, depth: usize) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if DROPPED_TAGS.contains(&name) || depth >= MAX_DEPTH {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push(' ');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out, depth + 1);
                }
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn write_children(element: ElementRef<'_>, base: Option<&Url>, out: &mut String, depth: usize) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&html_escape::encode_text(&**text)),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_element(child_el, base, out, depth + 1);
                }
            }
            // Comments, doctypes and processing instructions
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, base: Option<&Url>, out: &mut String, depth: usize) {
    let name = element.value().name();

    if DROPPED_TAGS.contains(&name) {
        return;
    }

    if depth >= MAX_DEPTH {
        let mut text = String::new();
        collect_text(element, &mut text, depth);
        out.push_str(&html_escape::encode_text(&text));
        return;
    }

    if !ALLOWED_TAGS.contains(&name) {
        write_children(element, base, out, depth);
        return;
    }

    let attrs = match name {
        "a" => match link_attrs(element, base) {
            Some(attrs) => attrs,
            // A link without a usable target is just text
            None => {
                write_children(element, base, out, depth);
                return;
            }
        },
        "img" => match image_attrs(element, base) {
            Some(attrs) => attrs,
            None => return,
        },
        "td" | "th" => numeric_attrs(element, &["colspan", "rowspan"]),
        "time" => text_attrs(element, &["datetime"]),
        "abbr" => text_attrs(element, &["title"]),
        _ => Vec::new(),
    };

    out.push('<');
    out.push_str(name);
    for (attr, value) in &attrs {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&html_escape::encode_double_quoted_attribute(value));
        out.push('"');
    }
    out.push('>');

    if VOID_TAGS.contains(&name) {
        return;
    }

    write_children(element, base, out, depth);

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn link_attrs(element: ElementRef<'_>, base: Option<&Url>) -> Option<Vec<(&'static str, String)>> {
    let href = element
        .value()
        .attr("href")
        .and_then(|href| resolve_url(href, base, true))?;

    let mut attrs = vec![("href", href)];
    attrs.extend(text_attrs(element, &["title"]));
    attrs.push(("rel", "noopener noreferrer".to_string()));
    attrs.push(("target", "_blank".to_string()));
    Some(attrs)
}

fn image_attrs(element: ElementRef<'_>, base: Option<&Url>) -> Option<Vec<(&'static str, String)>> {
    let el = element.value();

    let src = IMAGE_SOURCE_ATTRS
        .iter()
        .filter_map(|attr| el.attr(attr))
        .chain(el.attr("srcset").and_then(first_srcset_candidate))
        .chain(el.attr("data-srcset").and_then(first_srcset_candidate))
        .find_map(|candidate| resolve_url(candidate, base, false))?;

    let mut attrs = vec![("src", src)];
    attrs.extend(text_attrs(element, &["alt", "title"]));
    attrs.extend(numeric_attrs(element, &["width", "height"]));
    Some(attrs)
}

/// First URL of a `srcset` list: `"a.jpg 1x, b.jpg 2x"` yields `"a.jpg"`.
fn first_srcset_candidate(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()
        .and_then(|candidate| candidate.split_whitespace().next())
        .filter(|url| !url.is_empty())
}

fn text_attrs(element: ElementRef<'_>, names: &[&'static str]) -> Vec<(&'static str, String)> {
    names
        .iter()
        .filter_map(|&name| {
            let value = element.value().attr(name)?.trim();
            (!value.is_empty()).then(|| (name, value.to_string()))
        })
        .collect()
}

fn numeric_attrs(element: ElementRef<'_>, names: &[&'static str]) -> Vec<(&'static str, String)> {
    names
        .iter()
        .filter_map(|&name| {
            let value = element.value().attr(name)?.trim();
            let digits_only = !value.is_empty() && value.len() <= 5 && value.bytes().all(|b| b.is_ascii_digit());
            digits_only.then(|| (name, value.to_string()))
        })
        .collect()
}

/// Resolve a reference against the base URL, keeping only web links
/// (and `mailto:` for anchors).
fn resolve_url(raw: &str, base: Option<&Url>, allow_mailto: bool) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let resolved = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        "mailto" if allow_mailto => Some(resolved.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: &str = "https://blog.example.com/2024/05/post.html";

    #[test]
    fn test_allowed_markup_kept() {
        let html = "<h2>Title</h2><p>Some <strong>bold</strong> and <em>italic</em></p><ul><li>One</li></ul>";
        assert_eq!(sanitize_html(html, BASE), html);
    }

    #[test]
    fn test_script_and_style_dropped_with_content() {
        let html = "<p>Keep</p><script>alert(1)</script><style>p{}</style><noscript>nojs</noscript>";
        assert_eq!(sanitize_html(html, BASE), "<p>Keep</p>");
    }

    #[test]
    fn test_unknown_tags_unwrapped() {
        let html = "<section><custom-card><p>Inside</p></custom-card></section>";
        assert_eq!(sanitize_html(html, BASE), "<p>Inside</p>");
    }

    #[test]
    fn test_event_handlers_and_styles_removed() {
        let html = r#"<p style="color:red" onclick="steal()" class="x">Text</p>"#;
        assert_eq!(sanitize_html(html, BASE), "<p>Text</p>");
    }

    #[test]
    fn test_relative_links_resolved() {
        let html = r#"<a href="../04/older.html">Older</a>"#;
        assert_eq!(
            sanitize_html(html, BASE),
            r#"<a href="https://blog.example.com/2024/04/older.html" rel="noopener noreferrer" target="_blank">Older</a>"#
        );
    }

    #[test]
    fn test_javascript_link_unwrapped() {
        let html = r#"<p><a href="javascript:alert(1)">click</a></p>"#;
        assert_eq!(sanitize_html(html, BASE), "<p>click</p>");
    }

    #[test]
    fn test_mailto_allowed_for_links_only() {
        let html = r#"<a href="mailto:me@example.com">Mail</a><img src="mailto:me@example.com">"#;
        assert_eq!(
            sanitize_html(html, BASE),
            r#"<a href="mailto:me@example.com" rel="noopener noreferrer" target="_blank">Mail</a>"#
        );
    }

    #[test]
    fn test_lazy_image_promoted() {
        let html = r#"<img src="data:image/gif;base64,R0lGOD" data-src="/img/photo.jpg" alt="Photo" width="640" height="auto">"#;
        assert_eq!(
            sanitize_html(html, BASE),
            r#"<img src="https://blog.example.com/img/photo.jpg" alt="Photo" width="640">"#
        );
    }

    #[test]
    fn test_srcset_used_when_src_missing() {
        let html = r#"<img srcset="small.jpg 480w, large.jpg 1080w" alt="">"#;
        assert_eq!(
            sanitize_html(html, BASE),
            r#"<img src="https://blog.example.com/2024/05/small.jpg">"#
        );
    }

    #[test]
    fn test_image_without_source_dropped() {
        assert_eq!(sanitize_html(r#"<p>a<img alt="x">b</p>"#, BASE), "<p>ab</p>");
    }

    #[test]
    fn test_relative_refs_dropped_without_base() {
        let html = r#"<a href="/x">x</a><img src="/y.png">"#;
        assert_eq!(sanitize_html(html, "not a url"), "x");
    }

    #[test]
    fn test_text_and_attributes_escaped() {
        let html = r#"<p>1 &lt; 2 &amp; "q"</p><a href="https://e.com/?a=1&amp;b=2" title='say "hi"'>x</a>"#;
        assert_eq!(
            sanitize_html(html, BASE),
            r#"<p>1 &lt; 2 &amp; "q"</p><a href="https://e.com/?a=1&amp;b=2" title="say &quot;hi&quot;" rel="noopener noreferrer" target="_blank">x</a>"#
        );
    }

    #[test]
    fn test_comments_dropped() {
        assert_eq!(sanitize_html("<p>a<!-- secret -->b</p>", BASE), "<p>ab</p>");
    }

    #[test]
    fn test_table_attributes() {
        let html = r#"<table><tbody><tr><td colspan="2" bgcolor="red">x</td><th rowspan="x">y</th></tr></tbody></table>"#;
        assert_eq!(
            sanitize_html(html, BASE),
            r#"<table><tbody><tr><td colspan="2">x</td><th>y</th></tr></tbody></table>"#
        );
    }

    #[test]
    fn test_html_to_text() {
        let html = "<h1>Title</h1><p>First\n  paragraph</p><p>Second<script>x()</script></p>";
        assert_eq!(html_to_text(html), "Title First paragraph Second");
    }

    #[test]
    fn test_html_to_text_decodes_entities() {
        assert_eq!(html_to_text("Fish &amp; chips &#8212; &quot;good&quot;"), "Fish & chips \u{2014} \"good\"");
    }

    #[test]
    fn test_first_srcset_candidate() {
        assert_eq!(first_srcset_candidate("a.jpg 1x, b.jpg 2x"), Some("a.jpg"));
        assert_eq!(first_srcset_candidate("  only.png  "), Some("only.png"));
        assert_eq!(first_srcset_candidate(""), None);
    }
}
