//! Main-body isolation for article pages.
//!
//! Three passes over the parsed document:
//!
//! 1. Remove subtrees that are never article text (scripts, navigation,
//!    forms) and elements whose class/id marks them as boilerplate, then
//!    re-parse so later passes only see what is left.
//! 2. Try well-known content containers in priority order.
//! 3. Fall back to scoring the parents of `<p>` elements by the amount of
//!    paragraph text they hold, penalised by link density.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::OnceLock;

use super::sanitize::element_text_len;

/// Minimum plain-text length for a candidate to count as the article body
pub const MIN_CONTENT_CHARS: usize = 200;

/// Paragraphs shorter than this do not contribute to scoring
const MIN_PARAGRAPH_CHARS: usize = 25;

const UNWANTED_TAGS: &str = "script, style, noscript, iframe, form, nav, header, footer, aside, \
                             svg, button, input, select, textarea, [hidden], [aria-hidden=true]";

/// Whole class/id tokens (a trailing `s` is also accepted) that mark boilerplate
const BOILERPLATE_PATTERNS: &[&str] = &[
    "comment", "share", "sharing", "social", "sidebar", "ad", "advert", "advertisement", "sponsored",
    "promo", "related", "newsletter", "cookie", "popup", "subscribe", "breadcrumb", "menu", "footer",
    "header", "nav", "navbar", "navigation",
];

const CONTENT_PATTERNS: &[&str] = &["article", "content", "post", "entry", "main", "body"];

/// Known article containers across common blog platforms and CMSs.
/// Order matters: more specific selectors first, generic fallbacks last.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[itemprop=articleBody]",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".article-body",
    ".post-body",
    "main",
    "#content",
    ".content",
];

struct Selectors {
    unwanted: Selector,
    classed: Selector,
    content: Vec<Selector>,
    paragraph: Selector,
    link: Selector,
    og_title: Selector,
    title: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        unwanted: parse_selector(UNWANTED_TAGS),
        classed: parse_selector("[class], [id]"),
        content: CONTENT_SELECTORS.iter().map(|s| parse_selector(s)).collect(),
        paragraph: parse_selector("p"),
        link: parse_selector("a"),
        og_title: parse_selector(r#"meta[property="og:title"], meta[name="twitter:title"]"#),
        title: parse_selector("title"),
    })
}

/// Parse a selector from the constant tables above (covered by tests).
fn parse_selector(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector must parse")
}

/// The isolated article body and page title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    pub title: Option<String>,
    /// Inner HTML of the chosen container, unsanitized
    pub body: Option<String>,
}

/// Isolate the main article body of a page, returning its inner HTML.
///
/// Returns `None` when no candidate holds at least [`MIN_CONTENT_CHARS`]
/// characters of text.
pub fn extract_main_content(html: &str) -> Option<String> {
    extract_article(html).body
}

/// Read the page title and isolate the main body in one parse.
pub fn extract_article(html: &str) -> PageContent {
    let document = Html::parse_document(html);
    let title = page_title(&document);

    let document = without_boilerplate(document);

    let body = select_known_container(&document)
        .or_else(|| best_scored_candidate(&document))
        .map(|el| el.inner_html());

    PageContent { title, body }
}

/// Page title from `og:title` (usually free of the " | Site Name" suffix),
/// else `<title>`.
fn page_title(document: &Html) -> Option<String> {
    let s = selectors();
    document
        .select(&s.og_title)
        .filter_map(|meta| meta.value().attr("content"))
        .map(|content| crate::util::collapse_whitespace(content))
        .find(|title| !title.is_empty())
        .or_else(|| {
            document
                .select(&s.title)
                .map(|t| crate::util::collapse_whitespace(&t.text().collect::<String>()))
                .find(|title| !title.is_empty())
        })
}

/// Drop unwanted subtrees and return a fresh parse of what remains.
///
/// `Html::select` walks the whole node arena, detached nodes included, so the
/// cleaned markup is parsed again before any selection runs on it.
fn without_boilerplate(mut document: Html) -> Html {
    let s = selectors();

    let mut doomed: Vec<_> = document.select(&s.unwanted).map(|el| el.id()).collect();
    doomed.extend(
        document
            .select(&s.classed)
            .filter(|el| !matches!(el.value().name(), "html" | "body" | "article" | "main"))
            .filter(|el| is_boilerplate(el))
            .map(|el| el.id()),
    );

    let removed = doomed.len();
    for id in doomed {
        // Already detached along with an ancestor is fine; detach is idempotent.
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
    tracing::trace!(removed, "Removed boilerplate elements");

    if removed == 0 {
        return document;
    }
    Html::parse_document(&document.root_element().html())
}

/// An element is boilerplate when one of its class/id names is, and none of
/// them marks content.
///
/// Names are split into tokens on `-` and `_`. A name is boilerplate if any
/// token is a boilerplate word (`post-comments`), and content if it has a
/// content token and no boilerplate token (`entry-content`).
fn is_boilerplate(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    let names = el
        .attr("class")
        .unwrap_or("")
        .split_whitespace()
        .chain(el.attr("id").map(str::trim).filter(|id| !id.is_empty()));

    let mut boilerplate = false;
    for name in names {
        let name = name.to_ascii_lowercase();
        let tokens: Vec<&str> = name.split(['-', '_']).filter(|t| !t.is_empty()).collect();
        if tokens.iter().any(|t| matches_word(t, BOILERPLATE_PATTERNS)) {
            boilerplate = true;
        } else if tokens.iter().any(|t| matches_word(t, CONTENT_PATTERNS)) {
            return false;
        }
    }
    boilerplate
}

fn matches_word(token: &str, words: &[&str]) -> bool {
    words
        .iter()
        .any(|w| token == *w || token.strip_suffix('s') == Some(*w))
}

fn select_known_container(document: &Html) -> Option<ElementRef<'_>> {
    let s = selectors();
    for (selector, name) in s.content.iter().zip(CONTENT_SELECTORS) {
        let best = document
            .select(selector)
            .map(|el| (element_text_len(el), el))
            .max_by_key(|(len, _)| *len);

        if let Some((len, el)) = best {
            if len >= MIN_CONTENT_CHARS {
                tracing::debug!(selector = %name, text_len = len, "Content container matched");
                return Some(el);
            }
        }
    }
    None
}

fn best_scored_candidate(document: &Html) -> Option<ElementRef<'_>> {
    let s = selectors();
    let mut scores: HashMap<_, f64> = HashMap::new();

    for paragraph in document.select(&s.paragraph) {
        let text: String = paragraph.text().collect();
        let len = text.trim().chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }

        let score = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);

        let Some(parent) = paragraph.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        *scores.entry(parent.id()).or_insert(0.0) += score;

        if let Some(grandparent) = parent.parent().and_then(ElementRef::wrap) {
            *scores.entry(grandparent.id()).or_insert(0.0) += score / 2.0;
        }
    }

    let (best, best_score) = scores
        .into_iter()
        .filter_map(|(id, score)| {
            let el = document.tree.get(id).and_then(ElementRef::wrap)?;
            Some((el, score * (1.0 - link_density(el))))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let len = element_text_len(best);
    tracing::debug!(
        tag = best.value().name(),
        score = best_score,
        text_len = len,
        "Best scored content candidate"
    );
    (len >= MIN_CONTENT_CHARS).then_some(best)
}

/// Share of an element's text that sits inside links (0.0 to 1.0).
fn link_density(element: ElementRef<'_>) -> f64 {
    let total = element_text_len(element);
    if total == 0 {
        return 1.0;
    }
    let linked: usize = element
        .select(&selectors().link)
        .map(|a| a.text().map(|t| t.trim().chars().count()).sum::<usize>())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}
