use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use url::Url;

use crate::util::normalize_url;

/// Nested elements inside a captured field beyond this depth are ignored.
const MAX_FIELD_DEPTH: usize = 64;

/// Content of the feed entry that matches an article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContent {
    /// Entry body as HTML (unsanitized)
    pub html: String,
    /// True when taken from full content (`content:encoded`, Atom `<content>`)
    /// rather than a summary/description
    pub is_full_content: bool,
    pub title: Option<String>,
}

/// Locate the entry for `article_url` in a feed document and return its content.
///
/// Entries match on any link or on their id/guid, compared after URL
/// normalization. Full content is preferred over the summary. Documents that
/// `feed-rs` rejects are retried with a lenient scanner that keeps whatever
/// entries it can read before the first unrecoverable error.
pub fn find_entry_content(feed_bytes: &[u8], article_url: &str) -> Option<EntryContent> {
    let target = normalize_url(article_url);
    if target.is_empty() {
        return None;
    }
    let base = Url::parse(article_url).ok();

    match feed_rs::parser::parse(feed_bytes) {
        Ok(feed) => find_in_parsed(feed, &target, base.as_ref()),
        Err(e) => {
            tracing::debug!(error = %e, "Feed rejected by parser, scanning leniently");
            scan_entries(feed_bytes)
                .into_iter()
                .find(|entry| entry.matches(&target, base.as_ref()))
                .and_then(RawEntry::into_content)
        }
    }
}

fn matches_target(candidate: &str, target: &str, base: Option<&Url>) -> bool {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return false;
    }
    if normalize_url(candidate) == target {
        return true;
    }
    // Relative entry links: the article lives on the same site as its entry
    match (Url::parse(candidate), base) {
        (Err(url::ParseError::RelativeUrlWithoutBase), Some(base)) => base
            .join(candidate)
            .is_ok_and(|resolved| normalize_url(resolved.as_str()) == target),
        _ => false,
    }
}

fn find_in_parsed(feed: feed_rs::model::Feed, target: &str, base: Option<&Url>) -> Option<EntryContent> {
    let entry = feed.entries.into_iter().find(|entry| {
        entry
            .links
            .iter()
            .any(|link| matches_target(&link.href, target, base))
            || matches_target(&entry.id, target, base)
    })?;

    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());

    if let Some(body) = entry
        .content
        .and_then(|c| c.body)
        .filter(|body| !body.trim().is_empty())
    {
        return Some(EntryContent {
            html: body,
            is_full_content: true,
            title,
        });
    }

    let summary = entry.summary.filter(|s| !s.content.trim().is_empty())?;
    // Some parsers label RSS descriptions as plain text even when they hold markup
    let html = if is_plain_text(&summary.content_type) && !looks_like_html(&summary.content) {
        format!("<p>{}</p>", html_escape::encode_text(summary.content.trim()))
    } else {
        summary.content
    };

    Some(EntryContent {
        html,
        is_full_content: false,
        title,
    })
}

/// True for a `text/plain` media type, parameters ignored.
fn is_plain_text(content_type: &impl std::fmt::Display) -> bool {
    content_type
        .to_string()
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/plain"))
}

/// True if the text contains something shaped like a tag (`<p`, `</div`, `<!--`).
fn looks_like_html(text: &str) -> bool {
    text.match_indices('<').any(|(i, _)| {
        text[i + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
    })
}

// ============================================================================
// Lenient scanner
// ============================================================================

/// Which entry field text is currently being captured into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Link,
    Id,
    Title,
    FullContent,
    Summary,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"link" => Some(Field::Link),
            b"guid" | b"id" => Some(Field::Id),
            b"title" => Some(Field::Title),
            // content:encoded, Atom <content>
            b"encoded" | b"content" => Some(Field::FullContent),
            b"description" | b"summary" => Some(Field::Summary),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawEntry {
    links: Vec<String>,
    ids: Vec<String>,
    title: String,
    full_content: String,
    summary: String,
}

impl RawEntry {
    fn push(&mut self, field: Field, text: &str) {
        match field {
            // Link and id text arrive as single values; pushing appends to the last one
            Field::Link => append_to_last(&mut self.links, text),
            Field::Id => append_to_last(&mut self.ids, text),
            Field::Title => self.title.push_str(text),
            Field::FullContent => self.full_content.push_str(text),
            Field::Summary => self.summary.push_str(text),
        }
    }

    fn start(&mut self, field: Field) {
        match field {
            Field::Link => self.links.push(String::new()),
            Field::Id => self.ids.push(String::new()),
            _ => {}
        }
    }

    fn matches(&self, target: &str, base: Option<&Url>) -> bool {
        self.links
            .iter()
            .chain(&self.ids)
            .any(|candidate| matches_target(candidate, target, base))
    }

    fn into_content(self) -> Option<EntryContent> {
        let title = Some(self.title.trim().to_string()).filter(|t| !t.is_empty());
        if !self.full_content.trim().is_empty() {
            return Some(EntryContent {
                html: self.full_content.trim().to_string(),
                is_full_content: true,
                title,
            });
        }
        if !self.summary.trim().is_empty() {
            return Some(EntryContent {
                html: self.summary.trim().to_string(),
                is_full_content: false,
                title,
            });
        }
        None
    }
}

fn append_to_last(values: &mut Vec<String>, text: &str) {
    match values.last_mut() {
        Some(last) => last.push_str(text),
        None => values.push(text.to_string()),
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(colon) => &name[colon + 1..],
        None => name,
    }
}

/// Decode entity-escaped text, accepting HTML entities (`&nbsp;`, `&mdash;`)
/// that strict XML unescaping rejects.
fn decode_text(raw: &[u8]) -> String {
    html_escape::decode_html_entities(&String::from_utf8_lossy(raw)).into_owned()
}

fn href_attr(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"href")
        .map(|attr| decode_text(&attr.value))
}

/// Scan `<item>`/`<entry>` elements with a forgiving XML reader.
///
/// Mismatched end tags are tolerated, CDATA is taken verbatim, and markup
/// nested inside a content field is re-serialized into the field text. The
/// scan stops at the first hard syntax error, keeping entries read so far
/// (including a partially read one).
fn scan_entries(bytes: &[u8]) -> Vec<RawEntry> {
    let mut reader = Reader::from_reader(bytes);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.trim_text(false);

    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut field: Option<Field> = None;
    // Depth of markup nested inside the captured field
    let mut nested: usize = 0;
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    position = reader.buffer_position(),
                    entries = entries.len(),
                    "Lenient feed scan stopped at syntax error"
                );
                break;
            }
        };

        match event {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if matches!(local, b"item" | b"entry") {
                    if let Some(done) = current.take() {
                        entries.push(done);
                    }
                    current = Some(RawEntry::default());
                    field = None;
                    nested = 0;
                } else if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    // Markup inside a field (unescaped XHTML content)
                    if nested < MAX_FIELD_DEPTH {
                        entry.push(f, &format!("<{}>", String::from_utf8_lossy(&e)));
                    }
                    nested += 1;
                } else if let Some(entry) = current.as_mut() {
                    if let Some(f) = Field::from_local_name(local) {
                        entry.start(f);
                        if f == Field::Link {
                            if let Some(href) = href_attr(&e) {
                                entry.push(f, &href);
                            }
                        }
                        field = Some(f);
                        nested = 0;
                    }
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push(f, &format!("<{}/>", String::from_utf8_lossy(&e)));
                } else if let Some(entry) = current.as_mut() {
                    // Atom: <link rel="alternate" href="..."/>
                    if local == b"link" {
                        if let Some(href) = href_attr(&e) {
                            entry.links.push(href);
                        }
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if matches!(local, b"item" | b"entry") {
                    if let Some(done) = current.take() {
                        entries.push(done);
                    }
                    field = None;
                } else if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    if nested > 0 {
                        nested -= 1;
                        if nested < MAX_FIELD_DEPTH {
                            entry.push(f, &format!("</{}>", String::from_utf8_lossy(local)));
                        }
                    } else {
                        field = None;
                    }
                }
            }
            Event::Text(e) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push(f, &decode_text(&e));
                }
            }
            Event::CData(e) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push(f, &String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(partial) = current {
        entries.push(partial);
    }
    entries
}
