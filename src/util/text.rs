use std::borrow::Cow;

/// Ellipsis appended to truncated snippets
const ELLIPSIS: &str = "...";

/// Collapses every run of whitespace (including newlines and NBSP) into a
/// single ASCII space and trims both ends.
///
/// Feed descriptions and extracted page text are full of indentation and
/// line breaks from the source markup; snippets are shown as one paragraph.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split(|c: char| c.is_whitespace() || c == '\u{a0}') {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Truncates a string to at most `max_chars` characters.
///
/// When truncation is needed the cut is moved back to the last word boundary
/// (if one exists in the second half of the kept text) and "..." is appended,
/// so the result is at most `max_chars + 3` characters long.
///
/// Returns `Cow::Borrowed` when the input already fits.
///
/// # Examples
///
/// ```
/// use feedwell::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello brave new world", 12), "Hello brave...");
/// assert_eq!(truncate_chars("日本語テキスト", 3), "日本語...");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    let Some((cut, _)) = s.char_indices().nth(max_chars) else {
        return Cow::Borrowed(s);
    };

    let kept = &s[..cut];
    let kept = match kept.rfind(char::is_whitespace) {
        Some(space) if space >= cut / 2 => &kept[..space],
        _ => kept,
    };

    Cow::Owned(format!("{}{}", kept.trim_end(), ELLIPSIS))
}

/// Removes C0 control characters (except tab, newline and carriage return)
/// and DEL from text taken out of feeds.
///
/// Some feeds embed stray control bytes copied from word processors; they are
/// invalid in XML 1.0 output and render as garbage in the browser.
///
/// Returns `Cow::Borrowed` when the input contains nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_control(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(
            collapse_whitespace("  Hello\n\n   world\t again\u{a0} "),
            "Hello world again"
        );
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace(" \n\t "), "");
    }

    #[test]
    fn test_truncate_fits_borrowed() {
        let result = truncate_chars("Fits fine", 9);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "Fits fine");
    }

    #[test]
    fn test_truncate_at_word_boundary() {
        assert_eq!(truncate_chars("The quick brown fox", 13), "The quick...");
    }

    #[test]
    fn test_truncate_long_word_cut_mid_word() {
        assert_eq!(truncate_chars("Supercalifragilistic", 5), "Super...");
    }

    #[test]
    fn test_truncate_multibyte_boundaries() {
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
        assert_eq!(truncate_chars("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_truncate_zero() {
        assert_eq!(truncate_chars("abc", 0), "...");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_strip_control_chars() {
        let clean = "line1\nline2\ttab\r\n";
        assert!(matches!(strip_control_chars(clean), Cow::Borrowed(_)));
        assert_eq!(strip_control_chars("a\u{0}b\u{8}c\u{7f}d\u{1b}e"), "abcde");
    }
}
