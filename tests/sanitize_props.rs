//! Property tests for the HTML sanitizer: whatever markup goes in, nothing
//! executable comes out and every surviving URL is absolute and safe.

use proptest::prelude::*;
use scraper::{Html, Selector};

use feedwell::content::{html_to_text, sanitize_html};
use feedwell::util::collapse_whitespace;

const BASE: &str = "https://blog.example.com/2024/post";

fn fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 .,!?&;]{0,30}",
        Just("<p>".to_string()),
        Just("</p>".to_string()),
        Just("<div class=\"x\">".to_string()),
        Just("</div>".to_string()),
        Just("<script>alert(1)</script>".to_string()),
        Just("<SCRIPT src=//evil.example/x.js></SCRIPT>".to_string()),
        Just("<style>body{display:none}</style>".to_string()),
        Just("<iframe src=\"https://evil.example\"></iframe>".to_string()),
        Just("<img src=x onerror=alert(1)>".to_string()),
        Just("<img src=\"/relative.png\">".to_string()),
        Just("<img src=\"data:image/png;base64,AAAA\">".to_string()),
        Just("<a href=\"javascript:alert(1)\">js</a>".to_string()),
        Just("<a href=\" JaVaScRiPt:alert(1)\">js</a>".to_string()),
        Just("<a href=\"/local\" onclick=\"steal()\">local</a>".to_string()),
        Just("<a href=\"mailto:a@example.com\">mail</a>".to_string()),
        Just("<a href=\"vbscript:msgbox\">vb</a>".to_string()),
        Just("<svg onload=alert(1)><circle/></svg>".to_string()),
        Just("<form action=\"/steal\"><input name=q></form>".to_string()),
        Just("<p style=\"background:url(javascript:x)\">styled</p>".to_string()),
        Just("<object data=\"x.swf\"></object>".to_string()),
        Just("<!-- comment -->".to_string()),
        Just("<math><mi xlink:href=\"javascript:x\">m</mi></math>".to_string()),
    ]
}

fn document() -> impl Strategy<Value = String> {
    prop::collection::vec(fragment(), 0..24).prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn prop_no_executable_markup(html in document()) {
        let clean = sanitize_html(&html, BASE);
        let lower = clean.to_lowercase();

        for needle in ["<script", "<style", "<iframe", "<svg", "<object", "<form", "<math", "javascript:", "vbscript:", "onerror", "onclick", "onload", "style="] {
            prop_assert!(!lower.contains(needle), "found {needle} in {clean}");
        }
    }

    #[test]
    fn prop_urls_are_absolute_and_safe(html in document()) {
        let clean = sanitize_html(&html, BASE);
        let parsed = Html::parse_fragment(&clean);

        let links = Selector::parse("a[href]").unwrap();
        for a in parsed.select(&links) {
            let href = a.value().attr("href").unwrap_or_default();
            prop_assert!(
                href.starts_with("https://") || href.starts_with("http://") || href.starts_with("mailto:"),
                "bad href {href}"
            );
        }

        let images = Selector::parse("img").unwrap();
        for img in parsed.select(&images) {
            let src = img.value().attr("src").unwrap_or_default();
            prop_assert!(
                src.starts_with("https://") || src.starts_with("http://"),
                "bad src {src:?}"
            );
        }
    }

    #[test]
    fn prop_sanitizing_is_stable(html in document()) {
        let once = sanitize_html(&html, BASE);
        prop_assert_eq!(sanitize_html(&once, BASE), once);
    }

    #[test]
    fn prop_escaped_text_survives(text in "[a-zA-Z0-9 .,;:!?&<>\"'-]{0,60}") {
        let html = format!("<p>{}</p>", html_escape::encode_text(&text));
        let clean = sanitize_html(&html, BASE);
        prop_assert_eq!(html_to_text(&clean), collapse_whitespace(&text));
    }
}
