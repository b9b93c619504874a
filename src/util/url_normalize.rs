use url::Url;

/// Reduces an article link to a canonical form for equality checks.
///
/// Feeds and front ends disagree on cosmetic details of the same link, so two
/// links are considered the same article when they differ only by:
/// - scheme (`http` vs `https`) or host case
/// - a `www.` host prefix
/// - a fragment
/// - a trailing slash on the path
/// - `utm_*` tracking query parameters (other parameters keep their order)
///
/// Strings that do not parse as absolute URLs are returned trimmed, so opaque
/// guids still compare by exact value.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    let Some(host) = url.host_str() else {
        return trimmed.to_string();
    };
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut out = String::with_capacity(trimmed.len());
    out.push_str(host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    let path = url.path().trim_end_matches('/');
    out.push_str(path);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !kept.is_empty() {
        out.push('?');
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        out.push_str(&query);
    }

    out
}
