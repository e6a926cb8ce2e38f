//! Text and URL helpers shared by the pipeline and the store.

/// Query parameters that carry tracking state and would split one document
/// into several upsert keys.
const TRACKING_PARAMS: &[&str] = &[
    "_dt",
    "fbclid",
    "gclid",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "spm",
    "mc_cid",
    "mc_eid",
];

/// True when `s` holds at least one CJK unified ideograph (basic block or
/// extension A).
pub fn contains_cjk(s: &str) -> bool {
    s.chars()
        .any(|c| matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}'))
}

/// Canonical form of a document URL: lowercase scheme/host, no fragment, no
/// tracking parameters. Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    parsed.set_fragment(None);

    if parsed.query().is_some() {
        let total = parsed.query_pairs().count();
        let clean_pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        // Untouched queries keep their original encoding.
        if clean_pairs.is_empty() {
            parsed.set_query(None);
        } else if clean_pairs.len() < total {
            parsed.query_pairs_mut().clear().extend_pairs(clean_pairs);
        }
    }

    parsed.to_string()
}

/// Lowercased host of `raw`, without scheme, userinfo, port or path.
///
/// Parsed by hand rather than through `url::Url` so internationalized hosts
/// keep their original characters instead of punycode.
pub fn url_host(raw: &str) -> Option<String> {
    let s = raw.trim();
    let after_scheme = match s.find("://") {
        Some(i) => &s[i + 3..],
        None => s,
    };
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = host_port.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Single-line preview of at most `max_chars` characters, with an ellipsis
/// when cut.
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &flat[..end]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_detection() {
        assert!(contains_cjk("华为发布新品"));
        assert!(contains_cjk("Huawei 发布"));
        assert!(!contains_cjk("Huawei releases a phone"));
        assert!(!contains_cjk(""));
    }

    #[test]
    fn normalize_strips_tracking_and_fragment() {
        assert_eq!(
            normalize_url("https://www.gd.gov.cn/news/1.html?utm_source=wx&id=7#top"),
            "https://www.gd.gov.cn/news/1.html?id=7"
        );
        assert_eq!(
            normalize_url(" HTTPS://Example.COM/a "),
            "https://example.com/a"
        );
    }

    #[test]
    fn normalize_leaves_clean_query_encoding_alone() {
        for url in [
            "https://www.gov.cn/search?q=%E6%95%B0%E6%8D%AE+%E8%A6%81%E7%B4%A0&page=2",
            "https://news.example.com/list?q=a%20b&sort=desc",
            "https://news.example.com/list?tag=a,b",
        ] {
            assert_eq!(normalize_url(url), url);
        }
        assert_eq!(
            normalize_url("https://news.example.com/list?q=a%20b#x"),
            "https://news.example.com/list?q=a%20b"
        );
    }

    #[test]
    fn normalize_keeps_unparseable_input() {
        assert_eq!(normalize_url("  not a url "), "not a url");
    }

    #[test]
    fn host_extraction_handles_ports_userinfo_and_bare_hosts() {
        assert_eq!(
            url_host("https://user:pw@ZJ.gov.cn:8443/a/b?c=d").as_deref(),
            Some("zj.gov.cn")
        );
        assert_eq!(url_host("www.beijing.gov.cn/zwgk").as_deref(), Some("www.beijing.gov.cn"));
        assert_eq!(url_host("http://广东.政务.cn/x").as_deref(), Some("广东.政务.cn"));
        assert_eq!(url_host(""), None);
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("一二三\n四五", 3), "一二三…");
        assert_eq!(preview("short", 10), "short");
    }
}
