/// Keep the first `max_chars` characters (Unicode scalar values).
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Strip markdown code blocks from a response.
fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Outermost `{...}` span of a model response, after fence stripping.
/// Returns the stripped text unchanged when no object braces are present.
pub fn extract_json_object(response: &str) -> &str {
    let s = strip_code_blocks(response);
    match (s.find('{'), s.rfind('}')) {
        (Some(i), Some(j)) if i < j => &s[i..=j],
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("浙江省政府", 2), "浙江");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn extract_json_object_drops_surrounding_prose() {
        let raw = "Here you go:\n{\"summary\": \"摘要\"}\nThanks";
        assert_eq!(extract_json_object(raw), "{\"summary\": \"摘要\"}");
        assert_eq!(extract_json_object("no braces"), "no braces");
    }
}
