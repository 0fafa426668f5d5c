//! Head-and-tail truncation for large command transcripts.
//!
//! Reports must remain serializable without loss of structure even when a
//! debugger command prints megabytes of output, so truncation markers are
//! part of the data rather than a presentation concern.

/// Truncates `text` to at most `max_chars` characters, keeping the head
/// and tail and splicing a marker in between.
///
/// The marker has the fixed form `\n... [truncated, total N chars]\n`
/// where `N` is the original character count. Strings at or under the
/// limit are returned unchanged. The resulting string may slightly exceed
/// `max_chars` by the marker length; callers size their budgets with that
/// in mind.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }

    let head_chars = max_chars / 2;
    let tail_chars = max_chars - head_chars;

    let head_end = text
        .char_indices()
        .nth(head_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let tail_start = text
        .char_indices()
        .nth(total - tail_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());

    let mut result = String::with_capacity(text.len().min(max_chars) + 48);
    result.push_str(&text[..head_end]);
    result.push_str(&format!("\n... [truncated, total {total} chars]\n"));
    result.push_str(&text[tail_start..]);
    result
}

/// Returns `true` if the given value contains control characters other
/// than `\n`, `\r` and `\t`.
///
/// Decoded metadata values that fail this check are reported as the
/// placeholder `<binary>` instead of raw bytes.
pub fn has_binary_controls(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
}

/// Escapes control characters in a string for display, turning `\n`,
/// `\r` and `\t` into their escape sequences and other control
/// characters into `\u{XXXX}` form.
pub fn escape_controls(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:04x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_input_unchanged() {
        assert_eq!(truncate_middle("hello", 10), "hello");
        assert_eq!(truncate_middle("", 0), "");
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let input = "a".repeat(50) + &"b".repeat(50);
        let out = truncate_middle(&input, 20);

        assert!(out.starts_with("aaaaaaaaaa"));
        assert!(out.ends_with("bbbbbbbbbb"));
        assert!(out.contains("... [truncated, total 100 chars]"));
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        let input = "é".repeat(100);
        let out = truncate_middle(&input, 10);
        assert!(out.contains("total 100 chars"));
        // must not split a character
        assert!(out.starts_with(&"é".repeat(5)));
    }

    #[test]
    fn test_has_binary_controls() {
        assert!(!has_binary_controls("plain\nmulti\tline\r"));
        assert!(has_binary_controls("nul\0byte"));
        assert!(has_binary_controls("\u{1}"));
    }

    #[test]
    fn test_escape_controls() {
        assert_eq!(escape_controls("a\nb\tc"), "a\\nb\\tc");
        assert_eq!(escape_controls("x\u{1}y"), "x\\u{0001}y");
    }
}
