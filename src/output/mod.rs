// Output formatting — terminal display for the CLI.

pub mod terminal;

/// Shorten `text` to `max_chars` characters for log lines, marking the cut
/// with "...". Counts characters, so multi-byte text never splits mid-char.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
