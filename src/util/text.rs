/// Truncates to at most `max_chars` characters, respecting char boundaries.
///
/// Used for stored error messages and embedded HTTP error bodies.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through() {
        assert_eq!(truncate_chars("ok", 10), "ok");
        assert_eq!(truncate_chars("", 10), "");
    }

    #[test]
    fn long_text_is_cut_at_char_count() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("ééééé", 3), "ééé");
    }
}
