/// Length in Unicode scalar values, the unit every character budget uses.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text.get(..idx).unwrap_or(text),
        None => text,
    }
}
