//! Keystroke extraction from the gateway's accumulated `text` field.
//!
//! The gateway resends the whole history on every turn, segments joined by
//! `*`. Only the last segment is new input.

pub const SEPARATOR: char = '*';

/// The segment after the final separator; the whole string when there is none.
pub fn last_segment(text: &str) -> &str {
    match text.rfind(SEPARATOR) {
        Some(pos) => &text[pos + SEPARATOR.len_utf8()..],
        None => text,
    }
}

/// Parse a keypad number, tolerating surrounding whitespace.
/// Rejects empty input, signs and anything that is not all ASCII digits.
pub fn parse_number(segment: &str) -> Option<u64> {
    let trimmed = segment.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Parse a 1-based menu index into a 0-based one.
pub fn parse_index(segment: &str) -> Option<usize> {
    let n = parse_number(segment)?;
    usize::try_from(n).ok()?.checked_sub(1)
}
