//! Comment text cleaning and the emoji-only filter.

/// Code point ranges treated as emoji / pictographs.
const EMOJI_RANGES: &[(u32, u32)] = &[
    (0x1F600, 0x1F64F), // emoticons
    (0x1F300, 0x1F5FF), // symbols & pictographs
    (0x1F680, 0x1F6FF), // transport & map
    (0x1F1E0, 0x1F1FF), // flags
    (0x2702, 0x27B0),   // dingbats
    (0x2600, 0x26FF),   // miscellaneous symbols
    (0x24C2, 0x24C2),   // circled M
    (0x1F100, 0x1F251), // enclosed alphanumeric / ideographic supplements
    (0x1F900, 0x1F9FF), // supplemental symbols
    (0x1FA70, 0x1FAFF), // symbols & pictographs extended-A
];

/// Joiners and selectors that only appear inside emoji sequences.
const EMOJI_MODIFIERS: &[char] = &['\u{200D}', '\u{FE0E}', '\u{FE0F}', '\u{20E3}'];

fn is_emoji(c: char) -> bool {
    let cp = c as u32;
    EMOJI_MODIFIERS.contains(&c)
        || (0x1F3FB..=0x1F3FF).contains(&cp)
        || EMOJI_RANGES
            .iter()
            .any(|&(start, end)| (start..=end).contains(&cp))
}

/// Whether a comment carries no text besides emoji and whitespace.
///
/// Empty and whitespace-only comments count as emoji-only.
pub fn is_emoji_only(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace() || is_emoji(c))
}

/// Prepare comment text for a single output line.
pub fn clean_comment_text(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}
