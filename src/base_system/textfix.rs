//! Text repair for scraped content.
//!
//! The site occasionally serves UTF-8 text that was decoded once too many
//! times through Windows-1252, producing sequences like `â€™` for `’` or
//! `Ã©` for `é`. `fix_text` reverses that round trip when it can, and
//! normalizes line endings and non-breaking spaces.

use std::borrow::Cow;

/// Repair mojibake and normalize whitespace characters.
pub fn fix_text(input: &str) -> Cow<'_, str> {
    if !needs_fix(input) {
        return Cow::Borrowed(input);
    }

    let mut text = input.replace("\r\n", "\n").replace('\r', "\n");
    text = text.replace('\u{a0}', " ");

    if looks_like_mojibake(&text)
        && let Some(repaired) = reverse_cp1252_round_trip(&text)
    {
        text = repaired;
    }

    Cow::Owned(text)
}

fn needs_fix(s: &str) -> bool {
    s.contains('\r') || s.contains('\u{a0}') || looks_like_mojibake(s)
}

fn looks_like_mojibake(s: &str) -> bool {
    // 0xC2/0xC3 lead bytes misread as characters cover the common Latin and
    // punctuation cases; "â€" is the UTF-8 punctuation block seen through
    // Windows-1252.
    s.contains('Ã') || s.contains('Â') || s.contains("â€")
}

/// Re-encode each character as its Windows-1252 byte and try to read the
/// result as UTF-8. Only returns `Some` when every character maps to a byte
/// and the bytes form valid UTF-8; otherwise the text was not mojibake.
fn reverse_cp1252_round_trip(s: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(s.len());
    for ch in s.chars() {
        bytes.push(cp1252_byte(ch)?);
    }
    let repaired = String::from_utf8(bytes).ok()?;
    // A successful repair must actually shrink the text; pure Latin-1
    // content round-trips to itself and is left alone upstream.
    (repaired.chars().count() < s.chars().count()).then_some(repaired)
}

fn cp1252_byte(ch: char) -> Option<u8> {
    let code = ch as u32;
    if code < 0x100 {
        return Some(code as u8);
    }
    let byte = match ch {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

#[cfg(test)]
mod tests {
    use super::fix_text;

    #[test]
    fn clean_text_is_borrowed_unchanged() {
        let input = "An ordinary chapter title";
        assert!(matches!(fix_text(input), std::borrow::Cow::Borrowed(_)));
    }

    #[test]
    fn smart_quote_mojibake_is_repaired() {
        assert_eq!(fix_text("wasnâ€™t"), "wasn’t");
        assert_eq!(fix_text("â€œquotedâ€\u{9d}"), "“quoted”");
    }

    #[test]
    fn accented_latin_mojibake_is_repaired() {
        assert_eq!(fix_text("cafÃ©"), "café");
        assert_eq!(fix_text("SeÃ±or"), "Señor");
    }

    #[test]
    fn genuine_accents_survive() {
        assert_eq!(fix_text("café\r\nsecond"), "café\nsecond");
    }

    #[test]
    fn nbsp_becomes_space() {
        assert_eq!(fix_text("a\u{a0}b"), "a b");
    }
}
