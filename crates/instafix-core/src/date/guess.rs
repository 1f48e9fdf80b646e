use std::ops::Range;
use std::sync::LazyLock;

use regex::bytes::Regex;

use super::codec::{DigitStyle, Encoding};

struct TextPattern {
    regex: &'static LazyLock<Regex>,
    encoding: Encoding,
    /// Bytes per character.
    unit: usize,
}

// Only years 20xx are looked for; anything else is not a camera timestamp.
static ASCII_COMPACT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?-u)20[0-9]{12}").unwrap());
static ASCII_UNDERSCORED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?-u)20[0-9]{6}_[0-9]{6}").unwrap());
static UTF16_COMPACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)2\x000\x00(?:[0-9]\x00){12}").unwrap());
static UTF16_UNDERSCORED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)2\x000\x00(?:[0-9]\x00){6}_\x00(?:[0-9]\x00){6}").unwrap());

static PATTERNS: &[TextPattern] = &[
    TextPattern { regex: &ASCII_COMPACT_RE, encoding: Encoding::Ascii(DigitStyle::Compact), unit: 1 },
    TextPattern { regex: &ASCII_UNDERSCORED_RE, encoding: Encoding::Ascii(DigitStyle::Underscored), unit: 1 },
    TextPattern { regex: &UTF16_COMPACT_RE, encoding: Encoding::Utf16Le(DigitStyle::Compact), unit: 2 },
    TextPattern { regex: &UTF16_UNDERSCORED_RE, encoding: Encoding::Utf16Le(DigitStyle::Underscored), unit: 2 },
];

/// Which ends of `haystack` are real ends of the file. A match touching an
/// edge that is not a file end is dropped; the neighbouring window sees it whole.
#[derive(Debug, Clone, Copy)]
pub struct Edges {
    pub file_start: bool,
    pub file_end: bool,
}

/// Find timestamp-shaped text in `haystack` for a textual encoding.
///
/// Matches that are part of a longer digit run are skipped. The returned
/// ranges still need decoding; the regexes do not check the calendar.
pub fn find_timestamps(haystack: &[u8], encoding: Encoding, edges: Edges) -> Vec<Range<usize>> {
    let Some(pat) = PATTERNS.iter().find(|p| p.encoding == encoding) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut pos = 0;
    // find_at instead of find_iter: a rejected match must not hide one that
    // starts inside it.
    while let Some(m) = pat.regex.find_at(haystack, pos) {
        let r = m.range();
        let before = match r.start.checked_sub(pat.unit) {
            Some(i) => !is_digit_unit(&haystack[i..r.start]),
            None => edges.file_start && r.start == 0,
        };
        let after = match haystack.get(r.end..r.end + pat.unit) {
            Some(next) => !is_digit_unit(next),
            None => edges.file_end && r.end == haystack.len(),
        };
        if before && after {
            out.push(r.clone());
            pos = r.end;
        } else {
            pos = r.start + 1;
        }
    }
    out
}

fn is_digit_unit(unit: &[u8]) -> bool {
    match unit {
        [b] => b.is_ascii_digit(),
        [lo, hi] => lo.is_ascii_digit() && *hi == 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: Edges = Edges { file_start: true, file_end: true };
    const CLOSED: Edges = Edges { file_start: false, file_end: false };

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_ascii_patterns() {
        let hay = b"/DCIM/Camera01/VID_20260103_194656_00_001.insv";
        let found = find_timestamps(hay, Encoding::Ascii(DigitStyle::Underscored), OPEN);
        assert_eq!(found.len(), 1);
        assert_eq!(&hay[found[0].clone()], b"20260103_194656");

        let hay = b"x20260103194656y";
        let found = find_timestamps(hay, Encoding::Ascii(DigitStyle::Compact), OPEN);
        assert_eq!(found, vec![1..15]);
        assert!(find_timestamps(b"random bytes", Encoding::Ascii(DigitStyle::Compact), OPEN).is_empty());
    }

    #[test]
    fn test_longer_digit_runs_are_not_timestamps() {
        let hay = b"a2026010319465612b";
        assert!(find_timestamps(hay, Encoding::Ascii(DigitStyle::Compact), OPEN).is_empty());
        let hay = b"9920260103194656";
        assert!(find_timestamps(hay, Encoding::Ascii(DigitStyle::Compact), OPEN).is_empty());
    }

    #[test]
    fn test_rejected_match_does_not_shadow() {
        let hay = b"/20251231_20260103_194656/";
        let found = find_timestamps(hay, Encoding::Ascii(DigitStyle::Underscored), OPEN);
        assert_eq!(found, vec![10..25]);
    }

    #[test]
    fn test_window_edges() {
        let hay = b"20260103194656";
        assert_eq!(find_timestamps(hay, Encoding::Ascii(DigitStyle::Compact), OPEN), vec![0..14]);
        assert!(find_timestamps(hay, Encoding::Ascii(DigitStyle::Compact), CLOSED).is_empty());
    }

    #[test]
    fn test_utf16_patterns() {
        let mut hay = utf16("VID_20260103_194656_00_001.insv");
        hay.extend_from_slice(&[0, 0]);
        let found = find_timestamps(&hay, Encoding::Utf16Le(DigitStyle::Underscored), OPEN);
        assert_eq!(found, vec![8..38]);

        let hay = utf16("LRV20260103194656.lrv");
        let found = find_timestamps(&hay, Encoding::Utf16Le(DigitStyle::Compact), OPEN);
        assert_eq!(found, vec![6..34]);
    }
}
