use std::ops::Range;

use crate::date::codec;
use crate::date::guess::{self, Edges};
use crate::date::varint::{decode_varint, MAX_VARINT_LEN};
use crate::date::TimeValue;
use crate::field::{Atom, FieldKind, FieldRule, FieldSpec, Slot, Strategy};

/// Type code of the vendor metadata box.
pub const VENDOR_BOX: &[u8; 4] = b"inst";

/// A slice of the file being scanned.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    /// Absolute file offset of `bytes[0]`.
    pub base: u64,
    pub bytes: &'a [u8],
    pub file_len: u64,
}

impl Window<'_> {
    fn abs(&self, index: usize) -> u64 {
        self.base + index as u64
    }

    fn edges(&self) -> Edges {
        Edges {
            file_start: self.base == 0,
            file_end: self.abs(self.bytes.len()) == self.file_len,
        }
    }
}

/// A field location plus the bytes found there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub spec: FieldSpec,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sighting {
    Field(Candidate),
    /// The signature is there but in a layout that is never patched.
    Unsupported { kind: FieldKind, offset: u64, reason: String },
}

/// Find candidates for one field rule in `window`.
///
/// With `old` set, textual fields are searched by the old time's literal
/// encoding; without it, any timestamp-shaped text is reported.
pub fn locate(window: &Window, rule: &FieldRule, old: Option<&TimeValue>) -> Vec<Sighting> {
    match rule.strategy {
        Strategy::Atom(atom, slot) => locate_atom_field(window, rule, atom, slot),
        Strategy::ProtobufTag(tag) => locate_tagged_varint(window, rule, tag),
        Strategy::Literal => match old {
            Some(old) => locate_literal(window, rule, old),
            None => discover_text(window, rule),
        },
    }
}

fn locate_atom_field(window: &Window, rule: &FieldRule, atom: Atom, slot: Slot) -> Vec<Sighting> {
    let bytes = window.bytes;
    let mut out = Vec::new();

    for type_at in find_all(bytes, atom.fourcc()) {
        let Some(start) = type_at.checked_sub(4) else { continue };
        let field_at = start + slot.offset();
        if field_at + 4 > bytes.len() {
            continue;
        }
        let size = u32::from_be_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]) as u64;
        if size < atom.min_size() || window.abs(start) + size > window.file_len {
            continue;
        }
        match bytes[type_at + 4] {
            0 => {}
            1 => {
                out.push(Sighting::Unsupported {
                    kind: rule.kind,
                    offset: window.abs(start),
                    reason: format!("{} version 1 (64-bit times) is not supported", atom.name()),
                });
                continue;
            }
            _ => continue,
        }

        let raw = &bytes[field_at..field_at + 4];
        match codec::decode(raw, rule.encoding) {
            Ok(value) if value.is_plausible() => out.push(field(window, rule, field_at, raw)),
            _ => {}
        }
    }
    out
}

fn locate_tagged_varint(window: &Window, rule: &FieldRule, tag: &[u8]) -> Vec<Sighting> {
    let bytes = window.bytes;
    let mut out = Vec::new();

    for tag_at in find_all(bytes, tag) {
        let value_at = tag_at + tag.len();
        let tail = &bytes[value_at..bytes.len().min(value_at + MAX_VARINT_LEN)];
        // A truncated varint at the window end is picked up by the next window.
        let Ok((_, used)) = decode_varint(tail) else { continue };
        let raw = &tail[..used];
        match codec::decode(raw, rule.encoding) {
            Ok(value) if value.is_plausible() => out.push(field(window, rule, value_at, raw)),
            _ => {}
        }
    }
    out
}

fn locate_literal(window: &Window, rule: &FieldRule, old: &TimeValue) -> Vec<Sighting> {
    let Ok(needle) = codec::encode(old, rule.encoding) else {
        return Vec::new();
    };
    find_all(window.bytes, &needle)
        .into_iter()
        .map(|at| field(window, rule, at, &needle))
        .collect()
}

fn discover_text(window: &Window, rule: &FieldRule) -> Vec<Sighting> {
    guess::find_timestamps(window.bytes, rule.encoding, window.edges())
        .into_iter()
        .filter_map(|r| {
            let raw = &window.bytes[r.clone()];
            let value = codec::decode(raw, rule.encoding).ok()?;
            value.is_plausible().then(|| field(window, rule, r.start, raw))
        })
        .collect()
}

fn field(window: &Window, rule: &FieldRule, index: usize, raw: &[u8]) -> Sighting {
    Sighting::Field(Candidate {
        spec: FieldSpec {
            kind: rule.kind,
            offset: window.abs(index),
            len: raw.len(),
            encoding: rule.encoding,
        },
        raw: raw.to_vec(),
    })
}

/// Payload ranges of every vendor box visible in `window`.
pub fn locate_vendor_boxes(window: &Window) -> Vec<Range<u64>> {
    let bytes = window.bytes;
    let mut out = Vec::new();

    for type_at in find_all(bytes, VENDOR_BOX) {
        let Some(start) = type_at.checked_sub(4) else { continue };
        let size = u32::from_be_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]) as u64;
        let box_start = window.abs(start);
        let (header, end) = match size {
            // extends to end of file
            0 => (8, window.file_len),
            1 => {
                let Some(large) = bytes.get(type_at + 4..type_at + 12) else { continue };
                let mut buf = [0u8; 8];
                buf.copy_from_slice(large);
                let large = u64::from_be_bytes(buf);
                if large < 16 {
                    continue;
                }
                (16, box_start.saturating_add(large))
            }
            s if s < 8 => continue,
            s => (8, box_start + s),
        };
        if end > window.file_len {
            continue;
        }
        out.push(box_start + header..end);
    }
    out
}

/// Start index of every non-overlapping occurrence of `needle`.
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return out;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    out
}

/// Whether `spec` lies wholly inside one of `ranges`.
pub fn within_any(spec: &FieldSpec, ranges: &[Range<u64>]) -> bool {
    let r = spec.range();
    ranges.iter().any(|b| b.start <= r.start && r.end <= b.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::codec::{DigitStyle, Encoding};
    use crate::date::varint::encode_varint;
    use crate::field::rule_for;

    fn t(s: &str) -> TimeValue {
        TimeValue::parse(s).unwrap()
    }

    fn whole(bytes: &[u8]) -> Window<'_> {
        Window { base: 0, bytes, file_len: bytes.len() as u64 }
    }

    fn fields(sightings: Vec<Sighting>) -> Vec<Candidate> {
        sightings
            .into_iter()
            .filter_map(|s| match s {
                Sighting::Field(c) => Some(c),
                Sighting::Unsupported { .. } => None,
            })
            .collect()
    }

    fn mdhd(version: u8, creation: u32) -> Vec<u8> {
        let mut atom = Vec::new();
        atom.extend_from_slice(&32u32.to_be_bytes());
        atom.extend_from_slice(b"mdhd");
        atom.push(version);
        atom.extend_from_slice(&[0, 0, 0]);
        atom.extend_from_slice(&creation.to_be_bytes());
        atom.extend_from_slice(&creation.to_be_bytes());
        atom.resize(32, 0);
        atom
    }

    #[test]
    fn test_atom_creation_offset() {
        let secs = codec::encode(&t("20260103104656"), Encoding::Mp4Seconds).unwrap();
        let secs = u32::from_be_bytes([secs[0], secs[1], secs[2], secs[3]]);
        let mut buf = vec![0xEE; 10];
        buf.extend(mdhd(0, secs));

        let rule = rule_for(FieldKind::ContainerTimestamp { atom: Atom::Mdhd, slot: Slot::Creation }).unwrap();
        let found = fields(locate(&whole(&buf), rule, None));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.offset, 10 + 12);
        assert_eq!(found[0].raw, secs.to_be_bytes());
    }

    #[test]
    fn test_atom_version_one_is_unsupported() {
        let buf = mdhd(1, 0xE000_0000);
        let rule = rule_for(FieldKind::ContainerTimestamp { atom: Atom::Mdhd, slot: Slot::Creation }).unwrap();
        let sightings = locate(&whole(&buf), rule, None);
        assert!(matches!(sightings.as_slice(), [Sighting::Unsupported { offset: 0, .. }]));
    }

    #[test]
    fn test_atom_zero_time_ignored() {
        let buf = mdhd(0, 0);
        let rule = rule_for(FieldKind::ContainerTimestamp { atom: Atom::Mdhd, slot: Slot::Creation }).unwrap();
        assert!(locate(&whole(&buf), rule, None).is_empty());
    }

    #[test]
    fn test_atom_size_must_fit() {
        let mut buf = mdhd(0, 0xE000_0000);
        buf[..4].copy_from_slice(&4000u32.to_be_bytes());
        let rule = rule_for(FieldKind::ContainerTimestamp { atom: Atom::Mdhd, slot: Slot::Creation }).unwrap();
        assert!(locate(&whole(&buf), rule, None).is_empty());
    }

    #[test]
    fn test_tagged_varint() {
        let mut buf = vec![0x08, 0x01, 0x38, 0x05];
        buf.push(0x38);
        let at = buf.len();
        buf.extend(encode_varint(20260103194656));
        buf.extend_from_slice(&[0x40, 0x00]);

        let rule = rule_for(FieldKind::ProtobufCreationTime).unwrap();
        let found = fields(locate(&whole(&buf), rule, None));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.offset, at as u64);
        assert_eq!(found[0].spec.len, 7);
    }

    #[test]
    fn test_gps_tag() {
        let mut buf = vec![0xA0, 0x02];
        buf.extend(encode_varint(1_767_436_016_123));
        let rule = rule_for(FieldKind::ProtobufGpsTimestamp).unwrap();
        let found = fields(locate(&whole(&buf), rule, None));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.offset, 2);
        assert_eq!(found[0].spec.len, 6);
    }

    #[test]
    fn test_literal_occurrences() {
        let buf = b"/a/VID_20260103_194656_00.insv\0/b/LRV_20260103_194656_01.lrv";
        let rule = rule_for(FieldKind::EmbeddedPathAscii { style: DigitStyle::Underscored }).unwrap();
        let found = fields(locate(&whole(buf), rule, Some(&t("20260103194656"))));
        assert_eq!(found.iter().map(|c| c.spec.offset).collect::<Vec<_>>(), vec![7, 38]);

        let other = fields(locate(&whole(buf), rule, Some(&t("20250103194656"))));
        assert!(other.is_empty());
    }

    #[test]
    fn test_discovery_without_old_time() {
        let buf = b"/a/VID_20260103_194656_00.insv";
        let rule = rule_for(FieldKind::EmbeddedPathAscii { style: DigitStyle::Underscored }).unwrap();
        let found = fields(locate(&whole(buf), rule, None));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.offset, 7);
    }

    #[test]
    fn test_window_base_offsets() {
        let buf = b"xx20260103194656";
        let window = Window { base: 1000, bytes: buf, file_len: 1016 };
        let rule = rule_for(FieldKind::EmbeddedPathAscii { style: DigitStyle::Compact }).unwrap();
        let found = fields(locate(&window, rule, Some(&t("20260103194656"))));
        assert_eq!(found[0].spec.offset, 1002);
    }

    #[test]
    fn test_vendor_boxes() {
        let mut buf = vec![0u8; 8];
        buf.extend_from_slice(&24u32.to_be_bytes());
        buf.extend_from_slice(b"inst");
        buf.extend_from_slice(&[0u8; 16]);
        let boxes = locate_vendor_boxes(&whole(&buf));
        assert_eq!(boxes, vec![16..32]);

        // size runs past the end of the file
        buf[8..12].copy_from_slice(&400u32.to_be_bytes());
        assert!(locate_vendor_boxes(&whole(&buf)).is_empty());

        // size 0: to end of file
        buf[8..12].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(locate_vendor_boxes(&whole(&buf)), vec![16..32]);
    }

    #[test]
    fn test_find_all_non_overlapping() {
        assert_eq!(find_all(b"aaaa", b"aa"), vec![0, 2]);
        assert_eq!(find_all(b"abc", b""), Vec::<usize>::new());
        assert_eq!(find_all(b"ab", b"abc"), Vec::<usize>::new());
    }
}
