//! Patchable field kinds and the rule table that drives scanning.

use std::fmt;
use std::ops::Range;

use chrono::TimeDelta;
use serde::Serialize;

use crate::date::codec::{DigitStyle, Encoding};

/// Container header atoms carrying creation/modification times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Atom {
    /// movie header (container level)
    Mvhd,
    /// track header
    Tkhd,
    /// media header
    Mdhd,
}

impl Atom {
    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            Atom::Mvhd => b"mvhd",
            Atom::Tkhd => b"tkhd",
            Atom::Mdhd => b"mdhd",
        }
    }

    /// Smallest legal size of the version-0 atom, header included.
    pub fn min_size(self) -> u64 {
        match self {
            Atom::Mvhd => 108,
            Atom::Tkhd => 92,
            Atom::Mdhd => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Atom::Mvhd => "mvhd",
            Atom::Tkhd => "tkhd",
            Atom::Mdhd => "mdhd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Creation,
    Modification,
}

impl Slot {
    /// Offset from the atom start in the version-0 layout:
    /// size(4) type(4) version(1) flags(3) creation(4) modification(4).
    pub fn offset(self) -> usize {
        match self {
            Slot::Creation => 12,
            Slot::Modification => 16,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::Creation => "creation",
            Slot::Modification => "modification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldKind {
    ContainerTimestamp { atom: Atom, slot: Slot },
    /// Vendor protobuf field 7, the "shooting time" apps display
    ProtobufCreationTime,
    /// Vendor protobuf field 36, first GPS fix
    ProtobufGpsTimestamp,
    EmbeddedPathAscii { style: DigitStyle },
    EmbeddedFilenameUtf16 { style: DigitStyle },
}

impl FieldKind {
    pub fn is_protobuf(&self) -> bool {
        matches!(self, FieldKind::ProtobufCreationTime | FieldKind::ProtobufGpsTimestamp)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style_name = |style: &DigitStyle| match style {
            DigitStyle::Compact => "YYYYMMDDHHmmss",
            DigitStyle::Underscored => "YYYYMMDD_HHmmss",
        };
        match self {
            FieldKind::ContainerTimestamp { atom, slot } => write!(f, "{}.{}", atom.name(), slot.name()),
            FieldKind::ProtobufCreationTime => write!(f, "protobuf creation_time"),
            FieldKind::ProtobufGpsTimestamp => write!(f, "first_gps_timestamp"),
            FieldKind::EmbeddedPathAscii { style } => write!(f, "ASCII path {}", style_name(style)),
            FieldKind::EmbeddedFilenameUtf16 { style } => write!(f, "UTF-16LE filename {}", style_name(style)),
        }
    }
}

/// How candidates for a field are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Atom type code, fixed field offset behind it.
    Atom(Atom, Slot),
    /// Protobuf tag bytes followed by a varint, inside the vendor box.
    ProtobufTag(&'static [u8]),
    /// The timestamp text itself.
    Literal,
}

/// Tag of protobuf field 7, wire type varint.
pub const CREATION_TIME_TAG: &[u8] = &[0x38];
/// Tag of protobuf field 36, wire type varint.
pub const GPS_TIMESTAMP_TAG: &[u8] = &[0xA0, 0x02];

/// UTC fields may sit up to a time zone (plus GPS lag) away from local shooting time.
const UTC_TOLERANCE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub kind: FieldKind,
    pub encoding: Encoding,
    pub strategy: Strategy,
    tolerance_secs: i64,
}

impl FieldRule {
    /// How far a current value may be from the old time and still match.
    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::seconds(self.tolerance_secs)
    }
}

const fn atom_rule(atom: Atom, slot: Slot) -> FieldRule {
    FieldRule {
        kind: FieldKind::ContainerTimestamp { atom, slot },
        encoding: Encoding::Mp4Seconds,
        strategy: Strategy::Atom(atom, slot),
        tolerance_secs: UTC_TOLERANCE_SECS,
    }
}

const fn text_rule(kind: FieldKind, encoding: Encoding) -> FieldRule {
    FieldRule { kind, encoding, strategy: Strategy::Literal, tolerance_secs: 0 }
}

/// Every field the scanner knows, in report order.
pub static FIELD_RULES: &[FieldRule] = &[
    atom_rule(Atom::Mvhd, Slot::Creation),
    atom_rule(Atom::Mvhd, Slot::Modification),
    atom_rule(Atom::Tkhd, Slot::Creation),
    atom_rule(Atom::Tkhd, Slot::Modification),
    atom_rule(Atom::Mdhd, Slot::Creation),
    atom_rule(Atom::Mdhd, Slot::Modification),
    FieldRule {
        kind: FieldKind::ProtobufCreationTime,
        encoding: Encoding::VarintDigits,
        strategy: Strategy::ProtobufTag(CREATION_TIME_TAG),
        tolerance_secs: 0,
    },
    FieldRule {
        kind: FieldKind::ProtobufGpsTimestamp,
        encoding: Encoding::VarintEpochMillis,
        strategy: Strategy::ProtobufTag(GPS_TIMESTAMP_TAG),
        tolerance_secs: UTC_TOLERANCE_SECS,
    },
    text_rule(
        FieldKind::EmbeddedPathAscii { style: DigitStyle::Compact },
        Encoding::Ascii(DigitStyle::Compact),
    ),
    text_rule(
        FieldKind::EmbeddedPathAscii { style: DigitStyle::Underscored },
        Encoding::Ascii(DigitStyle::Underscored),
    ),
    text_rule(
        FieldKind::EmbeddedFilenameUtf16 { style: DigitStyle::Compact },
        Encoding::Utf16Le(DigitStyle::Compact),
    ),
    text_rule(
        FieldKind::EmbeddedFilenameUtf16 { style: DigitStyle::Underscored },
        Encoding::Utf16Le(DigitStyle::Underscored),
    ),
];

pub fn rule_for(kind: FieldKind) -> Option<&'static FieldRule> {
    FIELD_RULES.iter().find(|r| r.kind == kind)
}

/// One located field: where it is and how it is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub offset: u64,
    pub len: usize,
    pub encoding: Encoding,
}

impl FieldSpec {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.len as u64
    }

    pub fn overlaps(&self, other: &FieldSpec) -> bool {
        self.offset < other.offset + other.len as u64 && other.offset < self.offset + self.len as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::varint::encode_varint;

    #[test]
    fn test_rule_table_is_complete() {
        assert_eq!(FIELD_RULES.len(), 12);
        for rule in FIELD_RULES {
            assert_eq!(rule_for(rule.kind).map(|r| r.kind), Some(rule.kind));
        }
        let kinds: std::collections::HashSet<_> = FIELD_RULES.iter().map(|r| r.kind).collect();
        assert_eq!(kinds.len(), FIELD_RULES.len());
    }

    #[test]
    fn test_tags_match_field_numbers() {
        assert_eq!(encode_varint(7 << 3), CREATION_TIME_TAG);
        assert_eq!(encode_varint(36 << 3), GPS_TIMESTAMP_TAG);
    }

    #[test]
    fn test_labels() {
        let kind = FieldKind::ContainerTimestamp { atom: Atom::Mdhd, slot: Slot::Creation };
        assert_eq!(kind.to_string(), "mdhd.creation");
        assert_eq!(
            FieldKind::EmbeddedPathAscii { style: DigitStyle::Underscored }.to_string(),
            "ASCII path YYYYMMDD_HHmmss"
        );
    }

    #[test]
    fn test_overlap() {
        let spec = |offset, len| FieldSpec { kind: FieldKind::ProtobufCreationTime, offset, len, encoding: Encoding::VarintDigits };
        assert!(spec(10, 7).overlaps(&spec(16, 2)));
        assert!(!spec(10, 7).overlaps(&spec(17, 2)));
        assert!(!spec(17, 2).overlaps(&spec(10, 7)));
        assert_eq!(spec(10, 7).range(), 10..17);
    }
}
