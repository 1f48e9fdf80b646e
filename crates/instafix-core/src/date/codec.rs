use std::fmt;

use chrono::DateTime;
use encoding_rs::UTF_16LE;
use serde::Serialize;

use super::varint::{decode_varint, encode_varint, VarintError};
use super::TimeValue;

/// Seconds between 1904-01-01 (MP4 epoch) and 1970-01-01.
pub const MP4_EPOCH_OFFSET: i64 = 2_082_844_800;

/// How the digits of a textual timestamp are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigitStyle {
    /// `YYYYMMDDHHmmss`
    Compact,
    /// `YYYYMMDD_HHmmss`, as in camera file names
    Underscored,
}

impl DigitStyle {
    /// Number of characters.
    pub fn width(self) -> usize {
        match self {
            DigitStyle::Compact => 14,
            DigitStyle::Underscored => 15,
        }
    }

    pub fn render(self, value: &TimeValue) -> String {
        let digits = value.digits();
        match self {
            DigitStyle::Compact => digits,
            DigitStyle::Underscored => format!("{}_{}", &digits[..8], &digits[8..]),
        }
    }

    fn parse(self, s: &str) -> Option<TimeValue> {
        match self {
            DigitStyle::Compact => TimeValue::from_digit_str(s),
            DigitStyle::Underscored => {
                let (date, rest) = (s.get(..8)?, s.get(8..)?);
                let time = rest.strip_prefix('_')?;
                TimeValue::from_digit_str(&format!("{}{}", date, time))
            }
        }
    }
}

/// On-disk representation of a timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// u32 big-endian seconds since 1904-01-01 UTC
    Mp4Seconds,
    /// varint whose decimal digits read `YYYYMMDDHHmmss`
    VarintDigits,
    /// varint milliseconds since 1970-01-01 UTC
    VarintEpochMillis,
    Ascii(DigitStyle),
    Utf16Le(DigitStyle),
}

impl Encoding {
    /// Byte length, when it does not depend on the value.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            Encoding::Mp4Seconds => Some(4),
            Encoding::VarintDigits | Encoding::VarintEpochMillis => None,
            Encoding::Ascii(style) => Some(style.width()),
            Encoding::Utf16Le(style) => Some(style.width() * 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Length { expected: usize, actual: usize },
    Varint(VarintError),
    /// The varint did not end where the field does.
    TrailingBytes { used: usize, actual: usize },
    OutOfRange(String),
    NotATimestamp(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Length { expected, actual } => {
                write!(f, "expected {} bytes, found {}", expected, actual)
            }
            CodecError::Varint(e) => write!(f, "{}", e),
            CodecError::TrailingBytes { used, actual } => {
                write!(f, "varint uses {} of {} bytes", used, actual)
            }
            CodecError::OutOfRange(what) => write!(f, "value out of range: {}", what),
            CodecError::NotATimestamp(what) => write!(f, "not a timestamp: {}", what),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<VarintError> for CodecError {
    fn from(e: VarintError) -> Self {
        CodecError::Varint(e)
    }
}

/// Decode a complete field.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<TimeValue, CodecError> {
    if let Some(expected) = encoding.fixed_len() {
        if bytes.len() != expected {
            return Err(CodecError::Length { expected, actual: bytes.len() });
        }
    }

    match encoding {
        Encoding::Mp4Seconds => {
            let secs = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            DateTime::from_timestamp(secs as i64 - MP4_EPOCH_OFFSET, 0)
                .map(|dt| TimeValue::from_datetime(dt.naive_utc()))
                .ok_or_else(|| CodecError::OutOfRange(secs.to_string()))
        }
        Encoding::VarintDigits => {
            let value = decode_whole_varint(bytes)?;
            TimeValue::from_number(value).ok_or_else(|| CodecError::NotATimestamp(value.to_string()))
        }
        Encoding::VarintEpochMillis => {
            let value = decode_whole_varint(bytes)?;
            i64::try_from(value)
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .map(|dt| TimeValue::from_datetime(dt.naive_utc()))
                .ok_or_else(|| CodecError::OutOfRange(value.to_string()))
        }
        Encoding::Ascii(style) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|_| CodecError::NotATimestamp(String::from_utf8_lossy(bytes).into_owned()))?;
            style.parse(s).ok_or_else(|| CodecError::NotATimestamp(s.to_string()))
        }
        Encoding::Utf16Le(style) => {
            let (s, had_errors) = UTF_16LE.decode_without_bom_handling(bytes);
            if had_errors {
                return Err(CodecError::NotATimestamp(s.into_owned()));
            }
            style.parse(&s).ok_or_else(|| CodecError::NotATimestamp(s.into_owned()))
        }
    }
}

/// Encode `value` into the field's representation.
pub fn encode(value: &TimeValue, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Mp4Seconds => {
            let secs = value.datetime().and_utc().timestamp() + MP4_EPOCH_OFFSET;
            let secs = u32::try_from(secs).map_err(|_| CodecError::OutOfRange(value.to_string()))?;
            Ok(secs.to_be_bytes().to_vec())
        }
        Encoding::VarintDigits => Ok(encode_varint(value.as_number())),
        Encoding::VarintEpochMillis => {
            let ms = value.datetime().and_utc().timestamp_millis();
            let ms = u64::try_from(ms).map_err(|_| CodecError::OutOfRange(value.to_string()))?;
            Ok(encode_varint(ms))
        }
        Encoding::Ascii(style) => Ok(style.render(value).into_bytes()),
        Encoding::Utf16Le(style) => Ok(style
            .render(value)
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect()),
    }
}

fn decode_whole_varint(bytes: &[u8]) -> Result<u64, CodecError> {
    let (value, used) = decode_varint(bytes)?;
    if used != bytes.len() {
        return Err(CodecError::TrailingBytes { used, actual: bytes.len() });
    }
    Ok(value)
}
