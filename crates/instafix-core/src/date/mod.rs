pub mod codec;
pub mod guess;
pub mod varint;

use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use regex::Regex;
use serde::{Serialize, Serializer};

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{14}$").unwrap());

/// Years accepted for user-supplied times and for discovered field values.
pub const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 2000..=2099;

/// A wall-clock timestamp, `YYYYMMDDHHmmss` on the command line.
///
/// Values decoded from millisecond fields keep their milliseconds; everything
/// else is whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeValue(NaiveDateTime);

impl TimeValue {
    /// Parse a user-supplied `YYYYMMDDHHmmss` string.
    pub fn parse(s: &str) -> Result<Self, FormatError> {
        if !DIGITS_RE.is_match(s) {
            return Err(FormatError::NotDigits(s.to_string()));
        }
        let year: i32 = s[..4].parse().map_err(|_| FormatError::NotDigits(s.to_string()))?;
        if !PLAUSIBLE_YEARS.contains(&year) {
            return Err(FormatError::YearOutOfRange(year));
        }
        Self::from_digit_str(s).ok_or_else(|| FormatError::InvalidCalendar(s.to_string()))
    }

    /// Build from 14 ASCII digits, checking only calendar validity.
    pub(crate) fn from_digit_str(s: &str) -> Option<Self> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let num = |r: std::ops::Range<usize>| s[r].parse::<u32>().ok();
        let date = NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)?;
        let dt = date.and_hms_opt(num(8..10)?, num(10..12)?, num(12..14)?)?;
        Some(Self(dt))
    }

    /// Build from an integer whose decimal digits are `YYYYMMDDHHmmss`.
    pub fn from_number(n: u64) -> Option<Self> {
        if !(10_000_000_000_000..100_000_000_000_000).contains(&n) {
            return None;
        }
        Self::from_digit_str(&n.to_string())
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt)
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn second(&self) -> u32 {
        self.0.second()
    }

    /// The 14-digit form, sub-second precision dropped.
    pub fn digits(&self) -> String {
        self.0.format("%Y%m%d%H%M%S").to_string()
    }

    /// The 14-digit form as an integer, e.g. `20260103194656`.
    pub fn as_number(&self) -> u64 {
        let date = self.year() as u64 * 10_000 + self.month() as u64 * 100 + self.day() as u64;
        let time = self.hour() as u64 * 10_000 + self.minute() as u64 * 100 + self.second() as u64;
        date * 1_000_000 + time
    }

    pub fn is_plausible(&self) -> bool {
        PLAUSIBLE_YEARS.contains(&self.year())
    }

    /// `self - earlier`
    pub fn since(&self, earlier: &TimeValue) -> TimeDelta {
        self.0 - earlier.0
    }

    pub fn shifted(&self, delta: TimeDelta) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Self)
    }

    /// Whether `other` lies within `tolerance` of `self` in either direction.
    pub fn is_near(&self, other: &TimeValue, tolerance: TimeDelta) -> bool {
        self.since(other).abs() <= tolerance
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

impl Serialize for TimeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A supplied time string that cannot be used. Fatal before any file is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    NotDigits(String),
    YearOutOfRange(i32),
    InvalidCalendar(String),
    MissingNewTime,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::NotDigits(s) => write!(f, "Timestamp must be 14 digits (YYYYMMDDHHmmss), got: {}", s),
            FormatError::YearOutOfRange(y) => write!(f, "Year out of range: {}", y),
            FormatError::InvalidCalendar(s) => write!(f, "Not a valid calendar date/time: {}", s),
            FormatError::MissingNewTime => write!(f, "A correct time is required unless reading"),
        }
    }
}

impl std::error::Error for FormatError {}
