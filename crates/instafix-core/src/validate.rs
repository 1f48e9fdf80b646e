use chrono::TimeDelta;

use crate::date::codec::{self, CodecError};
use crate::date::TimeValue;
use crate::field::rule_for;
use crate::locate::Candidate;

/// Result of checking a candidate against the expected old time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Matched { current: TimeValue },
    Mismatch { current: TimeValue },
    Undecodable(CodecError),
}

/// Decode the candidate's bytes and compare with `old`.
///
/// Textual and creation-time fields must equal `old` exactly. UTC fields
/// (container atoms, GPS) match when within their rule's tolerance.
pub fn validate(candidate: &Candidate, old: &TimeValue) -> Verdict {
    let current = match codec::decode(&candidate.raw, candidate.spec.encoding) {
        Ok(v) => v,
        Err(e) => return Verdict::Undecodable(e),
    };
    let tolerance = rule_for(candidate.spec.kind)
        .map(|r| r.tolerance())
        .unwrap_or_else(TimeDelta::zero);

    if current.is_near(old, tolerance) {
        Verdict::Matched { current }
    } else {
        Verdict::Mismatch { current }
    }
}
