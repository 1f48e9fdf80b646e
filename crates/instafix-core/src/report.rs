use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::date::TimeValue;
use crate::field::FieldKind;
use crate::Mode;

/// What happened to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Signature absent. Informational.
    NotFound,
    /// Signature present in a layout that is never patched (64-bit atom).
    Unsupported,
    /// Read mode: value decoded, nothing compared.
    Read,
    /// Value present but not the expected old time.
    Mismatch,
    /// Bytes at the location do not decode.
    Undecodable,
    /// Dry run: would be written.
    WouldPatch,
    Patched,
    /// Old and new bytes are identical; nothing written.
    Unchanged,
    /// New encoding has a different byte length.
    LengthMismatch,
    /// New value cannot be represented in the field.
    EncodeFailed,
    /// Write failed, or the bytes changed since the scan.
    WriteFailed,
}

impl Outcome {
    pub fn found(self) -> bool {
        !matches!(self, Outcome::NotFound | Outcome::Unsupported)
    }

    pub fn matched(self) -> bool {
        matches!(
            self,
            Outcome::WouldPatch
                | Outcome::Patched
                | Outcome::Unchanged
                | Outcome::LengthMismatch
                | Outcome::EncodeFailed
                | Outcome::WriteFailed
        )
    }

    pub fn patched(self) -> bool {
        matches!(self, Outcome::Patched | Outcome::Unchanged)
    }

    /// A validated field that could not be patched.
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::LengthMismatch | Outcome::EncodeFailed | Outcome::WriteFailed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::NotFound => "not found",
            Outcome::Unsupported => "unsupported",
            Outcome::Read => "read",
            Outcome::Mismatch => "mismatch",
            Outcome::Undecodable => "undecodable",
            Outcome::WouldPatch => "would patch",
            Outcome::Patched => "patched",
            Outcome::Unchanged => "unchanged",
            Outcome::LengthMismatch => "length mismatch",
            Outcome::EncodeFailed => "encode failed",
            Outcome::WriteFailed => "write failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldRecord {
    pub kind: FieldKind,
    pub offset: Option<u64>,
    pub len: usize,
    pub outcome: Outcome,
    pub found: bool,
    pub matched: bool,
    pub patched: bool,
    pub old_value: Option<TimeValue>,
    pub new_value: Option<TimeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FieldRecord {
    pub fn new(kind: FieldKind, offset: Option<u64>, len: usize, outcome: Outcome) -> Self {
        Self {
            kind,
            offset,
            len,
            outcome,
            found: outcome.found(),
            matched: outcome.matched(),
            patched: outcome.patched(),
            old_value: None,
            new_value: None,
            note: None,
        }
    }

    pub fn not_found(kind: FieldKind) -> Self {
        Self::new(kind, None, 0, Outcome::NotFound)
    }

    pub fn with_values(mut self, old_value: Option<TimeValue>, new_value: Option<TimeValue>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub size: Option<u64>,
    pub records: Vec<FieldRecord>,
    /// Number of `inst` vendor boxes seen.
    pub vendor_boxes: usize,
    /// Set when the file could not be opened, read or written.
    pub error: Option<String>,
}

impl FileReport {
    pub fn new(path: PathBuf) -> Self {
        Self { path, size: None, records: Vec::new(), vendor_boxes: 0, error: None }
    }

    pub fn failed(path: PathBuf, error: &anyhow::Error) -> Self {
        Self { error: Some(format!("{:#}", error)), ..Self::new(path) }
    }

    pub fn found(&self) -> impl Iterator<Item = &FieldRecord> {
        self.records.iter().filter(|r| r.found)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.records.iter().any(|r| r.outcome.is_failure())
    }
}

/// Where the old time came from.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum OldTimeSource {
    Explicit,
    Detected { path: PathBuf, field: FieldKind },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: Mode,
    pub old_time: Option<TimeValue>,
    pub old_time_source: Option<OldTimeSource>,
    pub new_time: Option<TimeValue>,
    pub files: Vec<FileReport>,
    /// Stopped between files; later files were not processed.
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.files.iter().all(FileReport::is_success)
    }

    /// `Err` with the failing files when the batch did not fully succeed.
    pub fn check(&self) -> Result<(), PartialBatchFailure> {
        if self.is_success() {
            return Ok(());
        }
        Err(PartialBatchFailure {
            failed: self.files.iter().filter(|f| !f.is_success()).map(|f| f.path.clone()).collect(),
            cancelled: self.cancelled,
        })
    }
}

/// One or more files had unresolved failures. Every other file was still processed.
#[derive(Debug, Clone)]
pub struct PartialBatchFailure {
    pub failed: Vec<PathBuf>,
    pub cancelled: bool,
}

impl fmt::Display for PartialBatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            write!(f, "cancelled before all files were processed")?;
            if !self.failed.is_empty() {
                write!(f, "; ")?;
            }
        }
        if !self.failed.is_empty() {
            let names: Vec<String> = self.failed.iter().map(|p| p.display().to_string()).collect();
            write!(f, "{} file(s) failed: {}", self.failed.len(), names.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialBatchFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_flags() {
        assert!(!Outcome::NotFound.found());
        assert!(!Outcome::Unsupported.found());
        assert!(Outcome::Mismatch.found() && !Outcome::Mismatch.matched());
        assert!(Outcome::WouldPatch.matched() && !Outcome::WouldPatch.patched());
        assert!(Outcome::LengthMismatch.matched() && Outcome::LengthMismatch.is_failure());
        assert!(Outcome::Unchanged.patched());
        assert!(!Outcome::Read.is_failure());
    }

    #[test]
    fn test_batch_failure_lists_files() {
        let mut bad = FileReport::new(PathBuf::from("b.insv"));
        bad.records.push(FieldRecord::new(FieldKind::ProtobufCreationTime, Some(10), 7, Outcome::LengthMismatch));
        let batch = BatchReport {
            mode: Mode::Commit,
            old_time: None,
            old_time_source: None,
            new_time: None,
            files: vec![FileReport::new(PathBuf::from("a.insv")), bad],
            cancelled: false,
            warnings: vec![],
        };
        assert!(!batch.is_success());
        let err = batch.check().unwrap_err();
        assert_eq!(err.failed, vec![PathBuf::from("b.insv")]);
        assert_eq!(err.to_string(), "1 file(s) failed: b.insv");
    }

    #[test]
    fn test_record_serialises_flags() {
        let record = FieldRecord::new(FieldKind::ProtobufGpsTimestamp, Some(42), 6, Outcome::Mismatch);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"], "mismatch");
        assert_eq!(json["found"], true);
        assert_eq!(json["matched"], false);
        assert_eq!(json["kind"]["kind"], "protobuf-gps-timestamp");
        assert!(json.get("note").is_none());
    }
}
