pub mod cancel;
pub mod date;
pub mod field;
pub mod locate;
pub mod patch;
pub mod report;
pub mod scan;
pub mod validate;

#[cfg(test)]
pub(crate) mod fixture;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::date::codec;
use crate::date::{FormatError, TimeValue};
use crate::field::{FieldKind, Slot, FIELD_RULES};
use crate::patch::{Applied, Committed, PatchPlan, Rejection};
use crate::report::{FieldRecord, FileReport, OldTimeSource, Outcome};
use crate::scan::{ScanResult, DEFAULT_CHUNK_SIZE};
use crate::validate::Verdict;

pub use cancel::{CancellationToken, CancelledError};
pub use report::{BatchReport, PartialBatchFailure};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// List every discovered value; never write.
    Read,
    /// Validate and plan; never write.
    #[default]
    DryRun,
    /// Validate, plan and write.
    Commit,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Read => "read",
            Mode::DryRun => "dry-run",
            Mode::Commit => "commit",
        })
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOptions {
    pub files: Vec<PathBuf>,
    /// Wrong shooting time, `YYYYMMDDHHmmss`. Detected from the files when absent.
    #[serde(default)]
    pub old_time: Option<String>,
    /// Correct shooting time, `YYYYMMDDHHmmss`. Not needed in read mode.
    #[serde(default)]
    pub new_time: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Restore each file's modification time after writing.
    #[serde(default)]
    pub keep_mtime: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            old_time: None,
            new_time: None,
            mode: Mode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            keep_mtime: false,
        }
    }
}

/// Control options for process execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Checked between files.
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// No file yielded a shooting time to use as the old time.
#[derive(Debug, Clone)]
pub struct DetectError {
    pub files_scanned: usize,
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no shooting time found in {} file(s); pass the old time explicitly",
            self.files_scanned
        )
    }
}

impl std::error::Error for DetectError {}

/// Type alias for progress callback: stage, current, total, message.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter. Emits at most every 200ms, and always on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        let start = Instant::now().checked_sub(Duration::from_secs(1)).unwrap_or_else(Instant::now);
        Self { inner, last_emit: Mutex::new(start) }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run a batch with progress reporting.
pub fn process(options: &PatchOptions, progress_callback: &ProgressCallback) -> anyhow::Result<BatchReport> {
    process_with_control(options, &ProcessControl::default(), progress_callback)
}

/// Run a batch with progress reporting and cancellation.
///
/// Times are parsed before any file is opened. Per-file problems land in the
/// report; only bad times, a failed auto-detection or cancellation during
/// detection return `Err`.
pub fn process_with_control(
    options: &PatchOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<BatchReport> {
    let explicit_old = options.old_time.as_deref().map(TimeValue::parse).transpose()?;
    let new_time = match options.mode {
        Mode::Read => options.new_time.as_deref().map(TimeValue::parse).transpose()?,
        Mode::DryRun | Mode::Commit => Some(
            options
                .new_time
                .as_deref()
                .ok_or(FormatError::MissingNewTime)
                .and_then(TimeValue::parse)?,
        ),
    };

    let tp = ThrottledProgress::new(progress_callback);
    let mut report = BatchReport {
        mode: options.mode,
        old_time: explicit_old,
        old_time_source: explicit_old.map(|_| OldTimeSource::Explicit),
        new_time,
        files: Vec::new(),
        cancelled: false,
        warnings: Vec::new(),
    };

    let run = match (options.mode, new_time) {
        (Mode::Read, _) | (_, None) => Run {
            mode: Mode::Read,
            old: None,
            delta: TimeDelta::zero(),
            chunk_size: options.chunk_size,
            keep_mtime: false,
        },
        (mode, Some(new_time)) => {
            let old = match explicit_old {
                Some(old) => old,
                None => {
                    let (old, source) = detect_old_time(options, control, &tp, &mut report.warnings)?;
                    report.old_time = Some(old);
                    report.old_time_source = Some(source);
                    old
                }
            };
            Run {
                mode,
                old: Some(old),
                delta: new_time.since(&old),
                chunk_size: options.chunk_size,
                keep_mtime: options.keep_mtime,
            }
        }
    };

    let total = options.files.len() as u64;
    for (i, path) in options.files.iter().enumerate() {
        if control.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let file_report = match process_file(path, &run, &tp) {
            Ok(file_report) => file_report,
            Err(e) => FileReport::failed(path.clone(), &e),
        };
        collect_warnings(&file_report, &run, &mut report.warnings);
        report.files.push(file_report);
        tp.report("patch", i as u64, total, &path.display().to_string());
    }

    Ok(report)
}

/// Settings shared by every file of one batch.
struct Run {
    mode: Mode,
    old: Option<TimeValue>,
    delta: TimeDelta,
    chunk_size: usize,
    keep_mtime: bool,
}

/// Establish the old time from the first file that carries one: the vendor
/// creation time, else the earliest container creation time.
fn detect_old_time(
    options: &PatchOptions,
    control: &ProcessControl,
    tp: &ThrottledProgress,
    warnings: &mut Vec<String>,
) -> anyhow::Result<(TimeValue, OldTimeSource)> {
    let total = options.files.len() as u64;
    let mut scanned = 0;
    for (i, path) in options.files.iter().enumerate() {
        if control.is_cancelled() {
            return Err(CancelledError.into());
        }
        tp.report("detect", i as u64, total, &path.display().to_string());
        let scan = match scan::scan_file(path, None, options.chunk_size, tp) {
            Ok(scan) => scan,
            Err(e) => {
                warnings.push(format!("auto-detect skipped {}: {:#}", path.display(), e));
                continue;
            }
        };
        scanned += 1;
        if let Some((value, field)) = shooting_time(&scan) {
            return Ok((value, OldTimeSource::Detected { path: path.clone(), field }));
        }
    }
    Err(DetectError { files_scanned: scanned }.into())
}

fn shooting_time(scan: &ScanResult) -> Option<(TimeValue, FieldKind)> {
    let decoded = |kind: &FieldKind| {
        scan.of_kind(*kind)
            .filter_map(|c| codec::decode(&c.raw, c.spec.encoding).ok())
            .map(|v| (v, *kind))
            .collect::<Vec<_>>()
    };

    if let Some(found) = decoded(&FieldKind::ProtobufCreationTime).into_iter().next() {
        return Some(found);
    }
    FIELD_RULES
        .iter()
        .filter(|r| matches!(r.kind, FieldKind::ContainerTimestamp { slot: Slot::Creation, .. }))
        .flat_map(|r| decoded(&r.kind))
        .min_by_key(|(v, _)| *v)
}

/// Locate, validate and (in commit mode) patch every field of one file.
fn process_file(path: &Path, run: &Run, tp: &ThrottledProgress) -> anyhow::Result<FileReport> {
    let scan = scan::scan_file(path, run.old.as_ref(), run.chunk_size, tp)?;
    let mut report = FileReport::new(path.to_path_buf());
    report.size = Some(scan.file_len);
    report.vendor_boxes = scan.vendor_boxes.len();

    let mut plan = PatchPlan::new();
    // record index for each plan entry
    let mut planned: Vec<usize> = Vec::new();

    for candidate in &scan.candidates {
        let spec = candidate.spec;
        let record = |outcome| FieldRecord::new(spec.kind, Some(spec.offset), spec.len, outcome);

        let Some(old) = run.old.as_ref().filter(|_| run.mode != Mode::Read) else {
            report.records.push(match codec::decode(&candidate.raw, spec.encoding) {
                Ok(current) => record(Outcome::Read).with_values(Some(current), None),
                Err(e) => record(Outcome::Undecodable).with_note(e.to_string()),
            });
            continue;
        };

        let current = match validate::validate(candidate, old) {
            Verdict::Matched { current } => current,
            Verdict::Mismatch { current } => {
                report.records.push(record(Outcome::Mismatch).with_values(Some(current), None));
                continue;
            }
            Verdict::Undecodable(e) => {
                report.records.push(record(Outcome::Undecodable).with_note(e.to_string()));
                continue;
            }
        };

        let pushed = patch::prepare(candidate, current, run.delta).and_then(|entry| {
            let unchanged = entry.old_bytes == entry.new_bytes;
            let new_value = entry.new_value;
            plan.push(entry).map(|()| (new_value, unchanged))
        });
        match pushed {
            Ok((new_value, unchanged)) => {
                // the final outcome is only known after a commit
                let mut planned_record = record(Outcome::WouldPatch).with_values(Some(current), Some(new_value));
                if unchanged {
                    planned_record = planned_record.with_note("already holds the new value");
                }
                planned.push(report.records.len());
                report.records.push(planned_record);
            }
            Err(rejection) => {
                let (outcome, new_value) = match &rejection {
                    Rejection::LengthMismatch { new_value, .. } => (Outcome::LengthMismatch, Some(*new_value)),
                    Rejection::Encode(_) => (Outcome::EncodeFailed, None),
                    Rejection::Overlap { .. } => (Outcome::WriteFailed, None),
                };
                report.records.push(
                    record(outcome)
                        .with_values(Some(current), new_value)
                        .with_note(rejection.to_string()),
                );
            }
        }
    }

    if run.mode == Mode::Commit {
        record_commit(&mut report, &planned, patch::commit(path, &plan, run.keep_mtime));
    }

    for u in &scan.unsupported {
        report
            .records
            .push(FieldRecord::new(u.kind, Some(u.offset), 0, Outcome::Unsupported).with_note(u.reason.clone()));
    }
    report.records.sort_by_key(|r| r.offset);
    for rule in FIELD_RULES {
        if !report.records.iter().any(|r| r.kind == rule.kind) {
            report.records.push(FieldRecord::not_found(rule.kind));
        }
    }

    Ok(report)
}

/// Turn each planned record into its final outcome after a commit.
///
/// Fields already written stay `Patched` even when a later step failed; that
/// failure goes into the file error.
fn record_commit(report: &mut FileReport, planned: &[usize], committed: anyhow::Result<Committed>) {
    let (outcomes, error) = match committed {
        Ok(committed) => (
            committed
                .results
                .into_iter()
                .map(|r| match r {
                    Ok(Applied::Written) => (Outcome::Patched, None),
                    Ok(Applied::Unchanged) => (Outcome::Unchanged, None),
                    Err(e) => (Outcome::WriteFailed, Some(e.to_string())),
                })
                .collect::<Vec<_>>(),
            committed.error,
        ),
        // nothing was written
        Err(e) => (vec![(Outcome::WriteFailed, None); planned.len()], Some(e)),
    };
    if let Some(e) = error {
        report.error = Some(format!("{:#}", e));
    }

    for (&index, (outcome, note)) in planned.iter().zip(outcomes) {
        let old = &report.records[index];
        let mut record = FieldRecord::new(old.kind, old.offset, old.len, outcome)
            .with_values(old.old_value, old.new_value);
        record.note = note;
        report.records[index] = record;
    }
}

fn collect_warnings(file: &FileReport, run: &Run, warnings: &mut Vec<String>) {
    if file.error.is_some() || run.mode == Mode::Read {
        return;
    }
    let found = file.found().filter(|r| r.outcome != Outcome::Unsupported).count();
    let matched = file.records.iter().filter(|r| r.matched).count();
    if found > 0 && matched == 0 {
        warnings.push(format!(
            "{}: {} field(s) found but none matched the old time",
            file.path.display(),
            found
        ));
    } else if found == 0 {
        warnings.push(format!("{}: no timestamp fields found", file.path.display()));
    }
    if found > 0 && file.vendor_boxes == 0 {
        warnings.push(format!(
            "{}: no inst box; vendor fields were searched for in the whole file",
            file.path.display()
        ));
    }
}
