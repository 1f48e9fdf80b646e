use std::fmt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::Context;
use chrono::TimeDelta;
use filetime::FileTime;

use crate::date::codec::{self, CodecError};
use crate::date::TimeValue;
use crate::field::FieldSpec;
use crate::locate::Candidate;

/// One validated field and its replacement bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub spec: FieldSpec,
    pub old_bytes: Vec<u8>,
    pub new_bytes: Vec<u8>,
    pub old_value: TimeValue,
    pub new_value: TimeValue,
}

/// Why a validated field was not put into the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    LengthMismatch { old: usize, new: usize, new_value: TimeValue },
    Encode(CodecError),
    Overlap { offset: u64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::LengthMismatch { old, new, .. } => {
                write!(f, "new value needs {} bytes, field has {}; cannot patch in place", new, old)
            }
            Rejection::Encode(e) => write!(f, "cannot encode new value: {}", e),
            Rejection::Overlap { offset } => write!(f, "overlaps the field at offset {}", offset),
        }
    }
}

/// Shift a validated field by `delta` and encode the result.
///
/// The field keeps its distance from the old time, so a UTC field stays in
/// UTC and GPS milliseconds survive.
pub fn prepare(candidate: &Candidate, current: TimeValue, delta: TimeDelta) -> Result<PatchEntry, Rejection> {
    let new_value = current
        .shifted(delta)
        .ok_or_else(|| Rejection::Encode(CodecError::OutOfRange(format!("{} shifted by {}", current, delta))))?;
    let new_bytes = codec::encode(&new_value, candidate.spec.encoding).map_err(Rejection::Encode)?;
    if new_bytes.len() != candidate.raw.len() {
        return Err(Rejection::LengthMismatch {
            old: candidate.raw.len(),
            new: new_bytes.len(),
            new_value,
        });
    }
    Ok(PatchEntry {
        spec: candidate.spec,
        old_bytes: candidate.raw.clone(),
        new_bytes,
        old_value: current,
        new_value,
    })
}

/// Same-length, non-overlapping overwrites for one file.
#[derive(Debug, Clone, Default)]
pub struct PatchPlan {
    entries: Vec<PatchEntry>,
}

impl PatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, refusing length changes and overlaps with earlier entries.
    pub fn push(&mut self, entry: PatchEntry) -> Result<(), Rejection> {
        if entry.old_bytes.len() != entry.new_bytes.len() || entry.old_bytes.len() != entry.spec.len {
            return Err(Rejection::LengthMismatch {
                old: entry.spec.len,
                new: entry.new_bytes.len(),
                new_value: entry.new_value,
            });
        }
        if let Some(other) = self.entries.iter().find(|e| e.spec.overlaps(&entry.spec)) {
            return Err(Rejection::Overlap { offset: other.spec.offset });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Written,
    /// Old and new bytes are equal; nothing was written.
    Unchanged,
}

#[derive(Debug)]
pub enum ApplyError {
    Io(io::Error),
    /// The bytes on disk are no longer the ones that were validated.
    Stale { offset: u64 },
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::Io(e) => write!(f, "{}", e),
            ApplyError::Stale { offset } => write!(f, "unexpected bytes at offset {}", offset),
        }
    }
}

impl std::error::Error for ApplyError {}

impl From<io::Error> for ApplyError {
    fn from(e: io::Error) -> Self {
        ApplyError::Io(e)
    }
}

/// Re-check the old bytes at the entry's offset, then overwrite them.
pub fn apply_entry<F: Read + Write + Seek>(target: &mut F, entry: &PatchEntry) -> Result<Applied, ApplyError> {
    let offset = entry.spec.offset;
    target.seek(SeekFrom::Start(offset))?;
    let mut existing = vec![0u8; entry.old_bytes.len()];
    target.read_exact(&mut existing)?;
    if existing != entry.old_bytes {
        return Err(ApplyError::Stale { offset });
    }
    if entry.new_bytes == entry.old_bytes {
        return Ok(Applied::Unchanged);
    }
    target.seek(SeekFrom::Start(offset))?;
    target.write_all(&entry.new_bytes)?;
    Ok(Applied::Written)
}

/// Apply every entry in plan order. One result per entry; a failed entry
/// does not stop the rest.
pub fn apply_plan<F: Read + Write + Seek>(target: &mut F, plan: &PatchPlan) -> Vec<Result<Applied, ApplyError>> {
    plan.entries().iter().map(|e| apply_entry(target, e)).collect()
}

/// What a commit did to one file.
#[derive(Debug, Default)]
pub struct Committed {
    /// One result per plan entry, in plan order.
    pub results: Vec<Result<Applied, ApplyError>>,
    /// Failure after the entries were written: flush, length check or mtime restore.
    pub error: Option<anyhow::Error>,
}

/// Write a plan into the file at `path`.
///
/// `Err` only when nothing was written (the file cannot be stat'ed or
/// opened). Anything that fails later is in `Committed::error`, next to
/// the per-entry results.
pub fn commit(path: &Path, plan: &PatchPlan, keep_mtime: bool) -> anyhow::Result<Committed> {
    if plan.is_empty() {
        return Ok(Committed::default());
    }

    let before = fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("cannot open {} for writing", path.display()))?;

    let results = apply_plan(&mut file, plan);
    let written = results.iter().any(|r| matches!(r, Ok(Applied::Written)));
    let error = finish(path, file, &before, keep_mtime && written).err();
    Ok(Committed { results, error })
}

fn finish(path: &Path, file: File, before: &Metadata, restore_mtime: bool) -> anyhow::Result<()> {
    file.sync_all().with_context(|| format!("cannot flush {}", path.display()))?;
    drop(file);

    let after = fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    if after.len() != before.len() {
        anyhow::bail!(
            "{} changed length during patching ({} -> {} bytes)",
            path.display(),
            before.len(),
            after.len()
        );
    }

    if restore_mtime {
        let mtime = FileTime::from_last_modification_time(before);
        filetime::set_file_mtime(path, mtime).with_context(|| format!("cannot restore mtime of {}", path.display()))?;
    }
    Ok(())
}
