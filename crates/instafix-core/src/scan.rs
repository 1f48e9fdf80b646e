use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::ops::Range;
use std::path::Path;

use anyhow::Context;

use crate::date::codec;
use crate::date::TimeValue;
use crate::field::{rule_for, FieldKind, FIELD_RULES};
use crate::locate::{self, Candidate, Sighting, Window};
use crate::ThrottledProgress;

/// Bytes read per scan window.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Bytes carried from one window into the next. Must exceed the widest
/// signature plus its context (an atom header with both time slots is 20).
pub const WINDOW_OVERLAP: usize = 256;

/// A signature found in a layout that is reported but never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    pub kind: FieldKind,
    pub offset: u64,
    pub reason: String,
}

/// Everything the locator found in one file.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub file_len: u64,
    /// Sorted by offset, then field kind.
    pub candidates: Vec<Candidate>,
    pub unsupported: Vec<Unsupported>,
    /// Payload ranges of vendor boxes.
    pub vendor_boxes: Vec<Range<u64>>,
}

impl ScanResult {
    pub fn of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(move |c| c.spec.kind == kind)
    }
}

/// Scan a file on disk. The handle is dropped before returning.
pub fn scan_file(
    path: &Path,
    old: Option<&TimeValue>,
    chunk_size: usize,
    progress: &ThrottledProgress,
) -> anyhow::Result<ScanResult> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let label = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    scan_reader(BufReader::new(file), file_len, old, chunk_size, progress, &label)
        .with_context(|| format!("cannot read {}", path.display()))
}

/// Scan `reader` window by window. `file_len` must be the total length.
pub fn scan_reader<R: Read>(
    mut reader: R,
    file_len: u64,
    old: Option<&TimeValue>,
    chunk_size: usize,
    progress: &ThrottledProgress,
    label: &str,
) -> io::Result<ScanResult> {
    let chunk_size = chunk_size.max(1);
    let mut found: BTreeMap<(u64, FieldKind), Candidate> = BTreeMap::new();
    let mut unsupported: BTreeMap<(u64, FieldKind), String> = BTreeMap::new();
    let mut vendor_boxes: Vec<Range<u64>> = Vec::new();

    let mut buf: Vec<u8> = Vec::with_capacity(chunk_size.min(DEFAULT_CHUNK_SIZE) + WINDOW_OVERLAP);
    let mut consumed: u64 = 0;

    loop {
        let n = reader.by_ref().take(chunk_size as u64).read_to_end(&mut buf)?;
        if n == 0 {
            break;
        }
        consumed += n as u64;

        let window = Window {
            base: consumed - buf.len() as u64,
            bytes: &buf,
            file_len,
        };

        for rule in FIELD_RULES {
            for sighting in locate::locate(&window, rule, old) {
                match sighting {
                    Sighting::Field(c) => {
                        found.entry((c.spec.offset, c.spec.kind)).or_insert(c);
                    }
                    Sighting::Unsupported { kind, offset, reason } => {
                        unsupported.entry((offset, kind)).or_insert(reason);
                    }
                }
            }
        }
        for range in locate::locate_vendor_boxes(&window) {
            if !vendor_boxes.contains(&range) {
                vendor_boxes.push(range);
            }
        }

        progress.report("scan", consumed.saturating_sub(1), file_len, label);

        let keep = buf.len().min(WINDOW_OVERLAP);
        buf.drain(..buf.len() - keep);
    }

    let mut candidates: Vec<Candidate> = found.into_values().collect();
    confine_protobuf(&mut candidates, &vendor_boxes, old);

    Ok(ScanResult {
        file_len,
        candidates,
        unsupported: unsupported
            .into_iter()
            .map(|((offset, kind), reason)| Unsupported { kind, offset, reason })
            .collect(),
        vendor_boxes,
    })
}

/// Drop protobuf hits that cannot belong to the vendor metadata.
///
/// Inside a file with vendor boxes only hits within a box count. Without
/// one, creation-time hits stand on their own, while GPS hits must sit near
/// the reference time: the old time, or else the first creation time seen.
fn confine_protobuf(candidates: &mut Vec<Candidate>, boxes: &[Range<u64>], old: Option<&TimeValue>) {
    if !boxes.is_empty() {
        candidates.retain(|c| !c.spec.kind.is_protobuf() || locate::within_any(&c.spec, boxes));
        return;
    }

    let reference = old.copied().or_else(|| {
        candidates
            .iter()
            .filter(|c| c.spec.kind == FieldKind::ProtobufCreationTime)
            .find_map(|c| codec::decode(&c.raw, c.spec.encoding).ok())
    });
    let Some(gps_rule) = rule_for(FieldKind::ProtobufGpsTimestamp) else { return };

    candidates.retain(|c| {
        if c.spec.kind != FieldKind::ProtobufGpsTimestamp {
            return true;
        }
        match (reference, codec::decode(&c.raw, c.spec.encoding)) {
            (Some(reference), Ok(value)) => value.is_near(&reference, gps_rule.tolerance()),
            _ => false,
        }
    });
}
