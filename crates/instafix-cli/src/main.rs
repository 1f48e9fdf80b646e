use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use instafix_core::report::{FieldRecord, FileReport, OldTimeSource, Outcome};
use instafix_core::scan::DEFAULT_CHUNK_SIZE;
use instafix_core::{BatchReport, CancellationToken, Mode, PatchOptions, ProcessControl};

#[derive(Parser, Debug)]
#[command(name = "instafix", version, about = "Fix the shooting time recorded inside Insta360 videos, in place")]
struct Cli {
    /// Video files, optionally followed by [OLD_TIME] NEW_TIME as YYYYMMDDHHmmss
    #[arg(required = true, value_name = "FILES")]
    args: Vec<String>,

    /// List the timestamps found in each file; write nothing
    #[arg(long, conflicts_with = "dry_run")]
    read: bool,

    /// Show what would be patched; write nothing
    #[arg(long)]
    dry_run: bool,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Keep each file's modification time
    #[arg(long)]
    keep_mtime: bool,

    /// Old (wrong) shooting time; detected from the files when omitted
    #[arg(long, value_name = "TIME")]
    from: Option<String>,

    /// New (correct) shooting time
    #[arg(long, value_name = "TIME")]
    to: Option<String>,

    /// Scan window in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, hide = true)]
    chunk_size: usize,
}

/// A trailing argument made only of digits is a time, not a file name.
fn looks_like_time(arg: &str) -> bool {
    !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit())
}

/// Split positionals into files and up to two trailing times, then merge
/// with `--from`/`--to`.
fn split_args(cli: &Cli) -> anyhow::Result<(Vec<PathBuf>, Option<String>, Option<String>)> {
    let mut files = cli.args.clone();
    let mut times = Vec::new();
    while times.len() < 2 && files.len() > 1 && files.last().is_some_and(|a| looks_like_time(a)) {
        times.extend(files.pop());
    }
    times.reverse();

    let (old, new) = match times.as_slice() {
        [] => (None, None),
        [new] => (None, Some(new.clone())),
        [old, new, ..] => (Some(old.clone()), Some(new.clone())),
    };
    if old.is_some() && cli.from.is_some() {
        anyhow::bail!("old time given twice (positional and --from)");
    }
    if new.is_some() && cli.to.is_some() {
        anyhow::bail!("new time given twice (positional and --to)");
    }

    Ok((files.into_iter().map(PathBuf::from).collect(), old.or_else(|| cli.from.clone()), new.or_else(|| cli.to.clone())))
}

fn mode(cli: &Cli) -> Mode {
    if cli.read {
        Mode::Read
    } else if cli.dry_run {
        Mode::DryRun
    } else {
        Mode::Commit
    }
}

/// Progress callback drawing on `pb`. Owns its handle so it can live as long
/// as the core requires.
fn progress_reporter(pb: ProgressBar) -> impl Fn(&str, u64, u64, &str) + Send + Sync + 'static {
    move |stage: &str, current: u64, total: u64, message: &str| {
        pb.set_length(total);
        pb.set_position(current + 1);
        pb.set_prefix(stage.to_string());
        pb.set_message(message.to_string());
    }
}

fn render_record(record: &FieldRecord) -> String {
    let offset = match record.offset {
        Some(o) => format!("@0x{:08x}", o),
        None => "-".to_string(),
    };
    let values = match (record.old_value, record.new_value) {
        (Some(old), Some(new)) => format!("{} -> {}", old, new),
        (Some(old), None) => old.to_string(),
        _ => String::new(),
    };
    let mut line = format!("  {:<12} {:<32} {:<41} {}", offset, record.kind.to_string(), values, record.outcome);
    if let Some(note) = &record.note {
        line.push_str(&format!(" ({})", note));
    }
    line.trim_end().to_string()
}

fn print_file(file: &FileReport) {
    match file.size {
        Some(size) => eprintln!("{} ({} bytes)", file.path.display(), size),
        None => eprintln!("{}", file.path.display()),
    }
    if let Some(err) = &file.error {
        eprintln!("  error: {}", err);
    }
    for record in &file.records {
        eprintln!("{}", render_record(record));
    }
}

fn print_report(report: &BatchReport) {
    eprintln!("Mode: {}", report.mode);
    match (&report.old_time, &report.old_time_source) {
        (Some(old), Some(OldTimeSource::Detected { path, field })) => {
            eprintln!("Old time: {} (detected from {} in {})", old, field, path.display())
        }
        (Some(old), _) => eprintln!("Old time: {}", old),
        (None, _) => {}
    }
    if let Some(new) = &report.new_time {
        eprintln!("New time: {}", new);
    }
    for file in &report.files {
        print_file(file);
    }
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    if report.cancelled {
        eprintln!("Cancelled; remaining files were not processed");
    }
}

/// Field count for the closing line, by what the mode did.
fn summary(report: &BatchReport) -> (usize, &'static str) {
    let count = |keep: &dyn Fn(&FieldRecord) -> bool| -> usize {
        report.files.iter().map(|f| f.records.iter().filter(|r| keep(r)).count()).sum()
    };
    match report.mode {
        Mode::Read => (count(&|r| r.found), "read"),
        Mode::DryRun => (count(&|r| r.outcome == Outcome::WouldPatch), "would be patched"),
        Mode::Commit => (count(&|r| r.patched), "patched"),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let (files, old_time, new_time) = split_args(&cli)?;
    let options = PatchOptions {
        files,
        old_time,
        new_time,
        mode: mode(&cli),
        chunk_size: cli.chunk_size,
        keep_mtime: cli.keep_mtime,
    };

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nCancelling after the current file...");
            token.cancel();
        })?;
    }
    let control = ProcessControl::new().with_cancel_token(token);

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {percent:>3}% {prefix} {msg}")?);
    let result = instafix_core::process_with_control(&options, &control, &progress_reporter(pb.clone()));
    pb.finish_and_clear();
    let report = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let (fields, verb) = summary(&report);
    eprintln!(
        "Done! {} file(s), {} field(s) {} ({:.2}s)",
        report.files.len(),
        fields,
        verb,
        t_total.elapsed().as_secs_f64()
    );

    report.check()?;
    Ok(())
}
