//! Print the readable lines of a self-diagnostics log in the order they were written.
//!
//! The log is a ring: the oldest bytes follow the write position and the line that crossed the end
//! of the file continues at offset 0. Lines are recognized by their leading RFC 3339 timestamp,
//! everything else is a fragment of an overwritten line.
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, FixedOffset};
use clap::Parser;

fn main() -> ExitCode {
    let TailCommand { file, all } = TailCommand::parse();

    let bytes = match std::fs::read(&file) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Error reading {}: {err}", file.display());
            return ExitCode::FAILURE;
        }
    };

    let mut out = BufWriter::new(io::stdout().lock());
    let printed = recover_lines(&bytes, all)
        .iter()
        .try_for_each(|line| writeln!(out, "{line}"))
        .and_then(|()| out.flush());

    match printed {
        Ok(()) => ExitCode::SUCCESS,
        // The reader went away, e.g. `diag-tail log | head`.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error writing lines: {err}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Parser)]
struct TailCommand {
    #[arg(help = "The log file written by diag-ring")]
    file: PathBuf,

    /// Also print fragments without a timestamp, in file order after the ordered lines.
    #[arg(long)]
    all: bool,
}

/// Complete lines ordered by timestamp, optionally followed by the fragments.
fn recover_lines(bytes: &[u8], all: bool) -> Vec<String> {
    // Never written parts of the file are zero.
    let bytes: Vec<u8> = bytes.iter().copied().filter(|&byte| byte != 0).collect();
    let stitched: Vec<u8>;

    let mut segments: Vec<&[u8]> = bytes.split(|&byte| byte == b'\n').collect();
    // Whatever follows the last newline is unterminated: the head of a line crossing the end of the
    // file, or empty.
    let unterminated = segments.pop().unwrap_or_default();

    if !unterminated.is_empty() {
        let continued = segments
            .first()
            .is_some_and(|first| timestamp(&String::from_utf8_lossy(first)).is_none());

        // Joined before decoding, a character may be split across the end as well.
        if continued {
            stitched = [unterminated, segments[0]].concat();
            segments[0] = stitched.as_slice();
        } else {
            segments.push(unterminated);
        }
    }

    let mut stamped = Vec::new();
    let mut fragments = Vec::new();
    for segment in segments {
        let text = String::from_utf8_lossy(segment);
        let line = text.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        match timestamp(line) {
            Some(at) => stamped.push((at, line.to_owned())),
            None => fragments.push(line.to_owned()),
        }
    }

    stamped.sort_by_key(|(at, _)| *at);

    let mut lines: Vec<String> = stamped.into_iter().map(|(_, line)| line).collect();
    if all {
        lines.extend(fragments);
    }

    lines
}

/// The `2026-10-19T08:15:02.123456Z:` prefix of a line.
fn timestamp(line: &str) -> Option<DateTime<FixedOffset>> {
    let (stamp, _) = line.split_once("Z:")?;
    DateTime::parse_from_rfc3339(&format!("{stamp}Z")).ok()
}
