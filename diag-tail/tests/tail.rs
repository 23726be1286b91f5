use assert_cmd::Command;
use diag_ring::tracing_bridge::DiagnosticsLayer;
use diag_ring::{Configuration, Level, SelfDiagnostics};
use tracing_subscriber::layer::SubscriberExt;

use std::time::Duration;

#[test]
fn prints_wrapped_log_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrapped.log");
    std::fs::write(
        &path,
        concat!(
            "ing\n",
            "2026-10-19T08:00:02.000000Z:WARN sdk: second\n",
            "nant of an older line\n",
            "2026-10-19T08:00:01.000000Z:WARN sdk: first\n",
            "2026-10-19T08:00:03.000000Z:WARN sdk: wrapp",
        ),
    )
    .unwrap();

    Command::cargo_bin("diag-tail")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout(concat!(
            "2026-10-19T08:00:01.000000Z:WARN sdk: first\n",
            "2026-10-19T08:00:02.000000Z:WARN sdk: second\n",
            "2026-10-19T08:00:03.000000Z:WARN sdk: wrapping\n",
        ));

    // Fragments come after the ordered lines.
    let assert = Command::cargo_bin("diag-tail")
        .unwrap()
        .arg("--all")
        .arg(&path)
        .assert()
        .success();
    let stdout = &assert.get_output().stdout;
    assert!(stdout.starts_with(b"2026-10-19T08:00:01.000000Z:WARN sdk: first\n"));
    assert!(stdout.ends_with(b"wrapping\nnant of an older line\n"));
}

#[test]
fn missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("diag-tail")
        .unwrap()
        .arg(dir.path().join("absent.log"))
        .assert()
        .failure();
}

#[test]
fn reads_a_wrapped_diag_ring_log() {
    const EVENTS: usize = 200;

    let dir = tempfile::tempdir().unwrap();
    let config = Configuration::new(dir.path(), 1, Level::Error);

    let layer = DiagnosticsLayer::new();
    let diagnostics = SelfDiagnostics::new(move || Some(config.clone()), layer.factory());
    let path = diagnostics.writer().path().unwrap();

    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, || {
        for event in 0..EVENTS {
            tracing::error!(target: "sdk", "event {event:04}");
            // Distinct timestamps, so the order is unambiguous.
            std::thread::sleep(Duration::from_micros(50));
        }
    });
    diagnostics.shutdown();

    let output = Command::cargo_bin("diag-tail")
        .unwrap()
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let events: Vec<usize> = stdout
        .lines()
        .map(|line| {
            let (_, number) = line.rsplit_once("event ").unwrap();
            number.parse().unwrap()
        })
        .collect();

    // A kilobyte holds the last twenty or so.
    assert!(events.len() > 10, "{stdout}");
    assert!(events.windows(2).all(|pair| pair[0] < pair[1]), "{stdout}");
    assert_eq!(events.last(), Some(&(EVENTS - 1)));
}
