#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use vmtrack::replay::{read_trace, Replayer, TraceRecord};
use vmtrack::{NativeCallStack, TrackerConfig};

fn tests_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests")
}

fn snapshot_root() -> PathBuf {
    tests_root().join("snapshots")
}

/// Compare a rendered report with `tests/snapshots/<name>`
///
/// Addresses compare by value, so snapshots may spell `0x0000000000010000`
/// as `0x10000`. Trailing blanks are ignored.
pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var_os("VMTRACK_UPDATE_SNAPSHOTS").is_some() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, canonical_report(actual)).expect("write snapshot");
        return;
    }

    let expected = fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("snapshot {:?} unreadable: {}", path, err));
    let expected = canonical_report(&expected);
    let actual = canonical_report(actual);
    let mut lines = expected.lines().zip(actual.lines()).enumerate();
    if let Some((index, (want, got))) = lines.find(|(_, (want, got))| want != got) {
        panic!(
            "report differs from {:?} at line {}\n  expected: {:?}\n    actual: {:?}\n\
             set VMTRACK_UPDATE_SNAPSHOTS=1 to regenerate",
            path,
            index + 1,
            want,
            got
        );
    }
    assert_eq!(
        expected.lines().count(),
        actual.lines().count(),
        "report line count differs from {:?}\nactual:\n{}",
        path,
        actual
    );
}

/// Report text with zero-padded hex shortened and line ends trimmed
fn canonical_report(report: &str) -> String {
    let mut out = String::with_capacity(report.len());
    for line in report.lines() {
        out.push_str(&shorten_hex(line.trim_end()));
        out.push('\n');
    }
    out
}

fn shorten_hex(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(at) = rest.find("0x") {
        out.push_str(&rest[..at + 2]);
        rest = &rest[at + 2..];
        let digits = rest.bytes().take_while(u8::is_ascii_hexdigit).count();
        let significant = rest[..digits].trim_start_matches('0');
        if digits > 0 && significant.is_empty() {
            out.push('0');
        } else {
            out.push_str(significant);
        }
        rest = &rest[digits..];
    }
    out.push_str(rest);
    out
}

pub fn load_trace(name: &str) -> Vec<TraceRecord> {
    let path = tests_root().join("traces").join(name);
    read_trace(&path).unwrap_or_else(|err| panic!("trace {:?} unreadable: {:#}", path, err))
}

pub fn replay(name: &str, config: TrackerConfig) -> Replayer {
    let mut replayer = Replayer::new(config);
    replayer
        .run(&load_trace(name))
        .unwrap_or_else(|err| panic!("replay of {} failed: {:#}", name, err));
    replayer
}

pub fn stack(frames: &[usize]) -> NativeCallStack {
    NativeCallStack::new(frames.to_vec())
}
