mod support;

use osmio::{Reader, Stats};

use std::ffi::OsStr;
use std::process::{Command, Output};

fn bench<S: AsRef<OsStr>>(args: &[S]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_osmio-bench-write-pbf"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

#[test]
fn test_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = support::fixture(dir.path());
    let output = dir.path().join("copy.osm.pbf");

    let result = bench(&[&input, &output]);
    assert!(result.status.success(), "{:?}", result);

    assert_eq!(support::read_ids(&output), support::read_ids(&input));

    let reader = Reader::open(output.as_path()).unwrap();
    assert_ne!(reader.header().generator(), support::GENERATOR);
    assert!(reader.header().generator().starts_with("osmio"));
}

#[test]
fn test_overwrites_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = support::fixture(dir.path());
    let output = dir.path().join("copy.osm.pbf");
    std::fs::write(&output, b"stale").unwrap();

    assert!(bench(&[&input, &output]).status.success());

    let mut stats = Stats::default();
    let mut reader = Reader::open(output.as_path()).unwrap();
    reader.apply(&mut stats, Default::default()).unwrap();
    assert_eq!(stats.total(), 9);
}

#[test]
fn test_wrong_argument_count() {
    let dir = tempfile::tempdir().unwrap();
    let input = support::fixture(dir.path());

    let result = bench(&[&input]);
    assert_eq!(result.status.code(), Some(1));
    assert!(!result.stderr.is_empty());

    let extra = dir.path().join("extra");
    let result = bench(&[&input, &extra, &extra]);
    assert_eq!(result.status.code(), Some(1));
}

#[test]
fn test_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.osm.pbf");
    let output = dir.path().join("out.osm.pbf");
    let result = bench(&[&input, &output]);
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("Error"));
    assert!(!output.exists());
}
