//! CLI test cases.
//!
//! Most of these avoid needing Poppler or Tesseract, by feeding the pipeline
//! files which fail soft before any external tool runs. Tests which need the
//! real tools are ignored by default.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("doc-classifier").unwrap()
}

/// A temporary directory whose path contains none of our document keywords.
/// Storage paths are classified before original names, so a staging directory
/// named something like `.tmpPaNq1z` would change every record's type.
fn keyword_free_tempdir() -> tempfile::TempDir {
    for _ in 0..100 {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_lowercase();
        if !["passport", "citizenship", "pan"]
            .iter()
            .any(|keyword| path.contains(keyword))
        {
            return dir;
        }
    }
    panic!("every temporary directory path contained a keyword");
}

/// Run `process` with a private staging directory, returning the parsed JSON
/// output.
fn process(staging_dir: &Path, inputs: &[&Path]) -> Vec<Value> {
    let output = cmd()
        .arg("process")
        .arg("--staging-dir")
        .arg(staging_dir)
        .args(inputs)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "process failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_classify_names() {
    let output = cmd()
        .args([
            "classify",
            "my_passport_scan.png",
            "citizenship_cert.pdf",
            "id_pan_card.jpg",
            "random_doc.png",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let records: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    let types = records
        .iter()
        .map(|r| r["document_type"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        types,
        ["Passport", "Citizenship", "PAN Card", "Unknown Document Type"]
    );
}

#[test]
fn test_process_requires_files() {
    cmd().arg("process").assert().failure();
}

#[test]
fn test_process_missing_input_fails() {
    let staging = tempfile::tempdir().unwrap();
    cmd()
        .arg("process")
        .arg("--staging-dir")
        .arg(staging.path())
        .arg("does/not/exist.png")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_process_soft_failures_and_cleanup() {
    let inputs = tempfile::tempdir().unwrap();
    let staging = keyword_free_tempdir();
    let staging_dir = staging.path().join("uploads");

    let notes = inputs.path().join("passport_notes.txt");
    fs::write(&notes, "not an image").unwrap();
    let broken_image = inputs.path().join("citizenship.png");
    fs::write(&broken_image, "not a png either").unwrap();
    let broken_pdf = inputs.path().join("pan.pdf");
    fs::write(&broken_pdf, "not a pdf").unwrap();
    let other = inputs.path().join("letter.docx");
    fs::write(&other, "").unwrap();

    let records = process(&staging_dir, &[&notes, &broken_image, &broken_pdf, &other]);

    assert_eq!(records.len(), 4);
    let expected = [
        ("passport_notes.txt", "Passport"),
        ("citizenship.png", "Citizenship"),
        ("pan.pdf", "PAN Card"),
        ("letter.docx", "Unknown Document Type"),
    ];
    for (record, (name, document_type)) in records.iter().zip(expected) {
        assert_eq!(record["file_name"], name);
        assert_eq!(record["document_type"], document_type);
        assert_eq!(record["extracted_text"], "");
        let file_path = record["file_path"].as_str().unwrap();
        assert!(Path::new(file_path).starts_with(&staging_dir));
        assert!(!Path::new(file_path).exists());
    }

    // Nothing is left behind in the staging directory.
    assert_eq!(fs::read_dir(&staging_dir).unwrap().count(), 0);
}

#[test]
fn test_process_writes_output_file() {
    let inputs = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let input = inputs.path().join("notes.txt");
    fs::write(&input, "hello").unwrap();
    let out = inputs.path().join("out.json");

    cmd()
        .arg("process")
        .arg("--staging-dir")
        .arg(staging.path())
        .arg("-o")
        .arg(&out)
        .arg(&input)
        .assert()
        .success();

    let records: Vec<Value> =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["file_name"], "notes.txt");
}

#[test]
fn test_process_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "no_such_setting = true\n").unwrap();
    let input = dir.path().join("notes.txt");
    fs::write(&input, "hello").unwrap();

    cmd()
        .arg("process")
        .arg("--config")
        .arg(&config)
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse TOML"));
}

#[test]
fn test_schema() {
    cmd()
        .args(["schema", "DocumentRecord"])
        .assert()
        .success()
        .stdout(predicate::str::contains("extracted_text"));
    cmd()
        .args(["schema", "Config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("staging_dir"));
}

#[test]
#[ignore = "Requires poppler-utils and tesseract to be installed"]
fn test_process_real_pdf() {
    let inputs = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let pdf = inputs.path().join("citizenship_two_pages.pdf");
    fs::copy("tests/fixtures/two_pages.pdf", &pdf).unwrap();

    let records = process(staging.path(), &[&pdf]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["document_type"], "Citizenship");
    let text = records[0]["extracted_text"].as_str().unwrap();
    assert!(text.contains("Page one"), "unexpected text: {text:?}");
    assert!(text.contains("Page two"), "unexpected text: {text:?}");
}
