//! CLI tests against the `guidex` binary with the SQLite backend.
//!
//! Only commands that need no model weights are exercised here.

mod common;

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    common::write_guides(&root.join("guides"));

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("guidex.toml");
    fs::write(&config_path, common::sqlite_config(&root)).unwrap();

    (tmp, config_path)
}

fn run(config: &PathBuf, args: &[&str]) -> Output {
    Command::new(common::guidex_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run guidex")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_init_creates_default_sets() {
    let (_tmp, config) = setup();

    let output = run(&config, &["init"]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out = stdout(&output);
    assert!(out.contains("pdf_instructions (384 dims, Flat/IP)"), "{}", out);
    assert!(out.contains("pdf_instructions_image_text (512 dims, Flat/IP)"), "{}", out);
    assert!(out.contains("ok"));

    // Idempotent
    let again = run(&config, &["init"]);
    assert!(again.status.success());
}

#[test]
fn test_sets_reports_status() {
    let (_tmp, config) = setup();

    let before = stdout(&run(&config, &["sets"]));
    assert!(before.contains("missing"), "{}", before);

    assert!(run(&config, &["init", "--pipeline", "text"]).status.success());

    let after = stdout(&run(&config, &["sets"]));
    let text_line = after
        .lines()
        .find(|l| l.starts_with("text "))
        .expect("text pipeline listed");
    assert!(text_line.contains("ok (0 descriptors)"), "{}", text_line);
    let mm_line = after
        .lines()
        .find(|l| l.starts_with("multimodal "))
        .expect("multimodal pipeline listed");
    assert!(mm_line.contains("missing"), "{}", mm_line);
}

#[test]
fn test_extract_prints_headings() {
    let (tmp, config) = setup();
    let pdf = tmp.path().join("guides").join("invite_team_member.pdf");

    let output = run(&config, &["extract", pdf.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "extract failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out = stdout(&output);
    assert!(out.starts_with("invite_team_member"), "{}", out);
    assert!(out.contains("Invite Team Member"), "{}", out);
    assert!(!out.contains("images:"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config) = setup();
    let guides = tmp.path().join("guides");

    let output = run(&config, &["ingest", guides.to_str().unwrap(), "--dry-run"]);
    assert!(
        output.status.success(),
        "dry run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out = stdout(&output);
    assert!(out.contains("(dry-run)"), "{}", out);
    assert!(out.contains("documents: 2"), "{}", out);
    assert!(!tmp.path().join("data").join("guidex.sqlite").exists());
}

#[test]
fn test_unknown_pipeline_fails() {
    let (_tmp, config) = setup();
    let output = run(&config, &["init", "--pipeline", "nope"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown pipeline"));
}

#[test]
fn test_missing_config_fails() {
    let output = Command::new(common::guidex_binary())
        .args(["--config", "/nonexistent/guidex.toml", "sets"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}
