//! CLI smoke tests for the offline subcommands.

use assert_cmd::Command;
use predicates::prelude::*;

fn write_file(path: &std::path::Path, contents: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, contents);
}

#[test]
fn plan_previews_chunks() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir failed: {e}"),
    };
    write_file(&dir.path().join("a.yml"), "name: a\n");
    write_file(&dir.path().join("b.yml"), "name: b\n");

    let mut cmd = match Command::cargo_bin("kg-forge") {
        Ok(c) => c,
        Err(e) => unreachable!("binary not built: {e}"),
    };
    cmd.arg("plan")
        .arg("--data-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2 file(s)"))
        .stdout(predicate::str::contains("chunk-000"));
}

#[test]
fn validate_reports_broken_reference() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir failed: {e}"),
    };
    let graph = dir.path().join("graph.jsonld");
    write_file(
        &graph,
        r#"{
  "@context": {"@vocab": "http://schema.org/"},
  "@graph": [
    {"@id": "urn:Service:x", "@type": "Service", "name": "X",
     "ownedBy": {"@id": "urn:Team:ghost"}}
  ]
}"#,
    );

    let mut cmd = match Command::cargo_bin("kg-forge") {
        Ok(c) => c,
        Err(e) => unreachable!("binary not built: {e}"),
    };
    cmd.arg("validate")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("urn:Team:ghost"));
}

#[test]
fn missing_data_dir_fails() {
    let mut cmd = match Command::cargo_bin("kg-forge") {
        Ok(c) => c,
        Err(e) => unreachable!("binary not built: {e}"),
    };
    cmd.arg("plan")
        .arg("--data-dir")
        .arg("/definitely/not/here")
        .assert()
        .failure()
        .stderr(predicate::str::contains("data directory not found"));
}
