//! End-to-end tests for Vesta CLI commands.
//!
//! These tests render real documents to markdown, which needs neither
//! pandoc nor a language interpreter.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Temporary directory holding one document.
struct TestDocument {
    temp_dir: TempDir,
    path: PathBuf,
}

impl TestDocument {
    fn new(filename: &str, source: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(filename);
        fs::write(&path, source).expect("Failed to write document");
        Self { temp_dir, path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn arg(&self) -> &str {
        self.path.to_str().expect("utf-8 path")
    }

    fn sibling(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// `vesta` with the user config isolated to `dir`.
fn vesta(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vesta").expect("Failed to find vesta binary");
    cmd.env("XDG_CONFIG_HOME", dir.path().join("config"));
    cmd
}

const PROSE: &str = "---\ntitle: Notes\n---\n\n# Notes\n\nNothing to run here.\n";

const PYTHON: &str = r#"---
title: Report
---

# Results

```{python}
#| echo: true
print(1 + 1)
```
"#;

// =============================================================================
// vesta render Tests
// =============================================================================

#[test]
fn test_render_missing_input() {
    let temp = TempDir::new().expect("temp dir");
    vesta(&temp)
        .args(["render", "/nonexistent/report.qmd", "--to", "md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input not found"));
}

#[test]
fn test_render_unknown_extension() {
    let doc = TestDocument::new("slides.docx", "binary");
    vesta(&doc.temp_dir)
        .args(["render", doc.arg(), "--to", "md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no execution engine claims"))
        .stderr(predicate::str::contains("hint"));
}

#[test]
fn test_render_prose_qmd_to_markdown() {
    let doc = TestDocument::new("notes.qmd", PROSE);

    vesta(&doc.temp_dir)
        .args(["render", doc.arg(), "--to", "md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[markdown]"))
        .stdout(predicate::str::contains("Output created"));

    let output = fs::read_to_string(doc.sibling("notes.md")).expect("output written");
    assert_eq!(output, PROSE);
    assert!(!doc.sibling("notes.vesta.md").exists());
}

#[test]
fn test_render_markdown_never_overwrites_source() {
    let doc = TestDocument::new("notes.md", PROSE);

    vesta(&doc.temp_dir)
        .args(["render", doc.arg(), "--to", "md"])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(doc.path()).expect("source"), PROSE);
    assert_eq!(
        fs::read_to_string(doc.sibling("notes.out.md")).expect("output"),
        PROSE
    );
}

#[test]
fn test_render_without_execution() {
    let doc = TestDocument::new("report.qmd", PYTHON);

    vesta(&doc.temp_dir)
        .args(["render", doc.arg(), "--to", "md", "--no-execute", "--keep-md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[jupyter]"));

    let output = fs::read_to_string(doc.sibling("report.md")).expect("output written");
    assert!(output.starts_with("---\ntitle: Report\n---"));
    assert!(output.contains("::: {.cell}\n```{.python .cell-code}\nprint(1 + 1)\n```\n:::"));

    // The transient notebook is gone, the intermediate markdown was kept.
    assert!(!doc.sibling("report.ipynb").exists());
    assert!(doc.sibling("report.vesta.md").exists());
}

#[test]
fn test_render_keep_ipynb() {
    let doc = TestDocument::new("report.qmd", PYTHON);

    vesta(&doc.temp_dir)
        .args(["render", doc.arg(), "--to", "md", "--no-execute", "--keep-ipynb"])
        .assert()
        .success();

    let notebook: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(doc.sibling("report.ipynb")).expect("kept notebook"),
    )
    .expect("valid json");
    assert_eq!(notebook["metadata"]["vesta"]["source_file"], "report.qmd");
}

#[test]
fn test_render_output_requires_single_input() {
    let doc = TestDocument::new("notes.qmd", PROSE);
    vesta(&doc.temp_dir)
        .args(["render", doc.arg(), doc.arg(), "-o", "out.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("single input"));
}

// =============================================================================
// vesta convert Tests
// =============================================================================

#[test]
fn test_convert_roundtrip() {
    let doc = TestDocument::new("report.qmd", PYTHON);

    vesta(&doc.temp_dir)
        .args(["convert", doc.arg()])
        .assert()
        .success();
    let ipynb = doc.sibling("report.ipynb");
    assert!(ipynb.exists());

    let back = doc.sibling("back.qmd");
    vesta(&doc.temp_dir)
        .args([
            "convert",
            ipynb.to_str().expect("utf-8 path"),
            "-o",
            back.to_str().expect("utf-8 path"),
        ])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&back).expect("converted"), PYTHON);
}

#[test]
fn test_convert_rejects_other_files() {
    let doc = TestDocument::new("notes.txt", "text");
    vesta(&doc.temp_dir)
        .args(["convert", doc.arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected a .qmd or .ipynb"));
}
