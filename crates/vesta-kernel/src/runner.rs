//! Notebook execution.
//!
//! Each code cell runs in a fresh interpreter process for the notebook's
//! language, with the cell source passed on the command line.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, anyhow, bail};
use vesta_jupyter::cell_options::parse_cell_options;
use vesta_jupyter::{Cell, Notebook, Output};

/// Interpreter command line for a language: program and the flag that
/// takes the code.
pub fn interpreter_for(language: &str) -> Option<(&'static str, &'static str)> {
    match language.to_lowercase().as_str() {
        "python" | "python3" => Some(("python3", "-c")),
        "bash" => Some(("bash", "-c")),
        "sh" => Some(("sh", "-c")),
        "r" => Some(("Rscript", "-e")),
        "julia" => Some(("julia", "-e")),
        _ => None,
    }
}

/// Captured result of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRun {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// Exit status, for error messages.
    pub status: String,
}

/// Run `source` through `interpreter` in `cwd`.
pub fn run_cell(interpreter: (&str, &str), source: &str, cwd: &Path) -> anyhow::Result<CellRun> {
    let (program, flag) = interpreter;
    let output = Command::new(program)
        .arg(flag)
        .arg(source)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("Failed to start interpreter '{}'", program))?;

    Ok(CellRun {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
        status: output.status.to_string(),
    })
}

fn error_output(run: &CellRun) -> Output {
    let evalue = run
        .stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("interpreter {}", run.status));
    Output::Error {
        ename: "CellError".to_string(),
        evalue,
        traceback: run.stderr.lines().map(str::to_string).collect(),
    }
}

/// Execute every code cell of the notebook at `path` and write it back.
///
/// Returns the number of cells run. Stops at the first failing cell unless
/// `allow_errors`; the notebook is written back either way.
pub fn execute_notebook(path: &Path, cwd: &Path, allow_errors: bool) -> anyhow::Result<u32> {
    let mut notebook = Notebook::read_from_file(path)?;
    let language = notebook.language();
    let interpreter = interpreter_for(&language)
        .ok_or_else(|| anyhow!("No interpreter for language '{}'", language))?;

    let mut count = 0u32;
    let mut failure = None;
    for cell in notebook.cells.iter_mut() {
        let Cell::Code(code) = cell else { continue };
        let options = parse_cell_options(&code.source, &language)?;
        if options.bool("eval") == Some(false) {
            continue;
        }

        count += 1;
        tracing::debug!("Running cell {}", count);
        let run = run_cell(interpreter, &options.source, cwd)?;

        code.execution_count = Some(count);
        code.outputs.clear();
        if !run.stdout.is_empty() {
            code.outputs.push(Output::stream("stdout", run.stdout.clone()));
        }
        if !run.stderr.is_empty() {
            code.outputs.push(Output::stream("stderr", run.stderr.clone()));
        }
        if !run.success {
            let error = error_output(&run);
            if let Output::Error { evalue, .. } = &error {
                tracing::debug!("Cell {} failed: {}", count, evalue);
                if !allow_errors {
                    failure = Some(format!("Cell {} failed: {}", count, evalue));
                }
            }
            code.outputs.push(error);
            if failure.is_some() {
                break;
            }
        }
    }

    notebook.write_to_file(path)?;
    if let Some(message) = failure {
        bail!(message);
    }
    Ok(count)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vesta_jupyter::{CodeCell, KernelSpec};

    fn sh_notebook(dir: &TempDir, sources: &[&str]) -> std::path::PathBuf {
        let mut notebook = Notebook::new(KernelSpec {
            display_name: "sh".to_string(),
            language: "sh".to_string(),
            name: "sh".to_string(),
        });
        for source in sources {
            notebook.cells.push(Cell::Code(CodeCell {
                source: source.to_string(),
                ..Default::default()
            }));
        }
        let path = dir.path().join("doc.ipynb");
        notebook.write_to_file(&path).unwrap();
        path
    }

    fn outputs(path: &Path) -> Vec<Vec<Output>> {
        Notebook::read_from_file(path)
            .unwrap()
            .cells
            .into_iter()
            .filter_map(|c| match c {
                Cell::Code(code) => Some(code.outputs),
                _ => None,
            })
            .collect()
    }

    const CELLS: &[&str] = &[
        "echo hello",
        "#| eval: false\nexit 1",
        "echo oops >&2; exit 3",
        "echo after",
    ];

    #[test]
    fn test_interpreters() {
        assert_eq!(interpreter_for("python"), Some(("python3", "-c")));
        assert_eq!(interpreter_for("R"), Some(("Rscript", "-e")));
        assert_eq!(interpreter_for("julia"), Some(("julia", "-e")));
        assert_eq!(interpreter_for("ojs"), None);
    }

    #[test]
    fn test_stops_at_first_error() {
        let temp = TempDir::new().unwrap();
        let path = sh_notebook(&temp, CELLS);

        let err = execute_notebook(&path, temp.path(), false).unwrap_err();
        assert!(err.to_string().contains("Cell 2 failed: oops"));

        let outputs = outputs(&path);
        match &outputs[0][0] {
            Output::Stream { name, text } => {
                assert_eq!(name, "stdout");
                assert_eq!(text, "hello\n");
            }
            other => panic!("Expected stream, got {:?}", other),
        }
        assert!(outputs[1].is_empty());
        assert!(matches!(outputs[2].last(), Some(Output::Error { .. })));
        assert!(outputs[3].is_empty());
    }

    #[test]
    fn test_allow_errors_keeps_going() {
        let temp = TempDir::new().unwrap();
        let path = sh_notebook(&temp, CELLS);

        let cells = execute_notebook(&path, temp.path(), true).unwrap();
        assert_eq!(cells, 3);
        let outputs = outputs(&path);
        assert!(matches!(&outputs[3][0], Output::Stream { text, .. } if text == "after\n"));
    }

    #[test]
    fn test_runs_in_cwd() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "found").unwrap();
        let path = sh_notebook(&temp, &["cat marker.txt"]);

        execute_notebook(&path, temp.path(), false).unwrap();
        assert!(matches!(&outputs(&path)[0][0], Output::Stream { text, .. } if text == "found"));
    }

    #[test]
    fn test_unknown_language() {
        let temp = TempDir::new().unwrap();
        let mut notebook = Notebook::new(vesta_jupyter::notebook::kernelspec_for_language("ojs"));
        notebook.cells.push(Cell::Code(CodeCell::default()));
        let path = temp.path().join("doc.ipynb");
        notebook.write_to_file(&path).unwrap();

        let err = execute_notebook(&path, temp.path(), false).unwrap_err();
        assert!(err.to_string().contains("No interpreter"));
    }
}
