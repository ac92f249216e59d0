//! Convert command implementation for Vesta CLI.
//!
//! Converts between `.qmd` documents and `.ipynb` notebooks.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::bail;
use vesta_jupyter::{convert_ipynb_to_qmd, convert_qmd_to_ipynb, default_converted_path};

use crate::colors;

/// Execute the convert command.
pub fn execute(input: &str, output: Option<&str>) -> anyhow::Result<()> {
    let path = Path::new(input);
    if !path.exists() {
        bail!("Input not found: {}", input);
    }

    let output = output
        .map(PathBuf::from)
        .unwrap_or_else(|| default_converted_path(path));
    let start = Instant::now();

    print!(
        "  {} → {} ... ",
        path.file_name().unwrap_or_default().to_string_lossy(),
        output.file_name().unwrap_or_default().to_string_lossy()
    );
    colors::flush_stdout();

    match path.extension().and_then(|e| e.to_str()) {
        Some("qmd") => convert_qmd_to_ipynb(path, &output)?,
        Some("ipynb") => convert_ipynb_to_qmd(path, &output)?,
        _ => bail!("Cannot convert {}: expected a .qmd or .ipynb file", input),
    }

    println!(
        "{}✓{} ({:.2}ms)",
        colors::GREEN,
        colors::RESET,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}
