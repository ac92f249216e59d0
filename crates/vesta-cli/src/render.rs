//! Render command implementation for Vesta CLI.
//!
//! Executes each input through its engine, then hands the markdown to
//! pandoc (unless the target is markdown itself).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use clap::Args;
use vesta_core::language::{document_translations, resolve_language_metadata};
use vesta_core::{
    DaemonSetting, EngineRegistry, ExecuteOptions, ExecuteResult, ExecutionEngine, FigureFormat,
    FormatSpec, FreezeSetting, FreezeStore, IncludePoint, Metadata, PostProcessOptions,
    remove_if_exists,
};
use vesta_jupyter::JupyterEngine;

use crate::colors;
use crate::config;

/// Options of `vesta render`.
#[derive(Args, Debug, Default)]
pub struct RenderArgs {
    /// Documents to render (.qmd, .ipynb, .md)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output format (html, pdf, docx, md, ...)
    #[arg(long)]
    pub to: Option<String>,

    /// Output file (single input only)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not execute code
    #[arg(long)]
    pub no_execute: bool,

    /// Working directory for code execution
    #[arg(long)]
    pub execute_dir: Option<PathBuf>,

    /// Keep the kernel alive, optionally for SECS idle seconds
    #[arg(long, value_name = "SECS", num_args = 0..=1, conflicts_with = "no_execute_daemon")]
    pub execute_daemon: Option<Option<u64>>,

    /// Always use a fresh kernel
    #[arg(long)]
    pub no_execute_daemon: bool,

    /// Restart the kept-alive kernel before executing
    #[arg(long)]
    pub execute_daemon_restart: bool,

    /// Show kernel diagnostics
    #[arg(long)]
    pub execute_debug: bool,

    /// Keep the generated notebook
    #[arg(long)]
    pub keep_ipynb: bool,

    /// Keep the intermediate markdown
    #[arg(long)]
    pub keep_md: bool,

    /// Keep hidden code and output
    #[arg(long)]
    pub keep_hidden: bool,

    /// Figure format (png, jpeg, svg, pdf)
    #[arg(long)]
    pub fig_format: Option<String>,

    /// Figure resolution
    #[arg(long)]
    pub fig_dpi: Option<u32>,

    /// Reuse stored execution results
    #[arg(long, conflicts_with = "no_freeze")]
    pub freeze: bool,

    /// Never reuse stored execution results
    #[arg(long)]
    pub no_freeze: bool,

    /// Extra arguments for pandoc
    #[arg(last = true)]
    pub pandoc_args: Vec<String>,
}

impl RenderArgs {
    /// Format settings given on the command line (the top layer).
    pub fn format_overrides(&self) -> anyhow::Result<FormatSpec> {
        let mut spec = FormatSpec::default();
        let execute = &mut spec.execute;

        if self.no_execute {
            execute.enabled = Some(false);
        }
        execute.dir.clone_from(&self.execute_dir);
        execute.daemon = match self.execute_daemon {
            Some(Some(secs)) => Some(DaemonSetting::Seconds(secs)),
            Some(None) => Some(DaemonSetting::Enabled(true)),
            None if self.no_execute_daemon => Some(DaemonSetting::Enabled(false)),
            None => None,
        };
        if self.execute_daemon_restart {
            execute.daemon_restart = Some(true);
        }
        if self.execute_debug {
            execute.debug = Some(true);
        }
        if self.keep_ipynb {
            execute.keep_ipynb = Some(true);
        }
        if let Some(format) = &self.fig_format {
            execute.fig_format = Some(FigureFormat::parse(format)?);
        }
        execute.fig_dpi = self.fig_dpi;
        if self.freeze {
            execute.freeze = Some(FreezeSetting::Always);
        } else if self.no_freeze {
            execute.freeze = Some(FreezeSetting::Never);
        }

        if self.keep_md {
            spec.render.keep_md = Some(true);
        }
        if self.keep_hidden {
            spec.render.keep_hidden = Some(true);
        }
        spec.pandoc.to.clone_from(&self.to);
        spec.pandoc.output_file.clone_from(&self.output);
        Ok(spec)
    }
}

/// Engines known to the CLI.
fn registry(jupyter: Arc<JupyterEngine>) -> EngineRegistry {
    let jupyter: Arc<dyn ExecutionEngine> = jupyter;
    let markdown: Arc<dyn ExecutionEngine> = Arc::new(vesta_core::MarkdownEngine);
    EngineRegistry::new(vec![jupyter, markdown]).with_fallback("markdown")
}

/// Execute the render command.
pub async fn execute(args: &RenderArgs) -> anyhow::Result<()> {
    if args.output.is_some() && args.inputs.len() > 1 {
        bail!("--output can only be used with a single input");
    }

    let overrides = args.format_overrides()?;
    let user = config::load_user_config()?;

    let jupyter = Arc::new(JupyterEngine::with_process_kernel());
    let registry = registry(jupyter.clone());

    let mut result = Ok(());
    for input in &args.inputs {
        if let Err(e) = render_file(&registry, input, &user, &overrides, &args.pandoc_args).await {
            result = Err(e);
            break;
        }
    }

    jupyter.dispatcher().shutdown().await;
    result
}

/// Path of the final output.
///
/// Never the source itself: a markdown document rendered to markdown gets
/// an `.out` infix.
pub fn output_path(input: &Path, format: &FormatSpec) -> PathBuf {
    if let Some(output) = &format.pandoc.output_file {
        return output.clone();
    }
    let default = input.with_extension(format.output_extension());
    if default == input {
        input.with_extension(format!("out.{}", format.output_extension()))
    } else {
        default
    }
}

/// Path of the intermediate markdown.
pub fn intermediate_path(input: &Path) -> PathBuf {
    input.with_extension("vesta.md")
}

async fn render_file(
    registry: &EngineRegistry,
    input: &Path,
    user: &FormatSpec,
    overrides: &FormatSpec,
    pandoc_args: &[String],
) -> anyhow::Result<PathBuf> {
    let start = Instant::now();
    if !input.exists() {
        bail!("Input not found: {}", input.display());
    }

    let engine = registry.select(input).await?;
    println!(
        "\n{}Vesta Render{} - {} {}[{}]{}",
        colors::BOLD,
        colors::RESET,
        input.display(),
        colors::DIM,
        engine.name(),
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    let mut metadata = engine.metadata(input).await?;
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    for file in resolve_language_metadata(&mut metadata, dir)? {
        tracing::debug!("Read translations from {}", file.display());
    }
    let translations = document_translations(&metadata);

    let mut format = user.clone();
    format.merge(&FormatSpec::from_metadata(&metadata)?);
    format.merge(overrides);

    let target = engine
        .target(input)
        .await?
        .ok_or_else(|| anyhow!("{} cannot be rendered by the {} engine", input.display(), engine.name()))?;

    let result = execute_or_thaw(engine.as_ref(), input, &target, &format).await?;

    let markdown_path = intermediate_path(input);
    tokio::fs::write(&markdown_path, &result.markdown).await?;

    let output = output_path(input, &format);
    if format.is_markdown_output() {
        tokio::fs::copy(&markdown_path, &output).await?;
    } else {
        run_pandoc(&markdown_path, &output, &result, &format, &translations, pandoc_args).await?;
    }

    if result.post_process {
        engine
            .postprocess(PostProcessOptions {
                target,
                format: format.clone(),
                output: output.clone(),
                preserve: result.preserve.clone(),
            })
            .await?;
    }

    if !format.keep_md() {
        remove_if_exists(&markdown_path).await?;
    }

    println!(
        "{}Output created:{} {} {}({:.2}s){}",
        colors::GREEN,
        colors::RESET,
        output.display(),
        colors::DIM,
        start.elapsed().as_secs_f64(),
        colors::RESET
    );
    Ok(output)
}

/// Open the freeze store for `input` and look up a reusable result.
async fn thaw(
    engine: &dyn ExecutionEngine,
    input: &Path,
    freeze: FreezeSetting,
) -> vesta_core::Result<(Option<FreezeStore>, Option<ExecuteResult>)> {
    if !engine.can_freeze() || freeze == FreezeSetting::Never {
        return Ok((None, None));
    }
    let store = FreezeStore::for_document(input)?;
    let frozen = store.load(input, freeze).await?;
    Ok((Some(store), frozen))
}

/// Execute, or reuse a frozen result when allowed.
async fn execute_or_thaw(
    engine: &dyn ExecutionEngine,
    input: &Path,
    target: &vesta_core::ExecutionTarget,
    format: &FormatSpec,
) -> anyhow::Result<ExecuteResult> {
    let freeze = format.execute.freeze();
    let store = match thaw(engine, input, freeze).await {
        Ok((_, Some(result))) => {
            engine.execute_target_skipped(target, format).await;
            println!("  {}Using frozen results{}", colors::YELLOW, colors::RESET);
            return Ok(result);
        }
        Ok((store, None)) => store,
        Err(e) => {
            // The engine never runs, so the transient input is ours to remove.
            engine.execute_target_skipped(target, format).await;
            return Err(e.into());
        }
    };

    print!("  {}Executing{} ... ", colors::CYAN, colors::RESET);
    colors::flush_stdout();
    let result = engine
        .execute(ExecuteOptions {
            target: target.clone(),
            format: format.clone(),
            wants_dependency_records: false,
        })
        .await;
    match &result {
        Ok(_) => println!("{}✓{}", colors::GREEN, colors::RESET),
        Err(_) => println!("failed"),
    }
    let result = result?;

    if let Some(store) = &store {
        if format.execute.enabled() {
            store.store(input, &result).await?;
        }
    }
    Ok(result)
}

/// Path of the translations handed to pandoc.
pub fn translations_path(markdown: &Path) -> PathBuf {
    markdown.with_extension("lang.json")
}

async fn run_pandoc(
    markdown: &Path,
    output: &Path,
    result: &ExecuteResult,
    format: &FormatSpec,
    translations: &Metadata,
    pandoc_args: &[String],
) -> anyhow::Result<()> {
    let pandoc = which::which("pandoc")
        .map_err(|_| anyhow!("pandoc not found on PATH (install it, or render with --to md)"))?;

    let dir = markdown.parent().unwrap_or_else(|| Path::new("."));
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let includes = match result.includes() {
        Some(includes) => includes.write_files(dir, &stem)?,
        None => Vec::new(),
    };

    // JSON is valid YAML, which is what pandoc reads metadata files as.
    let metadata_file = if translations.is_empty() {
        None
    } else {
        let path = translations_path(markdown);
        tokio::fs::write(&path, serde_json::to_vec_pretty(translations)?).await?;
        Some(path)
    };

    let mut command = pandoc_command(
        &pandoc,
        markdown,
        output,
        format,
        &includes,
        metadata_file.as_deref(),
        pandoc_args,
    );

    tracing::debug!("Running {:?}", command);
    let status = command
        .status()
        .await
        .with_context(|| format!("Failed to run {}", pandoc.display()))?;

    for (_, path) in &includes {
        remove_if_exists(path).await?;
    }
    if let Some(path) = &metadata_file {
        remove_if_exists(path).await?;
    }
    if !status.success() {
        bail!("pandoc failed with {}", status);
    }
    Ok(())
}

fn pandoc_command(
    pandoc: &Path,
    markdown: &Path,
    output: &Path,
    format: &FormatSpec,
    includes: &[(IncludePoint, PathBuf)],
    metadata_file: Option<&Path>,
    pandoc_args: &[String],
) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(pandoc);
    command.arg(markdown).args(["--from", "markdown"]);
    // pdf goes through LaTeX; pandoc picks the engine from the extension.
    if format.to() != "pdf" {
        command.args(["--to", format.to()]);
    }
    command.arg("--output").arg(output);
    for (point, path) in includes {
        command.arg(point.pandoc_flag()).arg(path);
    }
    if let Some(path) = metadata_file {
        command.arg("--metadata-file").arg(path);
    }
    command.args(pandoc_args);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = RenderArgs {
            inputs: vec![PathBuf::from("doc.qmd")],
            to: Some("md".to_string()),
            no_execute: true,
            execute_daemon: Some(Some(30)),
            keep_md: true,
            fig_format: Some("SVG".to_string()),
            freeze: true,
            ..Default::default()
        };
        let spec = args.format_overrides().unwrap();
        assert_eq!(spec.execute.enabled, Some(false));
        assert_eq!(spec.execute.daemon, Some(DaemonSetting::Seconds(30)));
        assert_eq!(spec.execute.fig_format, Some(FigureFormat::Svg));
        assert_eq!(spec.execute.freeze, Some(FreezeSetting::Always));
        assert!(spec.keep_md());
        assert_eq!(spec.to(), "md");
    }

    #[test]
    fn test_unset_flags_do_not_override() {
        let args = RenderArgs::default();
        let spec = args.format_overrides().unwrap();

        let mut layered = FormatSpec::default();
        layered.execute.echo = Some(false);
        layered.execute.daemon = Some(DaemonSetting::Seconds(10));
        let before = layered.clone();
        layered.merge(&spec);
        assert_eq!(layered, before);
    }

    #[test]
    fn test_daemon_flags() {
        let on = RenderArgs {
            execute_daemon: Some(None),
            ..Default::default()
        };
        assert_eq!(
            on.format_overrides().unwrap().execute.daemon,
            Some(DaemonSetting::Enabled(true))
        );

        let off = RenderArgs {
            no_execute_daemon: true,
            ..Default::default()
        };
        assert_eq!(
            off.format_overrides().unwrap().execute.daemon,
            Some(DaemonSetting::Enabled(false))
        );
    }

    #[test]
    fn test_bad_fig_format() {
        let args = RenderArgs {
            fig_format: Some("bmp".to_string()),
            ..Default::default()
        };
        assert!(args.format_overrides().is_err());
    }

    #[test]
    fn test_output_paths() {
        let mut format = FormatSpec::default();
        assert_eq!(output_path(Path::new("/d/report.qmd"), &format), PathBuf::from("/d/report.html"));

        format.pandoc.to = Some("md".to_string());
        assert_eq!(output_path(Path::new("/d/report.qmd"), &format), PathBuf::from("/d/report.md"));
        assert_eq!(output_path(Path::new("/d/notes.md"), &format), PathBuf::from("/d/notes.out.md"));

        format.pandoc.output_file = Some(PathBuf::from("/elsewhere/x.md"));
        assert_eq!(output_path(Path::new("/d/notes.md"), &format), PathBuf::from("/elsewhere/x.md"));

        assert_eq!(intermediate_path(Path::new("/d/report.qmd")), PathBuf::from("/d/report.vesta.md"));
    }

    #[test]
    fn test_pandoc_command_passes_translations() {
        let markdown = Path::new("/d/report.vesta.md");
        let translations = translations_path(markdown);
        assert_eq!(translations, PathBuf::from("/d/report.vesta.lang.json"));

        let command = pandoc_command(
            Path::new("pandoc"),
            markdown,
            Path::new("/d/report.html"),
            &FormatSpec::default(),
            &[(IncludePoint::InHeader, PathBuf::from("/d/report-in-header.html"))],
            Some(&translations),
            &["--toc".to_string()],
        );
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "/d/report.vesta.md",
                "--from",
                "markdown",
                "--to",
                "html",
                "--output",
                "/d/report.html",
                IncludePoint::InHeader.pandoc_flag(),
                "/d/report-in-header.html",
                "--metadata-file",
                "/d/report.vesta.lang.json",
                "--toc",
            ]
        );
    }

    #[tokio::test]
    async fn test_unusable_freeze_store_removes_transient() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("doc.qmd");
        std::fs::write(&input, "# Doc\n\n```{python}\n1 + 1\n```\n").unwrap();
        // A file where the store's directory should go.
        std::fs::write(dir.path().join(".vesta"), "").unwrap();

        let engine = JupyterEngine::with_process_kernel();
        let target = engine.target(&input).await.unwrap().unwrap();
        assert!(target.input.exists());

        let mut format = FormatSpec::default();
        format.execute.freeze = Some(FreezeSetting::Auto);
        let result = execute_or_thaw(&engine, &input, &target, &format).await;

        assert!(result.is_err());
        assert!(!target.input.exists());
        assert!(input.exists());
    }
}
