//! The Jupyter execution engine.
//!
//! `.ipynb` notebooks execute in place. `.qmd` documents are first turned
//! into a transient notebook next to the source; the framework owns that
//! file and removes it after the render unless `keep-ipynb` is set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use vesta_core::engine::extension_of;
use vesta_core::{
    DependenciesOptions, EngineDependencies, ExecuteOptions, ExecuteResult, ExecutionEngine,
    ExecutionTarget, FormatSpec, IncludeSet, KernelDispatcher, Metadata, Result, cleanup_target,
    read_yaml_from_markdown,
};

use crate::error::NotebookError;
use crate::kernel::ProcessKernelLauncher;
use crate::markdown::{MarkdownOptions, NotebookAssets, notebook_to_markdown};
use crate::notebook::Notebook;
use crate::parser::{markdown_from_notebook, qmd_to_notebook};
use crate::widgets::{WidgetDependencies, includes_for_widget_dependencies};

const EXTENSIONS: &[&str] = &[".ipynb", ".qmd"];
const LANGUAGES: &[&str] = &["python", "julia", "bash", "sh", "r"];

/// Executes documents through notebook kernels.
pub struct JupyterEngine {
    dispatcher: Arc<KernelDispatcher>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn read_notebook(path: &Path) -> Result<Notebook> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(Notebook::from_json(&text)?)
}

/// Whether `path` holds the transient notebook generated from `source_name`.
async fn is_transient_for(path: &Path, source_name: &str) -> bool {
    match read_notebook(path).await {
        Ok(notebook) => notebook.source_file() == Some(source_name),
        Err(_) => false,
    }
}

/// Path of the transient notebook for `source`.
///
/// `<stem>.ipynb`, unless a foreign file sits there; then the first of
/// `<stem>-1.ipynb`, `<stem>-2.ipynb`, ... that is free or already ours.
pub async fn transient_notebook_path(source: &Path) -> Result<PathBuf> {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let stem = file_stem(source);
    let name = file_name(source);

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(format!("{}.ipynb", stem))
        } else {
            dir.join(format!("{}-{}.ipynb", stem, n))
        };
        if !tokio::fs::try_exists(&candidate).await? || is_transient_for(&candidate, &name).await {
            return Ok(candidate);
        }
        tracing::debug!("{} is not ours, trying the next name", candidate.display());
        n += 1;
    }
}

/// Write the notebook for `source` to `input`, replacing whatever is there.
async fn write_transient_notebook(source: &Path, input: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(source).await?;
    let notebook = qmd_to_notebook(&text, Some(&file_name(source)))?;
    let json = serde_json::to_string_pretty(&notebook)?;
    tokio::fs::write(input, json).await?;
    tracing::debug!("Wrote transient notebook {}", input.display());
    Ok(())
}

impl JupyterEngine {
    pub fn new(dispatcher: Arc<KernelDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Engine running `vesta-kernel` processes.
    pub fn with_process_kernel() -> Self {
        let launcher = Arc::new(ProcessKernelLauncher::new());
        Self::new(Arc::new(KernelDispatcher::new(launcher)))
    }

    pub fn dispatcher(&self) -> &Arc<KernelDispatcher> {
        &self.dispatcher
    }

    async fn execute_target(&self, options: &ExecuteOptions) -> Result<ExecuteResult> {
        let target = &options.target;
        let format = &options.format;

        if target.transient && !tokio::fs::try_exists(&target.input).await? {
            write_transient_notebook(&target.source, &target.input).await?;
        }

        if format.execute.enabled() {
            let mode = self
                .dispatcher
                .execute(&target.input, &format.execute, None)
                .await?;
            tracing::info!("Executed {} ({:?})", target.input.display(), mode);
        }

        let notebook = read_notebook(&target.input).await?;
        let assets = NotebookAssets::for_document(&target.source, format.to());
        let supporting_path = assets.supporting_path();
        let markdown_options = MarkdownOptions::new(notebook.language(), assets, format);

        // Figures are written synchronously.
        let conversion = tokio::task::spawn_blocking(move || {
            notebook_to_markdown(notebook, &markdown_options)
        })
        .await
        .map_err(|e| vesta_core::Error::Notebook(format!("conversion task failed: {}", e)))??;

        let dependencies = if options.wants_dependency_records {
            let records = conversion
                .dependencies
                .iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?;
            EngineDependencies::Records(records)
        } else {
            let deps: Vec<WidgetDependencies> = conversion.dependencies.into_iter().collect();
            EngineDependencies::Includes(includes_for_widget_dependencies(&deps))
        };

        let supporting = if tokio::fs::try_exists(&supporting_path).await? {
            vec![supporting_path]
        } else {
            Vec::new()
        };

        Ok(ExecuteResult::new(
            conversion.markdown,
            supporting,
            dependencies,
            conversion.preserve,
        ))
    }
}

#[async_trait]
impl ExecutionEngine for JupyterEngine {
    fn name(&self) -> &str {
        "jupyter"
    }

    fn default_ext(&self) -> &str {
        ".qmd"
    }

    fn valid_extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn claims_extension(&self, ext: &str) -> bool {
        ext == ".ipynb"
    }

    fn claims_language(&self, language: &str) -> bool {
        LANGUAGES.contains(&language.to_lowercase().as_str())
    }

    async fn target(&self, file: &Path) -> Result<Option<ExecutionTarget>> {
        match extension_of(file).as_deref() {
            Some(".ipynb") => Ok(Some(ExecutionTarget::in_place(file))),
            Some(".qmd") => {
                let input = transient_notebook_path(file).await?;
                // Always regenerated: an existing notebook may be stale.
                write_transient_notebook(file, &input).await?;
                Ok(Some(ExecutionTarget {
                    source: file.to_path_buf(),
                    input,
                    transient: true,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn metadata(&self, file: &Path) -> Result<Metadata> {
        if extension_of(file).as_deref() == Some(".ipynb") {
            let notebook = read_notebook(file).await?;
            return read_yaml_from_markdown(&markdown_from_notebook(&notebook));
        }
        let text = tokio::fs::read_to_string(file).await?;
        read_yaml_from_markdown(&text)
    }

    async fn execute(&self, options: ExecuteOptions) -> Result<ExecuteResult> {
        let result = self.execute_target(&options).await;
        cleanup_target(&options.target, options.format.execute.keep_ipynb()).await;
        result
    }

    async fn execute_target_skipped(&self, target: &ExecutionTarget, format: &FormatSpec) {
        cleanup_target(target, format.execute.keep_ipynb()).await;
    }

    async fn dependencies(&self, options: DependenciesOptions) -> Result<IncludeSet> {
        let records = options
            .dependencies
            .into_iter()
            .map(serde_json::from_value::<WidgetDependencies>)
            .collect::<serde_json::Result<Vec<_>>>()
            .map_err(NotebookError::from)?;
        Ok(includes_for_widget_dependencies(&records))
    }

    fn can_freeze(&self) -> bool {
        true
    }

    fn keep_files(&self, file: &Path) -> Option<Vec<PathBuf>> {
        let is_notebook = extension_of(file).as_deref() == Some(".ipynb");
        if is_notebook || file_name(file).ends_with(".jupyter.md") {
            return None;
        }
        let dir = file.parent().unwrap_or_else(|| Path::new(""));
        Some(vec![dir.join(format!("{}.ipynb", file_stem(file)))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::{Cell, Output, WIDGET_STATE_MIME};
    use crate::widgets::{HTML_MANAGER, JQUERY, JQUERY_DEFINE, REQUIRE_JS};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use vesta_core::{EnvironmentSignals, Kernel, KernelLauncher, KernelRequest};

    #[derive(Default)]
    struct Counts {
        launched: usize,
        shutdown: usize,
    }

    /// Appends a stream output to every code cell; `fail` in a cell errors.
    struct EchoKernel(Arc<Mutex<Counts>>);

    #[async_trait]
    impl Kernel for EchoKernel {
        async fn execute(&mut self, request: &KernelRequest) -> Result<()> {
            let mut notebook = Notebook::read_from_file(&request.input)?;
            let mut has_widget = false;
            for (i, cell) in notebook.cells.iter_mut().enumerate() {
                let Cell::Code(code) = cell else { continue };
                if code.source.contains("fail") {
                    return Err(vesta_core::Error::Execution("cell failed".to_string()));
                }
                code.execution_count = Some(i as u32);
                code.outputs.push(Output::stream("stdout", format!("ran: {}\n", code.source)));
                if code.source.contains("widget") {
                    has_widget = true;
                    code.outputs.push(Output::DisplayData {
                        data: serde_json::from_value(serde_json::json!({
                            "application/vnd.jupyter.widget-view+json": {"model_id": "w1"}
                        }))
                        .unwrap(),
                        metadata: Default::default(),
                    });
                }
            }
            if has_widget {
                let mut widgets = serde_json::Map::new();
                widgets.insert(WIDGET_STATE_MIME.to_string(), widget_state());
                notebook.metadata.widgets = Some(serde_json::Value::Object(widgets));
            }
            notebook.write_to_file(&request.input)?;
            Ok(())
        }

        async fn shutdown(self: Box<Self>) -> Result<()> {
            self.0.lock().unwrap().shutdown += 1;
            Ok(())
        }
    }

    struct EchoLauncher(Arc<Mutex<Counts>>);

    #[async_trait]
    impl KernelLauncher for EchoLauncher {
        async fn launch(&self, _request: &KernelRequest) -> Result<Box<dyn Kernel>> {
            self.0.lock().unwrap().launched += 1;
            Ok(Box::new(EchoKernel(self.0.clone())))
        }
    }

    fn engine() -> (JupyterEngine, Arc<Mutex<Counts>>) {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let dispatcher = KernelDispatcher::new(Arc::new(EchoLauncher(counts.clone())))
            .with_signals(EnvironmentSignals {
                interactive: false,
                windows: false,
                ci: true,
            });
        (JupyterEngine::new(Arc::new(dispatcher)), counts)
    }

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn options(target: ExecutionTarget, format: FormatSpec, wants_records: bool) -> ExecuteOptions {
        ExecuteOptions {
            target,
            format,
            wants_dependency_records: wants_records,
        }
    }

    fn widget_state() -> serde_json::Value {
        serde_json::json!({
            "version_major": 2,
            "version_minor": 0,
            "state": {"w1": {"model_name": "IntSliderModel", "state": {"value": 3}}}
        })
    }

    const REPORT: &str = "---\ntitle: Report\n---\n\n# Results\n\n```{python}\nprint(1)\n```\n";

    #[tokio::test]
    async fn test_qmd_renders_through_transient_notebook() {
        let (engine, counts) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "report.qmd", REPORT);

        let target = engine.target(&source).await.unwrap().unwrap();
        assert!(target.transient);
        assert_eq!(target.input, temp.path().join("report.ipynb"));
        assert!(target.input.exists());

        let result = engine
            .execute(options(target.clone(), FormatSpec::default(), false))
            .await
            .unwrap();

        assert!(result.markdown.starts_with("---\ntitle: Report\n---"));
        assert!(result.markdown.contains("```{.python .cell-code}\nprint(1)\n```"));
        assert!(result.markdown.contains("ran: print(1)"));
        assert!(result.includes().unwrap().is_empty());
        assert!(!result.post_process);
        assert!(result.supporting.is_empty());

        assert!(!target.input.exists());
        let counts = counts.lock().unwrap();
        assert_eq!((counts.launched, counts.shutdown), (1, 1));
    }

    #[tokio::test]
    async fn test_ipynb_executes_in_place() {
        let (engine, _) = engine();
        let temp = TempDir::new().unwrap();
        let notebook = qmd_to_notebook(REPORT, None).unwrap();
        let path = temp.path().join("analysis.ipynb");
        notebook.write_to_file(&path).unwrap();

        let target = engine.target(&path).await.unwrap().unwrap();
        assert_eq!(target, ExecutionTarget::in_place(&path));

        engine
            .execute(options(target, FormatSpec::default(), false))
            .await
            .unwrap();
        // Never deleted, and outputs were written back.
        let executed = Notebook::read_from_file(&path).unwrap();
        assert!(executed.cells.iter().any(|c| matches!(c, Cell::Code(code) if !code.outputs.is_empty())));

        let metadata = engine.metadata(&path).await.unwrap();
        assert_eq!(metadata["title"], "Report");
    }

    #[tokio::test]
    async fn test_unsupported_extension_has_no_target() {
        let (engine, _) = engine();
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "notes.txt", "hello");
        assert_eq!(engine.target(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_skipped_execution_cleans_up() {
        let (engine, counts) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "report.qmd", REPORT);

        let target = engine.target(&source).await.unwrap().unwrap();
        engine
            .execute_target_skipped(&target, &FormatSpec::default())
            .await;

        assert!(!target.input.exists());
        assert_eq!(counts.lock().unwrap().launched, 0);
    }

    #[tokio::test]
    async fn test_foreign_notebook_is_not_overwritten() {
        let (engine, _) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "report.qmd", REPORT);
        let foreign = serde_json::to_string(&qmd_to_notebook("# mine\n", None).unwrap()).unwrap();
        let foreign_path = write(&temp, "report.ipynb", &foreign);

        let target = engine.target(&source).await.unwrap().unwrap();
        assert_eq!(target.input, temp.path().join("report-1.ipynb"));

        // Our own notebook is reused on the next resolution.
        let again = engine.target(&source).await.unwrap().unwrap();
        assert_eq!(again.input, target.input);

        engine
            .execute(options(target.clone(), FormatSpec::default(), false))
            .await
            .unwrap();
        assert!(!target.input.exists());
        assert_eq!(std::fs::read_to_string(&foreign_path).unwrap(), foreign);
    }

    #[tokio::test]
    async fn test_keep_ipynb_keeps_executed_notebook() {
        let (engine, _) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "report.qmd", REPORT);
        let mut format = FormatSpec::default();
        format.execute.keep_ipynb = Some(true);

        let target = engine.target(&source).await.unwrap().unwrap();
        engine
            .execute(options(target.clone(), format, false))
            .await
            .unwrap();

        let kept = Notebook::read_from_file(&target.input).unwrap();
        assert_eq!(kept.source_file(), Some("report.qmd"));
    }

    #[tokio::test]
    async fn test_failure_still_cleans_up() {
        let (engine, counts) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "broken.qmd", "```{python}\nfail()\n```\n");

        let target = engine.target(&source).await.unwrap().unwrap();
        let err = engine
            .execute(options(target.clone(), FormatSpec::default(), false))
            .await
            .unwrap_err();

        assert!(matches!(err, vesta_core::Error::Execution(_)));
        assert!(!target.input.exists());
        assert_eq!(counts.lock().unwrap().shutdown, 1);
    }

    #[tokio::test]
    async fn test_disabled_execution_converts_without_kernel() {
        let (engine, counts) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "report.qmd", REPORT);
        let mut format = FormatSpec::default();
        format.execute.enabled = Some(false);

        let target = engine.target(&source).await.unwrap().unwrap();
        let result = engine.execute(options(target.clone(), format, false)).await.unwrap();

        assert!(result.markdown.contains("print(1)"));
        assert!(!result.markdown.contains("ran:"));
        assert_eq!(counts.lock().unwrap().launched, 0);
        assert!(!target.input.exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_recreated() {
        let (engine, _) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "report.qmd", REPORT);

        let target = engine.target(&source).await.unwrap().unwrap();
        std::fs::remove_file(&target.input).unwrap();

        let result = engine
            .execute(options(target, FormatSpec::default(), false))
            .await
            .unwrap();
        assert!(result.markdown.contains("ran: print(1)"));
    }

    #[tokio::test]
    async fn test_dependency_shapes() {
        let (engine, _) = engine();
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "widgets.qmd", "```{python}\nwidget\n```\n");

        let expected_deps = WidgetDependencies {
            js_widgets: false,
            jupyter_widgets: true,
            html_libraries: Vec::new(),
            widgets_state: Some(widget_state()),
        };
        let expected_includes = IncludeSet {
            in_header: vec![[REQUIRE_JS, JQUERY, JQUERY_DEFINE, HTML_MANAGER].join("\n")],
            before_body: Vec::new(),
            after_body: vec![format!(
                "<script type=\"{}\">\n{}\n</script>",
                WIDGET_STATE_MIME,
                widget_state()
            )],
        };

        let target = engine.target(&source).await.unwrap().unwrap();
        let result = engine
            .execute(options(target.clone(), FormatSpec::default(), true))
            .await
            .unwrap();

        let records = result.dependency_records().unwrap().to_vec();
        assert_eq!(records, vec![serde_json::to_value(&expected_deps).unwrap()]);
        assert!(result.post_process);

        let includes = engine
            .dependencies(DependenciesOptions {
                target: target.clone(),
                format: FormatSpec::default(),
                dependencies: records,
            })
            .await
            .unwrap();
        assert_eq!(includes, expected_includes);

        // Without records, the same fragments come back ready to inject.
        let target = engine.target(&source).await.unwrap().unwrap();
        let result = engine
            .execute(options(target, FormatSpec::default(), false))
            .await
            .unwrap();
        assert_eq!(result.includes(), Some(&expected_includes));
    }

    #[test]
    fn test_keep_files() {
        let (engine, _) = engine();
        assert_eq!(
            engine.keep_files(Path::new("/docs/report.qmd")),
            Some(vec![PathBuf::from("/docs/report.ipynb")])
        );
        assert_eq!(engine.keep_files(Path::new("/docs/report.ipynb")), None);
        assert_eq!(engine.keep_files(Path::new("/docs/report.jupyter.md")), None);
        assert!(engine.can_freeze());
    }

    #[test]
    fn test_claims() {
        let (engine, _) = engine();
        assert!(engine.claims_extension(".ipynb"));
        assert!(!engine.claims_extension(".qmd"));
        assert!(engine.claims_language("python"));
        assert!(engine.claims_language("R"));
        assert!(!engine.claims_language("ojs"));
    }
}
