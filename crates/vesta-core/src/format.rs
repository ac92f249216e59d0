//! Format and execution settings.
//!
//! Settings come from several layers (user config, document front matter,
//! command line flags). Every field is optional so that layers can be
//! stacked with [`FormatSpec::merge`]; accessors apply the defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::frontmatter::Metadata;

/// Default idle keepalive for daemon kernels.
pub const DEFAULT_DAEMON_KEEPALIVE: Duration = Duration::from_secs(300);

/// Output format specification consumed by execution engines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSpec {
    /// Execution switches.
    pub execute: ExecuteSettings,
    /// Render-time switches.
    pub render: RenderSettings,
    /// Converter settings.
    pub pandoc: PandocSettings,
}

/// Execution-relevant switches.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExecuteSettings {
    /// Whether code is executed at all.
    #[serde(alias = "eval")]
    pub enabled: Option<bool>,
    /// Keep the kernel alive between renders.
    pub daemon: Option<DaemonSetting>,
    /// Restart the keepalive kernel before executing.
    pub daemon_restart: Option<bool>,
    /// Show kernel diagnostics.
    pub debug: Option<bool>,
    /// Keep the transient notebook after rendering.
    pub keep_ipynb: Option<bool>,
    /// Figure format for rendered plots.
    pub fig_format: Option<FigureFormat>,
    /// Figure resolution.
    pub fig_dpi: Option<u32>,
    /// Show source code.
    pub echo: Option<bool>,
    /// Show warnings (stderr streams).
    pub warning: Option<bool>,
    /// Allow cell errors instead of aborting the render.
    pub error: Option<bool>,
    /// Include cells at all.
    pub include: Option<bool>,
    /// Show outputs.
    pub output: Option<bool>,
    /// Reuse frozen results.
    pub freeze: Option<FreezeSetting>,
    /// Working directory for execution.
    pub dir: Option<PathBuf>,
}

/// Daemon configuration: a switch or an idle keepalive in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DaemonSetting {
    Enabled(bool),
    Seconds(u64),
}

/// When frozen execution results may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "FreezeRepr")]
pub enum FreezeSetting {
    /// Reuse whenever a frozen result exists.
    Always,
    /// Never reuse.
    Never,
    /// Reuse only if the source is unchanged.
    Auto,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FreezeRepr {
    Bool(bool),
    Text(String),
}

impl TryFrom<FreezeRepr> for FreezeSetting {
    type Error = String;

    fn try_from(repr: FreezeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            FreezeRepr::Bool(true) => Ok(FreezeSetting::Always),
            FreezeRepr::Bool(false) => Ok(FreezeSetting::Never),
            FreezeRepr::Text(text) if text == "auto" => Ok(FreezeSetting::Auto),
            FreezeRepr::Text(text) => Err(format!("invalid freeze value '{}'", text)),
        }
    }
}

/// Figure output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureFormat {
    Png,
    Jpeg,
    Svg,
    Pdf,
}

impl FigureFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            FigureFormat::Png => "png",
            FigureFormat::Jpeg => "jpg",
            FigureFormat::Svg => "svg",
            FigureFormat::Pdf => "pdf",
        }
    }

    /// Parse a command line value.
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "png" => Ok(FigureFormat::Png),
            "jpeg" | "jpg" => Ok(FigureFormat::Jpeg),
            "svg" => Ok(FigureFormat::Svg),
            "pdf" => Ok(FigureFormat::Pdf),
            other => Err(Error::Config(format!("unknown figure format '{}'", other))),
        }
    }
}

/// Render-time switches.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RenderSettings {
    /// Keep hidden code and output (marked `.hidden`) instead of removing it.
    pub keep_hidden: Option<bool>,
    /// Keep the intermediate markdown file.
    pub keep_md: Option<bool>,
}

/// Converter settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PandocSettings {
    /// Target format (`html`, `pdf`, `md`, ...).
    pub to: Option<String>,
    /// Output file.
    pub output_file: Option<PathBuf>,
}

/// Keys accepted at the top level of the front matter.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct DocumentOptions {
    execute: Option<ExecuteValue>,
    format: Option<FormatValue>,
    output_file: Option<PathBuf>,
    #[serde(flatten)]
    render: RenderSettings,
    keep_ipynb: Option<bool>,
    fig_format: Option<FigureFormat>,
    fig_dpi: Option<u32>,
}

/// `execute: false` is shorthand for `execute: { enabled: false }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExecuteValue {
    Switch(bool),
    Settings(ExecuteSettings),
}

/// `format: html` or `format: { html: { ... } }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FormatValue {
    Name(String),
    Map(serde_json::Map<String, Value>),
}

fn overlay<T: Clone>(base: &mut Option<T>, top: &Option<T>) {
    if top.is_some() {
        base.clone_from(top);
    }
}

impl FormatSpec {
    /// Build settings from document (or user config) metadata.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let options: DocumentOptions = serde_json::from_value(Value::Object(metadata.clone()))
            .map_err(|e| Error::Config(format!("invalid document options: {}", e)))?;

        let mut spec = FormatSpec::default();

        match options.execute {
            Some(ExecuteValue::Switch(enabled)) => spec.execute.enabled = Some(enabled),
            Some(ExecuteValue::Settings(settings)) => spec.execute = settings,
            None => {}
        }
        overlay(&mut spec.execute.keep_ipynb, &options.keep_ipynb);
        overlay(&mut spec.execute.fig_format, &options.fig_format);
        overlay(&mut spec.execute.fig_dpi, &options.fig_dpi);
        spec.render = options.render;
        spec.pandoc.output_file = options.output_file;

        match options.format {
            Some(FormatValue::Name(name)) => spec.pandoc.to = Some(name),
            Some(FormatValue::Map(formats)) => {
                // First listed format is the default target.
                if let Some((name, value)) = formats.into_iter().next() {
                    spec.pandoc.to = Some(name);
                    if let Value::Object(inner) = value {
                        spec.merge(&FormatSpec::from_metadata(&inner)?);
                    }
                }
            }
            None => {}
        }

        Ok(spec)
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &FormatSpec) {
        self.execute.merge(&other.execute);
        overlay(&mut self.render.keep_hidden, &other.render.keep_hidden);
        overlay(&mut self.render.keep_md, &other.render.keep_md);
        overlay(&mut self.pandoc.to, &other.pandoc.to);
        overlay(&mut self.pandoc.output_file, &other.pandoc.output_file);
    }

    /// Target format name (defaults to `html`).
    pub fn to(&self) -> &str {
        self.pandoc.to.as_deref().unwrap_or("html")
    }

    /// Whether the target accepts raw HTML.
    pub fn is_html_compatible(&self) -> bool {
        let to = self.to();
        to.starts_with("html")
            || matches!(
                to,
                "revealjs" | "slidy" | "s5" | "dzslides" | "slideous" | "epub" | "epub2" | "epub3"
            )
    }

    /// Whether the target is LaTeX based.
    pub fn is_latex_output(&self) -> bool {
        matches!(self.to(), "latex" | "pdf" | "beamer" | "context")
    }

    /// Whether the target is a markdown dialect.
    pub fn is_markdown_output(&self) -> bool {
        let to = self.to();
        to == "md" || to == "gfm" || to.starts_with("markdown") || to.starts_with("commonmark")
    }

    /// File extension of the final output.
    pub fn output_extension(&self) -> &str {
        if self.is_markdown_output() {
            return "md";
        }
        match self.to() {
            "latex" | "beamer" => "tex",
            "revealjs" | "slidy" | "s5" | "dzslides" | "slideous" => "html",
            "epub2" | "epub3" => "epub",
            to if to.starts_with("html") => "html",
            to => to,
        }
    }

    /// Whether hidden content is kept with a `.hidden` class.
    pub fn keep_hidden(&self) -> bool {
        self.render.keep_hidden.unwrap_or(false)
    }

    /// Whether the intermediate markdown file is kept.
    pub fn keep_md(&self) -> bool {
        self.render.keep_md.unwrap_or(false)
    }
}

impl ExecuteSettings {
    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &ExecuteSettings) {
        overlay(&mut self.enabled, &other.enabled);
        overlay(&mut self.daemon, &other.daemon);
        overlay(&mut self.daemon_restart, &other.daemon_restart);
        overlay(&mut self.debug, &other.debug);
        overlay(&mut self.keep_ipynb, &other.keep_ipynb);
        overlay(&mut self.fig_format, &other.fig_format);
        overlay(&mut self.fig_dpi, &other.fig_dpi);
        overlay(&mut self.echo, &other.echo);
        overlay(&mut self.warning, &other.warning);
        overlay(&mut self.error, &other.error);
        overlay(&mut self.include, &other.include);
        overlay(&mut self.output, &other.output);
        overlay(&mut self.freeze, &other.freeze);
        overlay(&mut self.dir, &other.dir);
    }

    /// Whether code should be executed (default: yes).
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Whether the transient notebook is kept.
    pub fn keep_ipynb(&self) -> bool {
        self.keep_ipynb.unwrap_or(false)
    }

    /// Whether the keepalive kernel is restarted first.
    pub fn daemon_restart(&self) -> bool {
        self.daemon_restart.unwrap_or(false)
    }

    /// Whether kernel diagnostics are shown.
    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Whether cell errors are rendered instead of failing.
    pub fn allow_errors(&self) -> bool {
        self.error.unwrap_or(false)
    }

    /// Freeze behavior (default: never).
    pub fn freeze(&self) -> FreezeSetting {
        self.freeze.unwrap_or(FreezeSetting::Never)
    }

    /// Figure format (default: png).
    pub fn fig_format(&self) -> FigureFormat {
        self.fig_format.unwrap_or(FigureFormat::Png)
    }
}
