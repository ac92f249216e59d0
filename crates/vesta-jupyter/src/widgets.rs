//! Widget dependencies of executed notebooks.
//!
//! Interactive outputs need script libraries in the final HTML page. They are
//! collected from the notebook into a [`WidgetDependencies`] record, which
//! callers either keep as-is or turn into include fragments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vesta_core::IncludeSet;

use crate::notebook::{Cell, Notebook, Output, WIDGET_STATE_MIME, WIDGET_VIEW_MIME, mime_text};

pub(crate) const REQUIRE_JS: &str = r#"<script src="https://cdnjs.cloudflare.com/ajax/libs/require.js/2.3.6/require.min.js" crossorigin="anonymous"></script>"#;
pub(crate) const JQUERY: &str = r#"<script src="https://cdnjs.cloudflare.com/ajax/libs/jquery/3.5.1/jquery.min.js" crossorigin="anonymous"></script>"#;
pub(crate) const JQUERY_DEFINE: &str =
    r#"<script type="application/javascript">define('jquery', [],function() {return window.jQuery;})</script>"#;
pub(crate) const HTML_MANAGER: &str = r#"<script src="https://unpkg.com/@jupyter-widgets/html-manager@*/dist/embed-amd.js" crossorigin="anonymous"></script>"#;

/// Script dependencies required by a notebook's outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDependencies {
    /// Outputs load code through require.js.
    pub js_widgets: bool,
    /// Outputs are Jupyter widget views.
    pub jupyter_widgets: bool,
    /// `<script src>` tags emitted by outputs.
    pub html_libraries: Vec<String>,
    /// Saved widget state (`metadata.widgets`).
    pub widgets_state: Option<Value>,
}

impl WidgetDependencies {
    fn is_empty(&self) -> bool {
        !self.js_widgets
            && !self.jupyter_widgets
            && self.html_libraries.is_empty()
            && self.widgets_state.is_none()
    }
}

/// HTML made up only of `<script src=...></script>` tags.
fn is_library_include(html: &str) -> bool {
    let lines: Vec<&str> = html
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    !lines.is_empty()
        && lines
            .iter()
            .all(|l| l.starts_with("<script") && l.contains(" src=") && l.ends_with("</script>"))
}

fn uses_require(text: &str) -> bool {
    text.contains("require([") || text.contains("requirejs") || text.contains("define(")
}

/// Collect widget dependencies, or `None` if the notebook has none.
pub fn extract_widget_dependencies(notebook: &Notebook) -> Option<WidgetDependencies> {
    let mut deps = WidgetDependencies::default();

    for cell in &notebook.cells {
        let Cell::Code(code) = cell else { continue };
        for output in &code.outputs {
            let data = match output {
                Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => data,
                _ => continue,
            };

            if data.contains_key(WIDGET_VIEW_MIME) {
                deps.jupyter_widgets = true;
            }
            if mime_text(data, "application/javascript").is_some_and(|script| uses_require(&script)) {
                deps.js_widgets = true;
            }
            if let Some(html) = mime_text(data, "text/html") {
                if is_library_include(&html) {
                    if !deps.html_libraries.contains(&html) {
                        deps.html_libraries.push(html);
                    }
                } else if uses_require(&html) {
                    deps.js_widgets = true;
                }
            }
        }
    }

    deps.widgets_state = notebook
        .metadata
        .widgets
        .as_ref()
        .and_then(|widgets| widgets.get(WIDGET_STATE_MIME))
        .cloned();

    (!deps.is_empty()).then_some(deps)
}

/// Render dependency records into include fragments.
///
/// Loaders and libraries go in the header; the widget state goes after the
/// body so the html manager finds it once the page has loaded.
pub fn includes_for_widget_dependencies(dependencies: &[WidgetDependencies]) -> IncludeSet {
    let js_widgets = dependencies.iter().any(|d| d.js_widgets);
    let jupyter_widgets = dependencies.iter().any(|d| d.jupyter_widgets);

    let mut head: Vec<String> = Vec::new();
    if js_widgets || jupyter_widgets {
        head.push(REQUIRE_JS.to_string());
        head.push(JQUERY.to_string());
        head.push(JQUERY_DEFINE.to_string());
    }
    if jupyter_widgets {
        head.push(HTML_MANAGER.to_string());
    }
    for library in dependencies.iter().flat_map(|d| &d.html_libraries) {
        if !head.contains(library) {
            head.push(library.clone());
        }
    }

    let states: Vec<&Value> = dependencies
        .iter()
        .filter_map(|d| d.widgets_state.as_ref())
        .collect();

    let mut includes = IncludeSet::default();
    if !head.is_empty() {
        includes.in_header.push(head.join("\n"));
    }
    if jupyter_widgets && !states.is_empty() {
        let state = match states.as_slice() {
            [single] => (*single).clone(),
            many => merge_states(many),
        };
        includes.after_body.push(format!(
            "<script type=\"{}\">\n{}\n</script>",
            WIDGET_STATE_MIME, state
        ));
    }
    includes
}

/// Combine several widget states into one (`state` maps are unioned).
fn merge_states(states: &[&Value]) -> Value {
    let mut merged = serde_json::Map::new();
    let mut version = None;
    for state in states {
        if let Some(Value::Object(entries)) = state.get("state") {
            merged.extend(entries.clone());
        }
        if version.is_none() {
            version = state.get("version_major").cloned();
        }
    }
    serde_json::json!({
        "version_major": version.unwrap_or(Value::from(2)),
        "version_minor": 0,
        "state": merged,
    })
}
