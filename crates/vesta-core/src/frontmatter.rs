//! YAML front matter.

use serde_json::Value;

use crate::error::{Error, Result};

/// Document metadata as a JSON object.
pub type Metadata = serde_json::Map<String, Value>;

/// Split a leading `---` ... `---` block off a markdown document.
///
/// Returns the YAML text and the remaining body, or `None` if the document
/// does not start with front matter.
pub fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }

    None
}

/// Parse the leading YAML block of a markdown document.
///
/// A document without front matter yields empty metadata. Front matter that
/// is not a mapping is a configuration error.
pub fn read_yaml_from_markdown(text: &str) -> Result<Metadata> {
    let Some((yaml, _)) = split_front_matter(text) else {
        return Ok(Metadata::new());
    };

    parse_yaml_mapping(yaml)
}

/// Parse YAML text that must be a mapping (empty text is an empty mapping).
pub fn parse_yaml_mapping(yaml: &str) -> Result<Metadata> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: Value = serde_yaml::from_str(yaml)?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        other => Err(Error::Config(format!(
            "front matter must be a mapping, found {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
