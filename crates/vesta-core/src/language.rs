//! Language translations for generated text (captions, section titles).
//!
//! A translation file is a flat YAML mapping of text keys. Variations live
//! next to it as `<stem>-<variation>.yml` (`_language-fr.yml`,
//! `_language-en-GB.yml`). Scalar entries of a variation are stored under the
//! variation key, nested mappings under `<variation>-<key>`.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::frontmatter::{Metadata, parse_yaml_mapping};

/// Metadata key holding translations (or the path of a translation file).
pub const LANGUAGE_KEY: &str = "language";

/// Metadata key of the document language.
pub const LANG_KEY: &str = "lang";

const DEFAULT_LANG: &str = "en";

/// Translations read from disk, plus every file that contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanguageTranslations {
    pub language: Metadata,
    pub files: Vec<PathBuf>,
}

fn read_if_exists(path: &Path, files: &mut Vec<PathBuf>) -> Result<Metadata> {
    if !path.is_file() {
        return Ok(Metadata::new());
    }
    let text = std::fs::read_to_string(path)?;
    files.push(std::fs::canonicalize(path)?);
    parse_yaml_mapping(&text)
}

/// Variation names of `file` found on disk (`_language-fr.yml` → `fr`).
fn discover_variations(file: &Path) -> Result<Vec<String>> {
    let dir = file.parent().unwrap_or(Path::new("."));
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let ext = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let prefix = format!("{}-", stem);

    let mut variations = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let lower = name.to_lowercase();
        if lower.starts_with(&prefix) && lower.ends_with(&ext) && lower.len() > prefix.len() + ext.len() {
            variations.push(name[prefix.len()..name.len() - ext.len()].to_string());
        }
    }
    variations.sort();
    Ok(variations)
}

/// Read a translation file and its variations.
///
/// With `lang` (`en-GB`), only the variations it implies (`en`, `en-GB`) are
/// read; otherwise every variation present on disk is.
pub fn read_language_translations(file: &Path, lang: Option<&str>) -> Result<LanguageTranslations> {
    let mut files = Vec::new();
    let mut language = read_if_exists(file, &mut files)?;

    let variations = match lang {
        Some(lang) => subtag_prefixes(lang),
        None => discover_variations(file)?,
    };

    let dir = file.parent().unwrap_or(Path::new("."));
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for variation in variations {
        let path = dir.join(format!("{}-{}{}", stem, variation, ext));
        let translations = read_if_exists(&path, &mut files)?;

        for (key, value) in translations {
            match value {
                Value::Object(entries) => {
                    merge_entries(&mut language, format!("{}-{}", variation, key), entries);
                }
                scalar => {
                    let mut entry = Metadata::new();
                    entry.insert(key, scalar);
                    merge_entries(&mut language, variation.clone(), entry);
                }
            }
        }
    }

    Ok(LanguageTranslations { language, files })
}

fn merge_entries(language: &mut Metadata, key: String, entries: Metadata) {
    let mut merged = match language.remove(&key) {
        Some(Value::Object(existing)) => existing,
        _ => Metadata::new(),
    };
    merged.extend(entries);
    language.insert(key, Value::Object(merged));
}

/// `en-GB-oxendict` → `["en", "en-GB", "en-GB-oxendict"]`.
fn subtag_prefixes(lang: &str) -> Vec<String> {
    let subtags: Vec<&str> = lang.split('-').collect();
    (1..=subtags.len()).map(|n| subtags[..n].join("-")).collect()
}

/// Replace a `language: <file>` entry with the translations it names.
///
/// Returns the files read. A `language` that is neither a file name nor a
/// mapping is reset to an empty mapping.
pub fn resolve_language_metadata(metadata: &mut Metadata, dir: &Path) -> Result<Vec<PathBuf>> {
    match metadata.get(LANGUAGE_KEY) {
        Some(Value::String(file)) => {
            let path = dir.join(file);
            if !path.exists() {
                return Err(Error::MissingLanguageFile(path));
            }
            let translations = read_language_translations(&path, None)?;
            metadata.insert(LANGUAGE_KEY.to_string(), Value::Object(translations.language));
            Ok(translations.files)
        }
        Some(Value::Object(_)) => Ok(Vec::new()),
        _ => {
            metadata.insert(LANGUAGE_KEY.to_string(), Value::Object(Metadata::new()));
            Ok(Vec::new())
        }
    }
}

/// Translations for `lang`: defaults, then each subtag variation from the
/// most general to the most specific.
pub fn translations_for_lang(language: &Metadata, lang: &str) -> Metadata {
    let mut translations: Metadata = language
        .iter()
        .filter(|(_, value)| !value.is_object())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for variation in subtag_prefixes(lang) {
        if let Some(Value::Object(entries)) = language.get(&variation) {
            translations.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    translations
}

/// Translations that apply to a document with resolved `language` metadata,
/// picked by its `lang` (default `en`).
pub fn document_translations(metadata: &Metadata) -> Metadata {
    let lang = metadata
        .get(LANG_KEY)
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_LANG);
    match metadata.get(LANGUAGE_KEY) {
        Some(Value::Object(language)) => translations_for_lang(language, lang),
        _ => Metadata::new(),
    }
}
