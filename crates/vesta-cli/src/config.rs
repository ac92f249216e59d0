//! User configuration.
//!
//! Optional YAML file at `<config dir>/vesta/config.yml` using the same keys
//! as document front matter. It is the lowest layer of format settings.

use std::path::{Path, PathBuf};

use vesta_core::FormatSpec;
use vesta_core::frontmatter::parse_yaml_mapping;

/// Location of the user config file, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vesta").join("config.yml"))
}

/// Load format settings from `path`; a missing file means no settings.
pub fn load_config(path: &Path) -> anyhow::Result<FormatSpec> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FormatSpec::default()),
        Err(e) => return Err(e.into()),
    };

    let metadata = parse_yaml_mapping(&text)?;
    let spec = FormatSpec::from_metadata(&metadata)?;
    tracing::debug!("Loaded user config from {}", path.display());
    Ok(spec)
}

/// Load the user config, or defaults when there is none.
pub fn load_user_config() -> anyhow::Result<FormatSpec> {
    match user_config_path() {
        Some(path) => load_config(&path),
        None => Ok(FormatSpec::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vesta_core::DaemonSetting;

    #[test]
    fn test_missing_config_is_default() {
        let temp = TempDir::new().unwrap();
        let spec = load_config(&temp.path().join("config.yml")).unwrap();
        assert_eq!(spec, FormatSpec::default());
    }

    #[test]
    fn test_config_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "execute:\n  daemon: 60\n  echo: false\nkeep-md: true\n").unwrap();

        let spec = load_config(&path).unwrap();
        assert_eq!(spec.execute.daemon, Some(DaemonSetting::Seconds(60)));
        assert_eq!(spec.execute.echo, Some(false));
        assert!(spec.keep_md());
    }

    #[test]
    fn test_invalid_config_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "- just\n- a list\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
