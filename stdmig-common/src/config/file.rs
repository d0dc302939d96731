//! Optional TOML configuration file.
//!
//! Every field is optional; absent values keep their defaults and the
//! environment still overrides whatever the file sets.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::settings::ConfigError;

/// Parsed `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Extra source-name → destination-name synonyms, merged over the built-ins.
    #[serde(default)]
    pub tool_synonyms: BTreeMap<String, String>,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub replication: ReplicationSection,
    #[serde(default)]
    pub validation: ValidationSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    pub credential_header: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub page_limit: Option<u32>,
    pub page_pause_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationSection {
    pub batch_size: Option<u32>,
    pub sub_batch_size: Option<u32>,
    pub batch_attempts: Option<u32>,
    pub batch_retry_delay_ms: Option<u64>,
    pub write_pause_ms: Option<u64>,
    pub batch_pause_ms: Option<u64>,
    pub default_language: Option<String>,
    pub name_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSection {
    pub max_attempts: Option<u32>,
    pub tool_sample: Option<u32>,
    pub page_cap: Option<u32>,
    pub repair_cap: Option<u32>,
}

impl ConfigFile {
    /// Parse TOML text. `origin` is only used in error messages.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|err| ConfigError::FileParse {
            path: origin.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|err| ConfigError::FileRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(&contents, path)
    }

    /// `<config dir>/stdmig/config.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stdmig").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let text = r#"
            [tool_synonyms]
            "Flake8 (legacy)" = "Prospector"

            [http]
            credential_header = "x-api-key"
            page_limit = 500

            [replication]
            batch_size = 25
            default_language = "Kotlin"

            [validation]
            max_attempts = 5
            repair_cap = 20
        "#;
        let file = ConfigFile::parse(text, Path::new("config.toml")).unwrap();
        assert_eq!(
            file.tool_synonyms.get("Flake8 (legacy)").map(String::as_str),
            Some("Prospector")
        );
        assert_eq!(file.http.credential_header.as_deref(), Some("x-api-key"));
        assert_eq!(file.http.page_limit, Some(500));
        assert_eq!(file.replication.batch_size, Some(25));
        assert_eq!(file.replication.sub_batch_size, None);
        assert_eq!(file.validation.repair_cap, Some(20));
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = ConfigFile::parse("", Path::new("empty.toml")).unwrap();
        assert_eq!(file, ConfigFile::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ConfigFile::parse("[replication]\nbatch = 3\n", Path::new("bad.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileParse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigFile::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[validation]\ntool_sample = 4\n").unwrap();
        let file = ConfigFile::load(&path).unwrap();
        assert_eq!(file.validation.tool_sample, Some(4));
    }
}
