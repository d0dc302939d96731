//! Effective migrator settings: defaults, then the TOML file, then `STDMIG_*`
//! variables, then command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::env::{EnvError, EnvParser};
use super::file::ConfigFile;
use super::source::{ConfigSource, Sourced};
use crate::errors::ErrorCode;
use crate::retry::RetryPolicy;
use crate::util::mask_secret;

/// Header carrying the API token unless configured otherwise.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "api-token";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("failed to read config file {}: {message}", path.display())]
    FileRead { path: PathBuf, message: String },

    #[error("failed to parse config file {}: {message}", path.display())]
    FileParse { path: PathBuf, message: String },

    #[error("registry base URL not configured (set {var})")]
    MissingEndpoint { var: String },

    #[error("registry API token not configured (set {var})")]
    MissingCredential { var: String },
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::FileRead { .. } => ErrorCode::ConfigFileReadError,
            Self::FileParse { .. } => ErrorCode::ConfigFileParseError,
            Self::MissingEndpoint { .. } => ErrorCode::ConfigMissingEndpoint,
            Self::MissingCredential { .. } => ErrorCode::ConfigMissingCredential,
        }
    }
}

/// Base URL plus credential for one registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    pub base_url: String,
    pub token: String,
    pub credential_header: String,
}

impl RegistryEndpoint {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
        }
    }
}

impl std::fmt::Debug for RegistryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEndpoint")
            .field("base_url", &self.base_url)
            .field("token", &mask_secret(&self.token))
            .field("credential_header", &self.credential_header)
            .finish()
    }
}

/// Source and destination endpoints as configured; resolution is deferred
/// so commands that never touch a registry do not need credentials.
#[derive(Debug, Clone, Default)]
pub struct EndpointSettings {
    pub source_url: Option<String>,
    pub source_token: Option<String>,
    pub dest_url: Option<String>,
    pub dest_token: Option<String>,
    pub credential_header: String,
}

impl EndpointSettings {
    pub fn source_endpoint(&self) -> Result<RegistryEndpoint, ConfigError> {
        let base_url = self
            .source_url
            .clone()
            .ok_or_else(|| ConfigError::MissingEndpoint {
                var: "STDMIG_SOURCE_API_URL".to_string(),
            })?;
        let token = self
            .source_token
            .clone()
            .ok_or_else(|| ConfigError::MissingCredential {
                var: "STDMIG_SOURCE_API_TOKEN".to_string(),
            })?;
        Ok(RegistryEndpoint {
            base_url,
            token,
            credential_header: self.credential_header.clone(),
        })
    }

    /// Destination endpoint. Without `STDMIG_DEST_API_URL` the source
    /// registry is reused (same-registry migration between organizations);
    /// a distinct destination URL requires its own token.
    pub fn destination_endpoint(&self) -> Result<RegistryEndpoint, ConfigError> {
        match &self.dest_url {
            Some(base_url) => {
                let token =
                    self.dest_token
                        .clone()
                        .ok_or_else(|| ConfigError::MissingCredential {
                            var: "STDMIG_DEST_API_TOKEN".to_string(),
                        })?;
                Ok(RegistryEndpoint {
                    base_url: base_url.clone(),
                    token,
                    credential_header: self.credential_header.clone(),
                })
            }
            None => {
                let mut endpoint = self.source_endpoint()?;
                if let Some(token) = &self.dest_token {
                    endpoint.token = token.clone();
                }
                Ok(endpoint)
            }
        }
    }
}

/// HTTP behaviour shared by both registry clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub page_limit: u32,
    pub page_pause: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1000),
            page_limit: 100,
            page_pause: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpSettings {
    /// No pauses and no backoff; retry counts are kept.
    pub fn immediate() -> Self {
        Self {
            page_pause: Duration::ZERO,
            retry: RetryPolicy::immediate(RetryPolicy::default().max_retries),
            ..Self::default()
        }
    }
}

/// Batch sizes and throttles used when writing a destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationSettings {
    pub batch_size: usize,
    pub sub_batch_size: usize,
    pub batch_attempts: u32,
    pub batch_retry_delay: Duration,
    /// Pause after every batched write.
    pub write_pause: Duration,
    /// Pause between a tool's disable pass and its enable pass.
    pub batch_pause: Duration,
    pub default_language: String,
    pub name_prefix: String,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            sub_batch_size: 10,
            batch_attempts: 3,
            batch_retry_delay: Duration::from_secs(5),
            write_pause: Duration::from_secs(1),
            batch_pause: Duration::from_secs(3),
            default_language: "Java".to_string(),
            name_prefix: "Migrated: ".to_string(),
        }
    }
}

impl ReplicationSettings {
    pub fn immediate() -> Self {
        Self {
            batch_retry_delay: Duration::ZERO,
            write_pause: Duration::ZERO,
            batch_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Bounds for the convergence check and repair loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSettings {
    pub max_attempts: u32,
    /// Tools checked per pass; `None` checks all of them.
    pub tool_sample: Option<usize>,
    /// Pattern pages read per tool; `None` reads until the cursor ends. A
    /// tool whose listing is cut by the cap is reported unchecked.
    pub page_cap: Option<usize>,
    /// Missing patterns re-pushed per tool per pass; `None` pushes all.
    pub repair_cap: Option<usize>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            tool_sample: Some(10),
            page_cap: None,
            repair_cap: None,
        }
    }
}

/// One line of `stdmig config` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: ConfigSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct MigrationConfig {
    pub endpoints: EndpointSettings,
    pub http: HttpSettings,
    pub replication: ReplicationSettings,
    pub validation: ValidationSettings,
    /// Synonyms from the config file, merged over the built-in table by the mapper.
    pub tool_synonyms: BTreeMap<String, String>,
    pub config_path: Option<PathBuf>,
    entries: Vec<ConfigEntry>,
}

impl MigrationConfig {
    /// Load configuration. `explicit` is the `--config` flag; without it
    /// `STDMIG_CONFIG` and then the platform config dir are tried. An
    /// explicitly named file must exist; the platform default may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut parser = EnvParser::new();
        let env_path = parser.get_optional_string("CONFIG").value.map(PathBuf::from);

        let (file, path) = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => (ConfigFile::load(&path)?, Some(path)),
            None => match ConfigFile::default_path().filter(|p| p.is_file()) {
                Some(path) => (ConfigFile::load(&path)?, Some(path)),
                None => (ConfigFile::default(), None),
            },
        };

        Self::resolve(file, path)
    }

    /// Layer environment variables over an already parsed file.
    pub fn resolve(file: ConfigFile, path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut parser = EnvParser::new();
        let mut config = Self {
            config_path: path.clone(),
            tool_synonyms: file.tool_synonyms.clone(),
            ..Self::default()
        };
        let origin = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let mut layers = Layers {
            origin: &origin,
            entries: Vec::new(),
        };

        // Endpoints
        let source_url =
            layers.optional("source.api_url", parser.get_optional_string("SOURCE_API_URL"));
        let source_token =
            layers.secret("source.api_token", parser.get_optional_string("SOURCE_API_TOKEN"));
        let dest_url =
            layers.optional("destination.api_url", parser.get_optional_string("DEST_API_URL"));
        let dest_token =
            layers.secret("destination.api_token", parser.get_optional_string("DEST_API_TOKEN"));
        let credential_header = layers.value(
            "http.credential_header",
            DEFAULT_CREDENTIAL_HEADER.to_string(),
            file.http.credential_header.clone(),
            parser.get_string("CREDENTIAL_HEADER", DEFAULT_CREDENTIAL_HEADER),
        );
        config.endpoints = EndpointSettings {
            source_url,
            source_token,
            dest_url,
            dest_token,
            credential_header,
        };

        // HTTP
        let http_defaults = HttpSettings::default();
        let retry_defaults = RetryPolicy::default();
        let timeout_secs = layers.value(
            "http.timeout_secs",
            http_defaults.timeout.as_secs(),
            file.http.timeout_secs,
            parser.get_u64_range("HTTP_TIMEOUT_SECS", http_defaults.timeout.as_secs(), 1, 86_400),
        );
        let max_retries = layers.value(
            "http.max_retries",
            retry_defaults.max_retries,
            file.http.max_retries,
            parser.get_u32_range("MAX_RETRIES", retry_defaults.max_retries, 0, 10),
        );
        let backoff_base_ms = layers.value(
            "http.backoff_base_ms",
            retry_defaults.base_delay.as_millis() as u64,
            file.http.backoff_base_ms,
            parser.get_u64_range(
                "BACKOFF_BASE_MS",
                retry_defaults.base_delay.as_millis() as u64,
                0,
                600_000,
            ),
        );
        let backoff_max_ms = layers.value(
            "http.backoff_max_ms",
            retry_defaults.max_delay.as_millis() as u64,
            file.http.backoff_max_ms,
            parser.get_u64_range(
                "BACKOFF_MAX_MS",
                retry_defaults.max_delay.as_millis() as u64,
                0,
                3_600_000,
            ),
        );
        let page_limit = layers.value(
            "http.page_limit",
            http_defaults.page_limit,
            file.http.page_limit,
            parser.get_u32_range("PAGE_LIMIT", http_defaults.page_limit, 1, 1000),
        );
        let page_pause_ms = layers.value(
            "http.page_pause_ms",
            http_defaults.page_pause.as_millis() as u64,
            file.http.page_pause_ms,
            parser.get_u64_range(
                "PAGE_PAUSE_MS",
                http_defaults.page_pause.as_millis() as u64,
                0,
                600_000,
            ),
        );
        config.http = HttpSettings {
            timeout: Duration::from_secs(timeout_secs),
            page_limit: page_limit.max(1),
            page_pause: Duration::from_millis(page_pause_ms),
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(backoff_base_ms),
                max_delay: Duration::from_millis(backoff_max_ms),
                ..retry_defaults
            },
        };

        // Replication
        let rep = ReplicationSettings::default();
        let batch_size = layers.value(
            "replication.batch_size",
            rep.batch_size as u32,
            file.replication.batch_size,
            parser.get_u32_range("BATCH_SIZE", rep.batch_size as u32, 1, 1000),
        );
        let sub_batch_size = layers.value(
            "replication.sub_batch_size",
            rep.sub_batch_size as u32,
            file.replication.sub_batch_size,
            parser.get_u32_range("SUB_BATCH_SIZE", rep.sub_batch_size as u32, 1, 1000),
        );
        let batch_attempts = layers.value(
            "replication.batch_attempts",
            rep.batch_attempts,
            file.replication.batch_attempts,
            parser.get_u32_range("BATCH_ATTEMPTS", rep.batch_attempts, 1, 10),
        );
        let batch_retry_delay_ms = layers.value(
            "replication.batch_retry_delay_ms",
            rep.batch_retry_delay.as_millis() as u64,
            file.replication.batch_retry_delay_ms,
            parser.get_u64_range(
                "BATCH_RETRY_DELAY_MS",
                rep.batch_retry_delay.as_millis() as u64,
                0,
                600_000,
            ),
        );
        let write_pause_ms = layers.value(
            "replication.write_pause_ms",
            rep.write_pause.as_millis() as u64,
            file.replication.write_pause_ms,
            parser.get_u64_range(
                "WRITE_PAUSE_MS",
                rep.write_pause.as_millis() as u64,
                0,
                600_000,
            ),
        );
        let batch_pause_ms = layers.value(
            "replication.batch_pause_ms",
            rep.batch_pause.as_millis() as u64,
            file.replication.batch_pause_ms,
            parser.get_u64_range(
                "BATCH_PAUSE_MS",
                rep.batch_pause.as_millis() as u64,
                0,
                600_000,
            ),
        );
        let default_language = layers.value(
            "replication.default_language",
            rep.default_language.clone(),
            file.replication.default_language.clone(),
            parser.get_string("DEFAULT_LANGUAGE", &rep.default_language),
        );
        let name_prefix = layers.value(
            "replication.name_prefix",
            rep.name_prefix.clone(),
            file.replication.name_prefix.clone(),
            parser.get_string("STANDARD_NAME_PREFIX", &rep.name_prefix),
        );
        config.replication = ReplicationSettings {
            batch_size: batch_size.max(1) as usize,
            sub_batch_size: sub_batch_size.max(1) as usize,
            batch_attempts: batch_attempts.max(1),
            batch_retry_delay: Duration::from_millis(batch_retry_delay_ms),
            write_pause: Duration::from_millis(write_pause_ms),
            batch_pause: Duration::from_millis(batch_pause_ms),
            default_language,
            name_prefix,
        };

        // Validation; a zero cap means unlimited.
        let val = ValidationSettings::default();
        let max_attempts = layers.value(
            "validation.max_attempts",
            val.max_attempts,
            file.validation.max_attempts,
            parser.get_u32_range("VALIDATION_MAX_ATTEMPTS", val.max_attempts, 1, 10),
        );
        let tool_sample = layers.value(
            "validation.tool_sample",
            cap_to_u32(val.tool_sample),
            file.validation.tool_sample,
            parser.get_u32_range("VALIDATION_TOOL_SAMPLE", cap_to_u32(val.tool_sample), 0, 10_000),
        );
        let page_cap = layers.value(
            "validation.page_cap",
            cap_to_u32(val.page_cap),
            file.validation.page_cap,
            parser.get_u32_range("VALIDATION_PAGE_CAP", cap_to_u32(val.page_cap), 0, 10_000),
        );
        let repair_cap = layers.value(
            "validation.repair_cap",
            cap_to_u32(val.repair_cap),
            file.validation.repair_cap,
            parser.get_u32_range("VALIDATION_REPAIR_CAP", cap_to_u32(val.repair_cap), 0, 100_000),
        );
        config.validation = ValidationSettings {
            max_attempts: max_attempts.max(1),
            tool_sample: u32_to_cap(tool_sample),
            page_cap: u32_to_cap(page_cap),
            repair_cap: u32_to_cap(repair_cap),
        };

        for (from, to) in &file.tool_synonyms {
            layers.entries.push(ConfigEntry {
                key: format!("tool_synonyms.{from}"),
                value: to.clone(),
                source: ConfigSource::ConfigFile,
                origin: Some(origin.clone()),
            });
        }

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        config.entries = layers.entries;
        Ok(config)
    }

    /// Effective values with their provenance; credentials are masked.
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Record a command-line override for `stdmig config`-style reporting.
    pub fn note_cli_override(&mut self, key: &str, value: impl ToString, flag: &str) {
        let entry = ConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
            source: ConfigSource::CommandLine,
            origin: Some(flag.to_string()),
        };
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }
}

fn cap_to_u32(cap: Option<usize>) -> u32 {
    cap.map(|c| c as u32).unwrap_or(0)
}

fn u32_to_cap(value: u32) -> Option<usize> {
    (value > 0).then_some(value as usize)
}

/// Accumulates provenance while values are layered.
struct Layers<'a> {
    origin: &'a str,
    entries: Vec<ConfigEntry>,
}

impl Layers<'_> {
    fn value<T: ToString>(
        &mut self,
        key: &str,
        default: T,
        from_file: Option<T>,
        from_env: Sourced<T>,
    ) -> T {
        let base = match from_file {
            Some(value) => Sourced::from_file(value, self.origin),
            None => Sourced::default_value(default),
        };
        let resolved = if from_env.source == ConfigSource::Environment {
            base.or_override(from_env)
        } else {
            base
        };
        self.push(key, resolved.value.to_string(), &resolved);
        resolved.value
    }

    fn optional(&mut self, key: &str, from_env: Sourced<Option<String>>) -> Option<String> {
        let shown = from_env.value.clone().unwrap_or_else(|| "(unset)".to_string());
        self.push(key, shown, &from_env);
        from_env.value
    }

    fn secret(&mut self, key: &str, from_env: Sourced<Option<String>>) -> Option<String> {
        let shown = from_env
            .value
            .as_deref()
            .map(mask_secret)
            .unwrap_or_else(|| "(unset)".to_string());
        self.push(key, shown, &from_env);
        from_env.value
    }

    fn push<T>(&mut self, key: &str, value: String, sourced: &Sourced<T>) {
        self.entries.push(ConfigEntry {
            key: key.to_string(),
            value,
            source: sourced.source,
            origin: sourced.origin.clone(),
        });
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    const VARS: &[&str] = &[
        "STDMIG_CONFIG",
        "STDMIG_SOURCE_API_URL",
        "STDMIG_SOURCE_API_TOKEN",
        "STDMIG_DEST_API_URL",
        "STDMIG_DEST_API_TOKEN",
        "STDMIG_BATCH_SIZE",
        "STDMIG_MAX_RETRIES",
        "STDMIG_VALIDATION_TOOL_SAMPLE",
        "STDMIG_PAGE_LIMIT",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: env access is serialized by env_test_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: env access is serialized by env_test_lock
        unsafe { std::env::set_var(key, value) };
    }

    fn entry<'a>(config: &'a MigrationConfig, key: &str) -> &'a ConfigEntry {
        config
            .entries()
            .iter()
            .find(|e| e.key == key)
            .unwrap_or_else(|| panic!("missing entry {key}"))
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let _guard = env_test_lock();
        clear_env();

        let config = MigrationConfig::resolve(ConfigFile::default(), None).unwrap();
        assert_eq!(config.http.timeout, Duration::from_secs(1000));
        assert_eq!(config.http.retry.max_retries, 3);
        assert_eq!(config.replication.batch_size, 50);
        assert_eq!(config.replication.sub_batch_size, 10);
        assert_eq!(config.replication.default_language, "Java");
        assert_eq!(config.validation.tool_sample, Some(10));
        assert_eq!(config.validation.page_cap, None);
        assert_eq!(config.validation.repair_cap, None);
        assert_eq!(entry(&config, "replication.batch_size").source, ConfigSource::Default);
    }

    #[test]
    fn test_env_overrides_file() {
        let _guard = env_test_lock();
        clear_env();
        set_env("STDMIG_BATCH_SIZE", "20");

        let file = ConfigFile::parse(
            "[replication]\nbatch_size = 30\nsub_batch_size = 5\n",
            Path::new("cfg.toml"),
        )
        .unwrap();
        let config = MigrationConfig::resolve(file, Some(PathBuf::from("cfg.toml"))).unwrap();
        assert_eq!(config.replication.batch_size, 20);
        assert_eq!(config.replication.sub_batch_size, 5);
        assert_eq!(
            entry(&config, "replication.batch_size").source,
            ConfigSource::Environment
        );
        let sub = entry(&config, "replication.sub_batch_size");
        assert_eq!(sub.source, ConfigSource::ConfigFile);
        assert_eq!(sub.origin.as_deref(), Some("cfg.toml"));

        clear_env();
    }

    #[test]
    fn test_zero_tool_sample_means_unlimited() {
        let _guard = env_test_lock();
        clear_env();
        set_env("STDMIG_VALIDATION_TOOL_SAMPLE", "0");

        let config = MigrationConfig::resolve(ConfigFile::default(), None).unwrap();
        assert_eq!(config.validation.tool_sample, None);

        clear_env();
    }

    #[test]
    fn test_invalid_env_collected() {
        let _guard = env_test_lock();
        clear_env();
        set_env("STDMIG_MAX_RETRIES", "many");
        set_env("STDMIG_PAGE_LIMIT", "0");

        let err = MigrationConfig::resolve(ConfigFile::default(), None).unwrap_err();
        match &err {
            ConfigError::Env(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.error_code(), ErrorCode::ConfigEnvError);

        clear_env();
    }

    #[test]
    fn test_tokens_masked_in_entries() {
        let _guard = env_test_lock();
        clear_env();
        set_env("STDMIG_SOURCE_API_URL", "https://registry.example/api/v3");
        set_env("STDMIG_SOURCE_API_TOKEN", "0123456789abcdef");

        let config = MigrationConfig::resolve(ConfigFile::default(), None).unwrap();
        assert_eq!(entry(&config, "source.api_token").value, "***cdef");
        assert_eq!(entry(&config, "destination.api_token").value, "(unset)");

        clear_env();
    }

    #[test]
    fn test_destination_falls_back_to_source() {
        let endpoints = EndpointSettings {
            source_url: Some("https://a.example".into()),
            source_token: Some("source-token".into()),
            credential_header: DEFAULT_CREDENTIAL_HEADER.into(),
            ..Default::default()
        };
        let dest = endpoints.destination_endpoint().unwrap();
        assert_eq!(dest.base_url, "https://a.example");
        assert_eq!(dest.token, "source-token");

        let with_token = EndpointSettings {
            dest_token: Some("dest-token".into()),
            ..endpoints.clone()
        };
        assert_eq!(with_token.destination_endpoint().unwrap().token, "dest-token");
    }

    #[test]
    fn test_distinct_destination_requires_token() {
        let endpoints = EndpointSettings {
            source_url: Some("https://a.example".into()),
            source_token: Some("source-token".into()),
            dest_url: Some("https://b.example".into()),
            credential_header: DEFAULT_CREDENTIAL_HEADER.into(),
            ..Default::default()
        };
        let err = endpoints.destination_endpoint().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential { ref var } if var == "STDMIG_DEST_API_TOKEN"
        ));
    }

    #[test]
    fn test_missing_source_url() {
        let err = EndpointSettings::default().source_endpoint().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ConfigMissingEndpoint);
    }

    #[test]
    fn test_endpoint_debug_masks_token() {
        let endpoint = RegistryEndpoint::new("https://a.example", "supersecrettoken");
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("***oken"));
    }

    #[test]
    fn test_cli_override_replaces_entry() {
        let _guard = env_test_lock();
        clear_env();

        let mut config = MigrationConfig::resolve(ConfigFile::default(), None).unwrap();
        config.validation.max_attempts = 5;
        config.note_cli_override("validation.max_attempts", 5, "--max-attempts");
        let e = entry(&config, "validation.max_attempts");
        assert_eq!(e.value, "5");
        assert_eq!(e.source, ConfigSource::CommandLine);
    }
}
