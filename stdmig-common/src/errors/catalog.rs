//! Error Catalog for the coding standard migrator
//!
//! This module defines the error catalog with unique error codes,
//! categorized by subsystem. Each error includes:
//! - A unique code (MIG-E001 through MIG-E599)
//! - A human-readable message template
//! - Remediation steps
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration, credentials, files    |
//! | E100-E199  | Registry    | Registry HTTP API failures           |
//! | E200-E299  | Extraction  | Source snapshot extraction           |
//! | E300-E399  | Replication | Destination replication and settings |
//! | E400-E499  | Validation  | Convergence validation               |
//! | E500-E599  | Internal    | Internal/unexpected errors           |
//!
//! # Example
//!
//! ```rust
//! use stdmig_common::errors::catalog::ErrorCode;
//!
//! let entry = ErrorCode::RegistryAuthFailed.entry();
//! println!("Error {}: {}", entry.code, entry.message);
//! for step in entry.remediation {
//!     println!("  - {}", step);
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all migration error scenarios.
///
/// Each variant maps to a unique error code in the MIG-Exxx format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Registry credential not configured
    ConfigMissingCredential,
    /// Registry base URL not configured
    ConfigMissingEndpoint,
    /// Invalid environment variable value
    ConfigEnvError,
    /// Configuration file could not be read
    ConfigFileReadError,
    /// Configuration file has invalid syntax
    ConfigFileParseError,
    /// Snapshot file could not be read
    SnapshotReadError,
    /// Snapshot file could not be written
    SnapshotWriteError,
    /// Snapshot file has an unrecognized shape
    SnapshotParseError,

    // =========================================================================
    // Registry Errors (E100-E199)
    // =========================================================================
    /// Credential rejected (401/403)
    RegistryAuthFailed,
    /// Resource not found (404)
    RegistryNotFound,
    /// Request rejected by the registry (other 4xx)
    RegistryClientError,
    /// Retries exhausted on transport or server failures
    RegistryTransportExhausted,
    /// Registry kept throttling requests (429)
    RegistryRateLimited,
    /// Response body could not be decoded
    RegistryDecodeError,

    // =========================================================================
    // Extraction Errors (E200-E299)
    // =========================================================================
    /// Listing source standards or tools failed
    ExtractionAborted,
    /// Source organization has no published standards
    ExtractionNoStandards,
    /// No standard could be selected
    ExtractionSelectionFailed,
    /// Source tool has no destination equivalent
    ExtractionToolUnmapped,
    /// Fetching a source tool's patterns failed
    ExtractionToolFetchFailed,

    // =========================================================================
    // Replication Errors (E300-E399)
    // =========================================================================
    /// Destination standard could not be created
    ReplicationContainerCreateFailed,
    /// Destination default tools could not be listed or disabled
    ReplicationDefaultsDisableFailed,
    /// Destination tool could not be enabled
    ReplicationToolEnableFailed,
    /// Pattern batch rejected after all retries
    ReplicationBatchFailed,
    /// Run stopped by the operator
    ReplicationCancelled,
    /// Migrated standard could not be promoted
    ReplicationPromoteFailed,
    /// Quality settings category could not be migrated
    QualitySettingsFailed,

    // =========================================================================
    // Validation Errors (E400-E499)
    // =========================================================================
    /// Destination did not converge within the attempt budget
    ValidationIncomplete,
    /// Destination state could not be read for validation
    ValidationFetchFailed,
    /// Destination lifecycle received an illegal transition
    ValidationStateError,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Serialization error
    InternalSerdeError,
    /// Logging system error
    InternalLoggingError,
    /// Interactive prompt failed
    InternalPromptError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Config (001-099)
            Self::ConfigMissingCredential => 1,
            Self::ConfigMissingEndpoint => 2,
            Self::ConfigEnvError => 3,
            Self::ConfigFileReadError => 4,
            Self::ConfigFileParseError => 5,
            Self::SnapshotReadError => 6,
            Self::SnapshotWriteError => 7,
            Self::SnapshotParseError => 8,

            // Registry (100-199)
            Self::RegistryAuthFailed => 100,
            Self::RegistryNotFound => 101,
            Self::RegistryClientError => 102,
            Self::RegistryTransportExhausted => 103,
            Self::RegistryRateLimited => 104,
            Self::RegistryDecodeError => 105,

            // Extraction (200-299)
            Self::ExtractionAborted => 200,
            Self::ExtractionNoStandards => 201,
            Self::ExtractionSelectionFailed => 202,
            Self::ExtractionToolUnmapped => 203,
            Self::ExtractionToolFetchFailed => 204,

            // Replication (300-399)
            Self::ReplicationContainerCreateFailed => 300,
            Self::ReplicationDefaultsDisableFailed => 301,
            Self::ReplicationToolEnableFailed => 302,
            Self::ReplicationBatchFailed => 303,
            Self::ReplicationCancelled => 304,
            Self::ReplicationPromoteFailed => 305,
            Self::QualitySettingsFailed => 306,

            // Validation (400-499)
            Self::ValidationIncomplete => 400,
            Self::ValidationFetchFailed => 401,
            Self::ValidationStateError => 402,

            // Internal (500-599)
            Self::InternalSerdeError => 500,
            Self::InternalLoggingError => 501,
            Self::InternalPromptError => 502,
        }
    }

    /// Returns the formatted error code string (e.g., "MIG-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("MIG-E{:03}", self.code_number())
    }

    /// Looks up a code by its formatted string, as stored in run reports.
    #[must_use]
    pub fn from_code_string(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.code_string() == code)
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Registry,
            200..=299 => ErrorCategory::Extraction,
            300..=399 => ErrorCategory::Replication,
            400..=499 => ErrorCategory::Validation,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigMissingCredential => "Registry API token is not configured",
            Self::ConfigMissingEndpoint => "Registry base URL is not configured",
            Self::ConfigEnvError => "Invalid environment variable value",
            Self::ConfigFileReadError => "Failed to read configuration file",
            Self::ConfigFileParseError => "Configuration file contains invalid TOML",
            Self::SnapshotReadError => "Failed to read snapshot file",
            Self::SnapshotWriteError => "Failed to write snapshot file",
            Self::SnapshotParseError => "Snapshot file has an unrecognized shape",

            Self::RegistryAuthFailed => "Registry rejected the API token",
            Self::RegistryNotFound => "Registry resource not found",
            Self::RegistryClientError => "Registry rejected the request",
            Self::RegistryTransportExhausted => "Registry unreachable after all retries",
            Self::RegistryRateLimited => "Registry rate limit persisted after all retries",
            Self::RegistryDecodeError => "Registry response could not be decoded",

            Self::ExtractionAborted => "Source standard could not be read",
            Self::ExtractionNoStandards => "Source organization has no published coding standards",
            Self::ExtractionSelectionFailed => "No coding standard was selected",
            Self::ExtractionToolUnmapped => "Source tool has no destination equivalent",
            Self::ExtractionToolFetchFailed => "Failed to fetch patterns for a source tool",

            Self::ReplicationContainerCreateFailed => {
                "Failed to create destination coding standard"
            }
            Self::ReplicationDefaultsDisableFailed => "Failed to disable destination default tools",
            Self::ReplicationToolEnableFailed => "Failed to enable destination tool",
            Self::ReplicationBatchFailed => "Pattern batch rejected after all retries",
            Self::ReplicationCancelled => "Migration stopped before completion",
            Self::ReplicationPromoteFailed => "Failed to promote migrated coding standard",
            Self::QualitySettingsFailed => "Failed to migrate quality settings",

            Self::ValidationIncomplete => "Destination did not fully converge",
            Self::ValidationFetchFailed => "Failed to read destination state for validation",
            Self::ValidationStateError => "Illegal destination lifecycle transition",

            Self::InternalSerdeError => "Serialization error",
            Self::InternalLoggingError => "Logging system error",
            Self::InternalPromptError => "Interactive prompt failed",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigMissingCredential => &[
                "Set STDMIG_SOURCE_API_TOKEN, plus STDMIG_DEST_API_TOKEN for another destination",
                "Run 'stdmig config' to see which values were picked up",
            ],
            Self::ConfigMissingEndpoint => &[
                "Set STDMIG_SOURCE_API_URL to the registry API base URL",
                "Set STDMIG_DEST_API_URL when the destination is a different registry",
            ],
            Self::ConfigEnvError => &[
                "Check the variable named in the error message",
                "Run 'stdmig config' to see the parsed values",
            ],
            Self::ConfigFileReadError => &[
                "Check the path passed with --config or STDMIG_CONFIG",
                "Verify file permissions",
            ],
            Self::ConfigFileParseError => &[
                "Validate the TOML syntax of the configuration file",
                "Only [tool_synonyms], [http], [replication] and [validation] tables are read",
            ],
            Self::SnapshotReadError => &[
                "Check that the snapshot path exists and is readable",
                "Re-run 'stdmig extract' to produce a fresh snapshot",
            ],
            Self::SnapshotWriteError => &[
                "Check that the output directory exists and is writable",
            ],
            Self::SnapshotParseError => &[
                "Snapshots must contain coding_standard plus tool_patterns or tools",
                "Run 'stdmig schema' to print the expected shape",
            ],

            Self::RegistryAuthFailed => &[
                "Verify the API token is valid and has not been revoked",
                "Confirm the token belongs to an organization admin",
            ],
            Self::RegistryNotFound => &[
                "Check the provider code and organization name",
                "Verify the base URL points at the registry API root",
            ],
            Self::RegistryClientError => &[
                "Inspect the response body in the debug log (STDMIG_LOG_LEVEL=debug)",
                "Check that the payload matches what the registry expects",
            ],
            Self::RegistryTransportExhausted => &[
                "Check network connectivity to the registry",
                "Raise STDMIG_MAX_RETRIES or STDMIG_HTTP_TIMEOUT_SECS for slow registries",
            ],
            Self::RegistryRateLimited => &[
                "Wait before re-running; the migration is idempotent",
                "Raise STDMIG_WRITE_PAUSE_MS and STDMIG_BACKOFF_BASE_MS",
            ],
            Self::RegistryDecodeError => &[
                "Verify the base URL points at a JSON API, not a web page",
                "Inspect the raw response in the debug log",
            ],

            Self::ExtractionAborted => &[
                "Verify access to the source organization",
                "Re-run extraction once the source registry is reachable",
            ],
            Self::ExtractionNoStandards => &[
                "Publish a coding standard in the source organization",
                "Draft standards are ignored",
            ],
            Self::ExtractionSelectionFailed => &[
                "Pass --standard with an id or name listed by the registry",
                "Use --standard default to pick the default-flagged standard",
            ],
            Self::ExtractionToolUnmapped => &[
                "Add the tool name under [tool_synonyms] in the configuration file",
            ],
            Self::ExtractionToolFetchFailed => &[
                "Re-run extraction; the tool was excluded from this snapshot",
            ],

            Self::ReplicationContainerCreateFailed => &[
                "Verify the destination token can manage coding standards",
                "Check that the snapshot languages exist in the destination",
            ],
            Self::ReplicationDefaultsDisableFailed => &[
                "Re-run with --reuse-standard <id> to continue on the created standard",
            ],
            Self::ReplicationToolEnableFailed => &[
                "Check that the tool is available in the destination registry",
                "Re-run with --reuse-standard <id>; the migration is idempotent",
            ],
            Self::ReplicationBatchFailed => &[
                "Inspect the failed pattern ids in the run report",
                "Re-run with --reuse-standard <id> to retry the remaining patterns",
            ],
            Self::ReplicationCancelled => &[
                "Re-run the migration; already applied changes remain in effect",
            ],
            Self::ReplicationPromoteFailed => &[
                "Promote the standard manually in the destination organization",
            ],
            Self::QualitySettingsFailed => &[
                "Check that the repository exists in the destination organization",
                "Inspect the results file for the failing category",
            ],

            Self::ValidationIncomplete => &[
                "Inspect the per-tool table for missing pattern ids",
                "Re-run with --reuse-standard <id> to push the missing patterns again",
            ],
            Self::ValidationFetchFailed => &[
                "Check destination registry availability and re-run validation",
            ],
            Self::ValidationStateError => &["This is likely a bug; please report it"],

            Self::InternalSerdeError => &["This is likely a bug; please report it"],
            Self::InternalLoggingError => &[
                "Check that the STDMIG_LOG_FILE directory is writable",
            ],
            Self::InternalPromptError => &[
                "Run from an interactive terminal or pass --standard explicitly",
            ],
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigMissingCredential,
            Self::ConfigMissingEndpoint,
            Self::ConfigEnvError,
            Self::ConfigFileReadError,
            Self::ConfigFileParseError,
            Self::SnapshotReadError,
            Self::SnapshotWriteError,
            Self::SnapshotParseError,
            Self::RegistryAuthFailed,
            Self::RegistryNotFound,
            Self::RegistryClientError,
            Self::RegistryTransportExhausted,
            Self::RegistryRateLimited,
            Self::RegistryDecodeError,
            Self::ExtractionAborted,
            Self::ExtractionNoStandards,
            Self::ExtractionSelectionFailed,
            Self::ExtractionToolUnmapped,
            Self::ExtractionToolFetchFailed,
            Self::ReplicationContainerCreateFailed,
            Self::ReplicationDefaultsDisableFailed,
            Self::ReplicationToolEnableFailed,
            Self::ReplicationBatchFailed,
            Self::ReplicationCancelled,
            Self::ReplicationPromoteFailed,
            Self::QualitySettingsFailed,
            Self::ValidationIncomplete,
            Self::ValidationFetchFailed,
            Self::ValidationStateError,
            Self::InternalSerdeError,
            Self::InternalLoggingError,
            Self::InternalPromptError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration, credential and file errors (E001-E099)
    Config,
    /// Registry HTTP API errors (E100-E199)
    Registry,
    /// Source extraction errors (E200-E299)
    Extraction,
    /// Destination replication errors (E300-E399)
    Replication,
    /// Convergence validation errors (E400-E499)
    Validation,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Registry => "Registry",
            Self::Extraction => "Extraction",
            Self::Replication => "Replication",
            Self::Validation => "Validation",
            Self::Internal => "Internal",
        }
    }

    /// Returns a short description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Config => "Configuration, credentials and snapshot file issues",
            Self::Registry => "Registry API connectivity and request issues",
            Self::Extraction => "Reading the source coding standard",
            Self::Replication => "Applying configuration to a destination",
            Self::Validation => "Verifying destination convergence",
            Self::Internal => "Internal errors that may indicate bugs",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "MIG-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(
                seen.insert(code.code_number()),
                "duplicate code number {} for {:?}",
                code.code_number(),
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigMissingCredential.code_string(), "MIG-E001");
        assert_eq!(ErrorCode::RegistryAuthFailed.code_string(), "MIG-E100");
        assert_eq!(ErrorCode::InternalPromptError.code_string(), "MIG-E502");
    }

    #[test]
    fn test_lookup_by_code_string() {
        assert_eq!(
            ErrorCode::from_code_string("MIG-E305"),
            Some(ErrorCode::ReplicationPromoteFailed)
        );
        assert_eq!(ErrorCode::from_code_string("MIG-E999"), None);
    }

    #[test]
    fn test_category_ranges() {
        for code in ErrorCode::all() {
            let expected = match code.code_number() {
                1..=99 => ErrorCategory::Config,
                100..=199 => ErrorCategory::Registry,
                200..=299 => ErrorCategory::Extraction,
                300..=399 => ErrorCategory::Replication,
                400..=499 => ErrorCategory::Validation,
                _ => ErrorCategory::Internal,
            };
            assert_eq!(code.category(), expected, "{:?}", code);
        }
    }

    #[test]
    fn test_all_errors_have_message_and_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.message().is_empty(), "{:?} has no message", code);
            assert!(
                !code.remediation().is_empty(),
                "{:?} has no remediation",
                code
            );
        }
    }

    #[test]
    fn test_format_full() {
        let full = ErrorCode::ReplicationBatchFailed.entry().format_full();
        assert!(full.starts_with("[MIG-E303]"));
        assert!(full.contains("Remediation steps:"));
        assert!(full.contains("  1. "));
    }

    #[test]
    fn test_format_brief() {
        let brief = ErrorCode::ValidationIncomplete.entry().format_brief();
        assert_eq!(brief, "[MIG-E400] Destination did not fully converge");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::RegistryRateLimited).unwrap();
        assert_eq!(json, "\"REGISTRY_RATE_LIMITED\"");
        let parsed: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ErrorCode::RegistryRateLimited);
    }

    #[test]
    fn test_display_implementations() {
        assert_eq!(
            ErrorCode::RegistryNotFound.to_string(),
            "MIG-E101: Registry resource not found"
        );
        assert_eq!(ErrorCategory::Validation.to_string(), "Validation");
    }
}
