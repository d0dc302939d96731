//! Registry payload models shared by the extractor, replicator and validator.
//!
//! Wire payloads are camelCase JSON with loosely typed identifiers; these
//! types normalize them once at the boundary so the rest of the pipeline
//! never deals with raw maps.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Organization address within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgRef {
    /// Git provider code (e.g. `gh`, `gl`, `bb`).
    pub provider: String,
    /// Organization name as known by the registry.
    pub name: String,
}

impl OrgRef {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for OrgRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.name)
    }
}

/// Accepts numeric or string identifiers and normalizes them to strings.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Str(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Int(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

/// A coding standard: named bundle of tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContainer {
    #[serde(deserialize_with = "id_string")]
    #[schemars(with = "String")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub languages: BTreeSet<String>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_default: bool,
}

/// Tool state inside a coding standard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(rename = "uuid", deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "isEnabled", default)]
    pub enabled: bool,
}

/// Registry-wide tool catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTool {
    #[serde(rename = "uuid", deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
}

/// Named pattern parameter. Values are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatternParameter {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A single rule inside a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pattern {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: Vec<PatternParameter>,
}

impl Pattern {
    /// Update entry that enables this pattern with its parameters.
    pub fn enable_update(&self) -> PatternUpdate {
        PatternUpdate {
            id: self.id.clone(),
            enabled: true,
            parameters: self.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatternDefinition {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    level: Option<String>,
}

/// Wire shape of a pattern listing entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRecord {
    pattern_definition: PatternDefinition,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    parameters: Vec<PatternParameter>,
}

impl From<PatternRecord> for Pattern {
    fn from(record: PatternRecord) -> Self {
        Self {
            id: record.pattern_definition.id,
            category: record.pattern_definition.category,
            severity: record.pattern_definition.level,
            enabled: record.enabled,
            parameters: record.parameters,
        }
    }
}

/// Pattern entry of a tool update body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternUpdate {
    pub id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<PatternParameter>,
}

impl PatternUpdate {
    pub fn disable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: false,
            parameters: Vec::new(),
        }
    }
}

/// Partial update body for a tool: `{enabled, patterns}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPatch {
    pub enabled: bool,
    pub patterns: Vec<PatternUpdate>,
}

impl ToolPatch {
    /// Activate the tool without touching its patterns.
    pub fn enable_tool() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
        }
    }

    pub fn disable_tool() -> Self {
        Self {
            enabled: false,
            patterns: Vec::new(),
        }
    }

    /// Pattern changes on an enabled tool.
    pub fn patterns(patterns: Vec<PatternUpdate>) -> Self {
        Self {
            enabled: true,
            patterns,
        }
    }
}

/// Repository listing entry; only the name is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
}

/// Repository quality settings categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingsKind {
    Repository,
    Commits,
    PullRequests,
}

impl SettingsKind {
    pub const ALL: [SettingsKind; 3] = [
        SettingsKind::Repository,
        SettingsKind::Commits,
        SettingsKind::PullRequests,
    ];

    /// Path segment used by the registry.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Commits => "commits",
            Self::PullRequests => "pull-requests",
        }
    }
}

impl fmt::Display for SettingsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_container_accepts_numeric_id() {
        let container: PolicyContainer = serde_json::from_value(json!({
            "id": 4711,
            "name": "Backend",
            "languages": ["Java", "Kotlin"],
            "isDraft": false,
            "isDefault": true
        }))
        .unwrap();
        assert_eq!(container.id, "4711");
        assert!(container.is_default);
        assert!(container.languages.contains("Kotlin"));
    }

    #[test]
    fn test_policy_container_missing_optional_fields() {
        let container: PolicyContainer =
            serde_json::from_value(json!({"id": "abc", "name": "x"})).unwrap();
        assert!(!container.is_draft);
        assert!(container.languages.is_empty());
    }

    #[test]
    fn test_tool_config_wire_names() {
        let tool: ToolConfig =
            serde_json::from_value(json!({"uuid": "t-1", "name": "ESLint", "isEnabled": true}))
                .unwrap();
        assert_eq!(tool.id, "t-1");
        assert!(tool.enabled);

        let bare: ToolConfig = serde_json::from_value(json!({"uuid": "t-2"})).unwrap();
        assert!(!bare.enabled);
        assert!(bare.name.is_none());
    }

    #[test]
    fn test_pattern_record_flattens_definition() {
        let record: PatternRecord = serde_json::from_value(json!({
            "patternDefinition": {"id": "no-eval", "category": "Security", "level": "Error"},
            "enabled": true,
            "parameters": [{"name": "max", "value": "10"}]
        }))
        .unwrap();
        let pattern = Pattern::from(record);
        assert_eq!(pattern.id, "no-eval");
        assert_eq!(pattern.category.as_deref(), Some("Security"));
        assert_eq!(pattern.severity.as_deref(), Some("Error"));
        assert_eq!(pattern.parameters.len(), 1);
    }

    #[test]
    fn test_tool_patch_omits_empty_parameters() {
        let patch = ToolPatch::patterns(vec![PatternUpdate::disable("p1")]);
        let body = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            body,
            json!({"enabled": true, "patterns": [{"id": "p1", "enabled": false}]})
        );
    }

    #[test]
    fn test_settings_kind_paths() {
        let paths: Vec<&str> = SettingsKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(paths, ["repository", "commits", "pull-requests"]);
    }
}
