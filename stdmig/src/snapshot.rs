//! Immutable capture of a source coding standard.
//!
//! `tool_patterns` is keyed by destination tool id: mapping happens once at
//! extraction time so every destination replays the same document.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use schemars::{JsonSchema, schema::RootSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stdmig_common::{ErrorCode, Pattern, PatternRecord, PolicyContainer};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write snapshot {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot JSON: {0}")]
    Parse(String),

    #[error("snapshot has neither `tool_patterns` nor `tools`")]
    UnrecognizedShape,
}

impl SnapshotError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::SnapshotReadError,
            Self::Write { .. } => ErrorCode::SnapshotWriteError,
            Self::Parse(_) | Self::UnrecognizedShape => ErrorCode::SnapshotParseError,
        }
    }
}

/// Enabled patterns of one destination tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotTool {
    pub name: String,
    pub patterns: Vec<Pattern>,
}

impl SnapshotTool {
    pub fn pattern_ids(&self) -> BTreeSet<String> {
        self.patterns.iter().map(|p| p.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    pub coding_standard: PolicyContainer,
    pub tool_patterns: BTreeMap<String, SnapshotTool>,
}

impl Snapshot {
    pub fn new(coding_standard: PolicyContainer) -> Self {
        Self {
            coding_standard,
            tool_patterns: BTreeMap::new(),
        }
    }

    /// Add a tool, dropping repeated pattern ids (first occurrence wins).
    pub fn insert_tool(
        &mut self,
        tool_id: impl Into<String>,
        name: impl Into<String>,
        patterns: Vec<Pattern>,
    ) {
        let tool_id = tool_id.into();
        let name = name.into();
        let patterns = dedupe_patterns(&name, patterns);
        self.tool_patterns
            .insert(tool_id, SnapshotTool { name, patterns });
    }

    pub fn tool_count(&self) -> usize {
        self.tool_patterns.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.tool_patterns.values().map(|t| t.patterns.len()).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Parse(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            tools = self.tool_count(),
            patterns = self.pattern_count(),
            "Snapshot saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let text = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse either the current shape or the older extract shape
    /// `{coding_standard, tools: [{uuid, name, patterns}]}`. Pattern entries
    /// may be flat or wrapped in `patternDefinition`.
    pub fn from_json_str(text: &str) -> Result<Self, SnapshotError> {
        let mut root: Value =
            serde_json::from_str(text).map_err(|e| SnapshotError::Parse(e.to_string()))?;

        let coding_standard: PolicyContainer = serde_json::from_value(
            root.get_mut("coding_standard")
                .map(Value::take)
                .ok_or_else(|| SnapshotError::Parse("missing `coding_standard`".into()))?,
        )
        .map_err(|e| SnapshotError::Parse(format!("coding_standard: {e}")))?;
        let mut snapshot = Snapshot::new(coding_standard);

        if let Some(tools) = root.get_mut("tool_patterns").map(Value::take) {
            let tools: BTreeMap<String, RawTool> = serde_json::from_value(tools)
                .map_err(|e| SnapshotError::Parse(format!("tool_patterns: {e}")))?;
            for (tool_id, tool) in tools {
                let patterns = parse_patterns(&tool_id, tool.patterns)?;
                snapshot.insert_tool(tool_id, tool.name, patterns);
            }
        } else if let Some(tools) = root.get_mut("tools").map(Value::take) {
            let tools: Vec<LegacyTool> = serde_json::from_value(tools)
                .map_err(|e| SnapshotError::Parse(format!("tools: {e}")))?;
            info!(tools = tools.len(), "Converting legacy extract format");
            for tool in tools {
                let patterns = parse_patterns(&tool.uuid, tool.patterns)?;
                snapshot.insert_tool(tool.uuid, tool.name, patterns);
            }
        } else {
            return Err(SnapshotError::UnrecognizedShape);
        }

        Ok(snapshot)
    }
}

/// JSON Schema of the snapshot document.
pub fn snapshot_schema() -> RootSchema {
    schema_for!(Snapshot)
}

#[derive(Debug, Deserialize)]
struct RawTool {
    name: String,
    #[serde(default)]
    patterns: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyTool {
    uuid: String,
    name: String,
    #[serde(default)]
    patterns: Vec<Value>,
}

fn parse_patterns(tool_id: &str, raw: Vec<Value>) -> Result<Vec<Pattern>, SnapshotError> {
    raw.into_iter()
        .map(|value| {
            let parsed = if value.get("patternDefinition").is_some() {
                serde_json::from_value::<PatternRecord>(value).map(Pattern::from)
            } else {
                serde_json::from_value::<Pattern>(value)
            };
            parsed.map_err(|e| SnapshotError::Parse(format!("tool {tool_id}: {e}")))
        })
        .collect()
}

fn dedupe_patterns(tool_name: &str, patterns: Vec<Pattern>) -> Vec<Pattern> {
    let mut seen = HashSet::new();
    let before = patterns.len();
    let unique: Vec<Pattern> = patterns
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect();
    if unique.len() != before {
        warn!(tool = tool_name, dropped = before - unique.len(), "Dropped repeated pattern ids");
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn container() -> PolicyContainer {
        PolicyContainer {
            id: "42".into(),
            name: "Backend".into(),
            languages: BTreeSet::from(["Java".to_string()]),
            is_draft: false,
            is_default: true,
        }
    }

    fn pattern(id: &str) -> Pattern {
        Pattern {
            id: id.into(),
            category: None,
            severity: None,
            enabled: true,
            parameters: Vec::new(),
        }
    }

    #[test]
    fn test_save_and_load_file() {
        let mut snapshot = Snapshot::new(container());
        snapshot.insert_tool("dest-1", "ESLint", vec![pattern("semi"), pattern("quotes")]);
        snapshot.insert_tool("dest-2", "Markdownlint", vec![]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        snapshot.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.tool_count(), 2);
        assert_eq!(loaded.pattern_count(), 2);
    }

    #[test]
    fn test_serialized_top_level_fields() {
        let snapshot = Snapshot::new(container());
        let value = serde_json::to_value(&snapshot).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["coding_standard", "tool_patterns"]);
    }

    #[test]
    fn test_legacy_tools_format() {
        let text = json!({
            "coding_standard": {"id": 7, "name": "Old", "languages": ["Python"]},
            "tools": [
                {
                    "uuid": "t-1",
                    "name": "Pylint",
                    "patterns": [
                        {
                            "patternDefinition": {"id": "C0103", "category": "CodeStyle"},
                            "enabled": true,
                            "parameters": [{"name": "max", "value": 3}]
                        }
                    ]
                },
                {"uuid": "t-2", "name": "Bandit"}
            ]
        })
        .to_string();

        let snapshot = Snapshot::from_json_str(&text).unwrap();
        assert_eq!(snapshot.coding_standard.id, "7");
        let pylint = &snapshot.tool_patterns["t-1"];
        assert_eq!(pylint.patterns[0].id, "C0103");
        assert_eq!(pylint.patterns[0].parameters[0].value, json!(3));
        assert!(snapshot.tool_patterns["t-2"].patterns.is_empty());
    }

    #[test]
    fn test_wrapped_patterns_in_tool_patterns() {
        let text = json!({
            "coding_standard": {"id": "1", "name": "S"},
            "tool_patterns": {
                "u": {
                    "name": "PMD",
                    "patterns": [{"patternDefinition": {"id": "p1"}, "enabled": true}]
                }
            }
        })
        .to_string();
        let snapshot = Snapshot::from_json_str(&text).unwrap();
        assert_eq!(snapshot.tool_patterns["u"].pattern_ids(), BTreeSet::from(["p1".to_string()]));
    }

    #[test]
    fn test_duplicate_pattern_ids_dropped() {
        let mut snapshot = Snapshot::new(container());
        snapshot.insert_tool("t", "PMD", vec![pattern("a"), pattern("b"), pattern("a")]);
        assert_eq!(snapshot.tool_patterns["t"].patterns.len(), 2);
    }

    #[test]
    fn test_unrecognized_shape() {
        let err = Snapshot::from_json_str(r#"{"coding_standard": {"id": "1"}}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::UnrecognizedShape));
        assert_eq!(err.error_code(), ErrorCode::SnapshotParseError);

        let err = Snapshot::from_json_str("not json").unwrap_err();
        assert!(matches!(err, SnapshotError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Snapshot::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::SnapshotReadError);
    }

    #[test]
    fn test_schema_names_both_fields() {
        let schema = serde_json::to_value(snapshot_schema()).unwrap();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("coding_standard"));
        assert!(props.contains_key("tool_patterns"));
    }
}
