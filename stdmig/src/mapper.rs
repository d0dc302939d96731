//! Source tool name to destination tool identity.
//!
//! Tool ids are registry specific, so tools are joined by display name:
//! exact match first, then the synonym table, then the name with its
//! `(deprecated)` marker stripped. Nothing fuzzier than that.

use std::collections::BTreeMap;

use serde::Serialize;
use stdmig_common::CatalogTool;
use tracing::{debug, warn};

const DEPRECATED_MARKER: &str = "(deprecated)";

/// Known renames between registries, source name → destination name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSynonyms {
    table: BTreeMap<String, String>,
}

impl ToolSynonyms {
    /// Renames shipped with the migrator.
    pub fn builtin() -> Self {
        let table = [
            ("JSHint", "JSHint (deprecated)"),
            ("Pylint (Python 3)", "Pylint"),
            ("Sonar C#", "SonarC#"),
            ("Sonar Visual Basic", "SonarVB"),
            ("ESLint (deprecated)", "ESLint"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
        Self { table }
    }

    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Built-ins with `overrides` layered on top.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (from, to) in overrides {
            self.table.insert(from.clone(), to.clone());
        }
        self
    }

    pub fn get(&self, source_name: &str) -> Option<&str> {
        self.table.get(source_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for ToolSynonyms {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Which rule produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Synonym,
    DeprecationStripped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationTool {
    pub id: String,
    pub name: String,
    pub matched_by: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolMapping {
    Mapped(DestinationTool),
    Unmapped,
}

impl ToolMapping {
    pub fn destination(&self) -> Option<&DestinationTool> {
        match self {
            Self::Mapped(tool) => Some(tool),
            Self::Unmapped => None,
        }
    }
}

/// Resolves source tool names against the destination catalog.
#[derive(Debug, Clone)]
pub struct IdentifierMapper {
    by_name: BTreeMap<String, String>,
    synonyms: ToolSynonyms,
}

impl IdentifierMapper {
    pub fn new(destination_catalog: &[CatalogTool], synonyms: ToolSynonyms) -> Self {
        let mut by_name = BTreeMap::new();
        for tool in destination_catalog {
            if by_name.contains_key(&tool.name) {
                warn!(
                    tool = %tool.name,
                    id = %tool.id,
                    "Duplicate destination tool name, keeping first"
                );
                continue;
            }
            by_name.insert(tool.name.clone(), tool.id.clone());
        }
        debug!(tools = by_name.len(), synonyms = synonyms.len(), "Identifier mapper ready");
        Self { by_name, synonyms }
    }

    pub fn map_tool(&self, source_name: &str) -> ToolMapping {
        if let Some(tool) = self.lookup(source_name, MatchKind::Exact) {
            return ToolMapping::Mapped(tool);
        }

        let synonym = self.synonyms.get(source_name);
        if let Some(target) = synonym
            && let Some(tool) = self.lookup(target, MatchKind::Synonym)
        {
            return ToolMapping::Mapped(tool);
        }

        let mut candidates = Vec::with_capacity(2);
        candidates.extend(synonym);
        candidates.push(source_name);
        for candidate in candidates {
            if let Some(stripped) = strip_deprecated(candidate)
                && let Some(tool) = self.lookup(&stripped, MatchKind::DeprecationStripped)
            {
                return ToolMapping::Mapped(tool);
            }
        }

        ToolMapping::Unmapped
    }

    fn lookup(&self, name: &str, matched_by: MatchKind) -> Option<DestinationTool> {
        self.by_name.get(name).map(|id| DestinationTool {
            id: id.clone(),
            name: name.to_string(),
            matched_by,
        })
    }
}

fn strip_deprecated(name: &str) -> Option<String> {
    if !name.contains(DEPRECATED_MARKER) {
        return None;
    }
    let stripped = name.replace(DEPRECATED_MARKER, "");
    let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (!stripped.is_empty()).then_some(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(names: &[(&str, &str)]) -> Vec<CatalogTool> {
        names
            .iter()
            .map(|(id, name)| CatalogTool {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_exact_match_wins() {
        let mapper = IdentifierMapper::new(
            &catalog(&[("u-1", "ESLint"), ("u-2", "PMD")]),
            ToolSynonyms::builtin(),
        );
        let mapping = mapper.map_tool("PMD");
        assert_eq!(
            mapping,
            ToolMapping::Mapped(DestinationTool {
                id: "u-2".into(),
                name: "PMD".into(),
                matched_by: MatchKind::Exact,
            })
        );
    }

    #[test]
    fn test_synonym_lookup() {
        let mapper =
            IdentifierMapper::new(&catalog(&[("u-9", "SonarC#")]), ToolSynonyms::builtin());
        let tool = mapper.map_tool("Sonar C#");
        let tool = tool.destination().unwrap();
        assert_eq!(tool.id, "u-9");
        assert_eq!(tool.matched_by, MatchKind::Synonym);
    }

    #[test]
    fn test_exact_before_synonym_and_stripped_marker() {
        // An exact name beats the "JSHint (deprecated)" synonym.
        let mapper = IdentifierMapper::new(&catalog(&[("u-3", "JSHint")]), ToolSynonyms::builtin());
        let tool = mapper.map_tool("JSHint");
        assert_eq!(tool.destination().unwrap().matched_by, MatchKind::Exact);

        let mapper = IdentifierMapper::new(&catalog(&[("u-4", "TSLint")]), ToolSynonyms::empty());
        let tool = mapper.map_tool("TSLint (deprecated)");
        let tool = tool.destination().unwrap();
        assert_eq!(tool.id, "u-4");
        assert_eq!(tool.matched_by, MatchKind::DeprecationStripped);
    }

    #[test]
    fn test_unknown_tool_unmapped() {
        let mapper = IdentifierMapper::new(&catalog(&[("u-1", "ESLint")]), ToolSynonyms::builtin());
        assert_eq!(mapper.map_tool("Unknown Analyzer"), ToolMapping::Unmapped);
        assert_eq!(mapper.map_tool("eslint"), ToolMapping::Unmapped);
    }

    #[test]
    fn test_overrides_replace_builtin() {
        let overrides = BTreeMap::from([("Sonar C#".to_string(), "Roslyn".to_string())]);
        let synonyms = ToolSynonyms::builtin().with_overrides(&overrides);
        assert_eq!(synonyms.get("Sonar C#"), Some("Roslyn"));
        assert_eq!(synonyms.get("Sonar Visual Basic"), Some("SonarVB"));

        let mapper = IdentifierMapper::new(&catalog(&[("u-5", "Roslyn")]), synonyms);
        assert_eq!(mapper.map_tool("Sonar C#").destination().unwrap().id, "u-5");
    }

    #[test]
    fn test_duplicate_destination_names_keep_first() {
        let mapper = IdentifierMapper::new(
            &catalog(&[("first", "Pylint"), ("second", "Pylint")]),
            ToolSynonyms::empty(),
        );
        assert_eq!(mapper.map_tool("Pylint").destination().unwrap().id, "first");
    }

    #[test]
    fn test_strip_deprecated_normalizes_spacing() {
        assert_eq!(strip_deprecated("ESLint (deprecated)").as_deref(), Some("ESLint"));
        assert_eq!(strip_deprecated("ESLint"), None);
        assert_eq!(strip_deprecated("(deprecated)"), None);
    }
}
