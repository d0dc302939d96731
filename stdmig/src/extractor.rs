//! Reads the selected source coding standard into a [`Snapshot`].

use std::collections::BTreeMap;

use serde::Serialize;
use stdmig_common::{ErrorCode, OrgRef, PolicyContainer, ToolConfig};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mapper::{IdentifierMapper, ToolMapping};
use crate::registry::{RegistryClient, RegistryError, Transport};
use crate::selector::{SelectionError, Selector};
use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to {stage} in {org}: {source}")]
    Aborted {
        org: OrgRef,
        stage: &'static str,
        #[source]
        source: RegistryError,
    },

    #[error("{org} has no published coding standards")]
    NoStandards { org: OrgRef },

    #[error("coding standard selection failed: {0}")]
    Selection(#[from] SelectionError),
}

impl ExtractionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Aborted { .. } => ErrorCode::ExtractionAborted,
            Self::NoStandards { .. } => ErrorCode::ExtractionNoStandards,
            Self::Selection(err) => err.error_code(),
        }
    }
}

/// Why a source tool is absent from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    Unmapped,
    FetchFailed { error: String },
}

impl ExclusionReason {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unmapped => ErrorCode::ExtractionToolUnmapped,
            Self::FetchFailed { .. } => ErrorCode::ExtractionToolFetchFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedTool {
    pub source_id: String,
    pub name: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Snapshot plus the tools that could not be carried over.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub snapshot: Snapshot,
    pub excluded: Vec<ExcludedTool>,
}

pub struct Extractor<'a, T> {
    source: &'a RegistryClient<T>,
    mapper: &'a IdentifierMapper,
}

impl<'a, T: Transport> Extractor<'a, T> {
    pub fn new(source: &'a RegistryClient<T>, mapper: &'a IdentifierMapper) -> Self {
        Self { source, mapper }
    }

    pub async fn extract<S>(
        &self,
        org: &OrgRef,
        selector: &S,
    ) -> Result<Extraction, ExtractionError>
    where
        S: Selector<PolicyContainer> + ?Sized,
    {
        let standards = self
            .source
            .list_standards(org)
            .await
            .map_err(|source| ExtractionError::Aborted {
                org: org.clone(),
                stage: "list coding standards",
                source,
            })?;
        let candidates: Vec<PolicyContainer> =
            standards.into_iter().filter(|s| !s.is_draft).collect();
        if candidates.is_empty() {
            return Err(ExtractionError::NoStandards { org: org.clone() });
        }

        let index = selector.select(&candidates)?;
        let standard = candidates[index].clone();
        info!(org = %org, standard = %standard.name, id = %standard.id, "Selected coding standard");

        let tools = self
            .source
            .list_tools(org, &standard.id)
            .await
            .map_err(|source| ExtractionError::Aborted {
                org: org.clone(),
                stage: "list tools",
                source,
            })?;
        let enabled: Vec<ToolConfig> = tools.into_iter().filter(|t| t.enabled).collect();
        info!(org = %org, tools = enabled.len(), "Found enabled tools");

        let names = self.resolve_names(&enabled).await;
        let mut snapshot = Snapshot::new(standard.clone());
        let mut excluded = Vec::new();

        for tool in &enabled {
            let name = names
                .get(&tool.id)
                .cloned()
                .unwrap_or_else(|| format!("Tool_{}", tool.id));

            let destination = match self.mapper.map_tool(&name) {
                ToolMapping::Mapped(destination) => destination,
                ToolMapping::Unmapped => {
                    warn!(
                        tool = %name,
                        source_id = %tool.id,
                        "No destination tool matches, excluding"
                    );
                    excluded.push(ExcludedTool {
                        source_id: tool.id.clone(),
                        name,
                        reason: ExclusionReason::Unmapped,
                    });
                    continue;
                }
            };

            let patterns = match self
                .source
                .enabled_patterns(org, &standard.id, &tool.id, None)
                .await
            {
                Ok(patterns) => patterns,
                Err(err) => {
                    warn!(tool = %name, error = %err, "Failed to fetch patterns, excluding");
                    excluded.push(ExcludedTool {
                        source_id: tool.id.clone(),
                        name,
                        reason: ExclusionReason::FetchFailed {
                            error: err.to_string(),
                        },
                    });
                    continue;
                }
            };

            debug!(
                tool = %name,
                destination = %destination.name,
                matched_by = ?destination.matched_by,
                patterns = patterns.len(),
                "Captured tool"
            );

            let patterns = match snapshot.tool_patterns.remove(&destination.id) {
                Some(existing) => {
                    warn!(
                        destination = %destination.name,
                        "Several source tools map to one destination tool, merging"
                    );
                    existing.patterns.into_iter().chain(patterns).collect()
                }
                None => patterns,
            };
            snapshot.insert_tool(destination.id, destination.name, patterns);
        }

        info!(
            standard = %standard.name,
            tools = snapshot.tool_count(),
            patterns = snapshot.pattern_count(),
            excluded = excluded.len(),
            "Extraction complete"
        );
        Ok(Extraction { snapshot, excluded })
    }

    /// Display names by source tool id: payload name, else the source
    /// catalog. The catalog is only fetched when a payload lacks a name.
    async fn resolve_names(&self, tools: &[ToolConfig]) -> BTreeMap<String, String> {
        let mut names: BTreeMap<String, String> = tools
            .iter()
            .filter_map(|t| t.name.clone().map(|n| (t.id.clone(), n)))
            .collect();
        if names.len() == tools.len() {
            return names;
        }

        match self.source.tool_catalog().await {
            Ok(catalog) => {
                for entry in catalog {
                    if tools.iter().any(|t| t.id == entry.id) {
                        names.entry(entry.id).or_insert(entry.name);
                    }
                }
            }
            Err(err) => warn!(error = %err, "Failed to fetch source tool catalog"),
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::ToolSynonyms;
    use crate::registry::mock::pattern;
    use crate::registry::{Method, MockRegistry};
    use crate::selector::{DefaultFlagSelector, ExplicitSelector};
    use stdmig_common::CatalogTool;
    use stdmig_common::config::HttpSettings;

    fn mapper(names: &[(&str, &str)]) -> IdentifierMapper {
        let catalog: Vec<CatalogTool> = names
            .iter()
            .map(|(id, name)| CatalogTool {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        IdentifierMapper::new(&catalog, ToolSynonyms::builtin())
    }

    fn source() -> (MockRegistry, OrgRef) {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "source");
        mock.add_default_standard(&org, "cs-1", "Backend", &["Java"]);
        mock.add_draft_standard(&org, "cs-draft", "Draft");
        (mock, org)
    }

    #[tokio::test]
    async fn test_extracts_mapped_tools_only() {
        let (mock, org) = source();
        mock.set_tool(
            &org,
            "cs-1",
            "src-eslint",
            Some("ESLint"),
            true,
            vec![pattern("semi", true), pattern("quotes", false)],
        );
        mock.set_tool(
            &org,
            "cs-1",
            "src-odd",
            Some("Odd Analyzer"),
            true,
            vec![pattern("x", true)],
        );
        mock.set_tool(&org, "cs-1", "src-off", Some("PMD"), false, vec![pattern("y", true)]);

        let client =
            RegistryClient::with_transport("source", mock.clone(), HttpSettings::immediate());
        let mapper = mapper(&[("dst-eslint", "ESLint"), ("dst-pmd", "PMD")]);
        let extraction = Extractor::new(&client, &mapper)
            .extract(&org, &DefaultFlagSelector)
            .await
            .unwrap();

        let snapshot = extraction.snapshot;
        assert_eq!(snapshot.coding_standard.id, "cs-1");
        assert_eq!(snapshot.tool_patterns.len(), 1);
        let eslint = &snapshot.tool_patterns["dst-eslint"];
        assert_eq!(eslint.pattern_ids().into_iter().collect::<Vec<_>>(), ["semi"]);

        assert_eq!(extraction.excluded.len(), 1);
        assert_eq!(extraction.excluded[0].name, "Odd Analyzer");
        assert_eq!(extraction.excluded[0].reason, ExclusionReason::Unmapped);
    }

    #[tokio::test]
    async fn test_zero_pattern_tool_kept() {
        let (mock, org) = source();
        mock.set_tool(&org, "cs-1", "src-pmd", Some("PMD"), true, vec![pattern("a", false)]);

        let client = RegistryClient::with_transport("source", mock, HttpSettings::immediate());
        let mapper = mapper(&[("dst-pmd", "PMD")]);
        let extraction = Extractor::new(&client, &mapper)
            .extract(&org, &ExplicitSelector::new("Backend"))
            .await
            .unwrap();
        assert!(extraction.snapshot.tool_patterns["dst-pmd"].patterns.is_empty());
    }

    #[tokio::test]
    async fn test_pattern_fetch_failure_excludes_tool() {
        let (mock, org) = source();
        mock.set_tool(&org, "cs-1", "src-pmd", Some("PMD"), true, vec![pattern("a", true)]);
        mock.set_tool(&org, "cs-1", "src-eslint", Some("ESLint"), true, vec![pattern("b", true)]);
        mock.fail_requests(
            Method::Get,
            "/organizations/gh/source/coding-standards/cs-1/tools/src-pmd/patterns",
            403,
            1,
        );

        let client = RegistryClient::with_transport("source", mock, HttpSettings::immediate());
        let mapper = mapper(&[("dst-pmd", "PMD"), ("dst-eslint", "ESLint")]);
        let extraction = Extractor::new(&client, &mapper)
            .extract(&org, &DefaultFlagSelector)
            .await
            .unwrap();

        assert_eq!(extraction.snapshot.tool_count(), 1);
        assert!(matches!(
            extraction.excluded[0].reason,
            ExclusionReason::FetchFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_name_resolved_from_catalog() {
        let (mock, org) = source();
        mock.add_catalog_tool("src-pylint", "Pylint (Python 3)");
        mock.set_tool(&org, "cs-1", "src-pylint", None, true, vec![pattern("C0103", true)]);
        mock.set_tool(&org, "cs-1", "src-ghost", None, true, vec![]);

        let client = RegistryClient::with_transport("source", mock, HttpSettings::immediate());
        let mapper = mapper(&[("dst-pylint", "Pylint")]);
        let extraction = Extractor::new(&client, &mapper)
            .extract(&org, &DefaultFlagSelector)
            .await
            .unwrap();

        assert!(extraction.snapshot.tool_patterns.contains_key("dst-pylint"));
        assert_eq!(extraction.excluded[0].name, "Tool_src-ghost");
    }

    #[tokio::test]
    async fn test_only_drafts_means_no_standards() {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "empty");
        mock.add_draft_standard(&org, "d", "Draft");

        let client = RegistryClient::with_transport("source", mock, HttpSettings::immediate());
        let mapper = mapper(&[]);
        let err = Extractor::new(&client, &mapper)
            .extract(&org, &DefaultFlagSelector)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ExtractionNoStandards);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts() {
        let (mock, org) = source();
        mock.fail_requests(Method::Get, "/organizations/gh/source/coding-standards", 401, 1);

        let client = RegistryClient::with_transport("source", mock, HttpSettings::immediate());
        let mapper = mapper(&[]);
        let err = Extractor::new(&client, &mapper)
            .extract(&org, &DefaultFlagSelector)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Aborted { stage: "list coding standards", .. }));
    }

    #[tokio::test]
    async fn test_selection_failure_surfaces() {
        let (mock, org) = source();
        let client = RegistryClient::with_transport("source", mock, HttpSettings::immediate());
        let mapper = mapper(&[]);
        let err = Extractor::new(&client, &mapper)
            .extract(&org, &ExplicitSelector::new("Nope"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ExtractionSelectionFailed);
    }
}
