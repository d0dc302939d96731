//! Checks a destination standard against the snapshot and repairs the gap.
//!
//! Comparison is by pattern id sets. Missing ids are re-pushed through the
//! replicator; extra ids are only reported. The number of passes is bounded
//! by the destination lifecycle.

use std::collections::BTreeSet;

use serde::Serialize;
use stdmig_common::config::ValidationSettings;
use stdmig_common::util::preview_ids;
use stdmig_common::{ErrorCode, OrgRef, PatternUpdate};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lifecycle::{DestinationLifecycle, DestinationState, LifecycleError};
use crate::registry::{RegistryError, Transport};
use crate::replicator::{ReplicationError, Replicator};
use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read tools of {org} standard {container_id}: {source}")]
    Fetch {
        org: OrgRef,
        container_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("repair of {org} interrupted: {source}")]
    Repair {
        org: OrgRef,
        #[source]
        source: ReplicationError,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ValidationError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Fetch { .. } => ErrorCode::ValidationFetchFailed,
            Self::Repair { source, .. } => source.error_code(),
            Self::Lifecycle(err) => err.error_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationStatus {
    Converged,
    PartiallyConverged { attempts: u32 },
}

/// Comparison of one snapshot tool against the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolValidation {
    pub tool_id: String,
    pub name: String,
    pub tool_enabled: bool,
    pub expected: usize,
    pub observed: usize,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

impl ToolValidation {
    pub fn is_match(&self) -> bool {
        self.tool_enabled && self.missing.is_empty() && self.fetch_error.is_none()
    }
}

/// Outcome of validating one destination, after all repair passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    pub container_id: String,
    pub tools: Vec<ToolValidation>,
    pub only_in_snapshot: Vec<String>,
    pub only_in_destination: Vec<String>,
    pub unchecked: Vec<String>,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: ValidationStatus,
}

impl MigrationResult {
    pub fn is_converged(&self) -> bool {
        self.status == ValidationStatus::Converged
    }

    pub fn mismatched(&self) -> impl Iterator<Item = &ToolValidation> {
        self.tools.iter().filter(|t| !t.is_match())
    }

    pub fn missing_count(&self) -> usize {
        self.tools.iter().map(|t| t.missing.len()).sum()
    }
}

/// Result of a single comparison pass.
struct Pass {
    tools: Vec<ToolValidation>,
    only_in_snapshot: Vec<String>,
    only_in_destination: Vec<String>,
    unchecked: Vec<String>,
}

impl Pass {
    fn converged(&self) -> bool {
        self.tools.iter().all(ToolValidation::is_match)
    }
}

pub struct Validator<'a, T> {
    replicator: &'a Replicator<'a, T>,
    settings: &'a ValidationSettings,
}

impl<'a, T: Transport> Validator<'a, T> {
    pub fn new(replicator: &'a Replicator<'a, T>, settings: &'a ValidationSettings) -> Self {
        Self {
            replicator,
            settings,
        }
    }

    /// Compare, repair and compare again until converged or out of passes.
    pub async fn validate(
        &self,
        snapshot: &Snapshot,
        org: &OrgRef,
        container_id: &str,
        lifecycle: &mut DestinationLifecycle,
    ) -> Result<MigrationResult, ValidationError> {
        let mut attempt = 1;
        loop {
            lifecycle.transition(DestinationState::Validating, &format!("attempt {attempt}"))?;
            let pass = match self.compare(snapshot, org, container_id).await {
                Ok(pass) => pass,
                Err(err) => {
                    lifecycle.transition(DestinationState::Failed, "destination unreadable")?;
                    return Err(err);
                }
            };

            if pass.converged() {
                lifecycle.transition(
                    DestinationState::Converged,
                    &format!("matched on attempt {attempt}"),
                )?;
                info!(org = %org, attempt, "Destination converged");
                return Ok(result(container_id, pass, attempt, ValidationStatus::Converged));
            }

            let mismatched = pass.tools.iter().filter(|t| !t.is_match()).count();
            if !lifecycle.can_repair() {
                let status = ValidationStatus::PartiallyConverged { attempts: attempt };
                lifecycle.transition(
                    DestinationState::PartiallyConverged,
                    &format!("{mismatched} tools still differ after {attempt} attempts"),
                )?;
                for tool in pass.tools.iter().filter(|t| !t.is_match()) {
                    warn!(
                        org = %org,
                        tool = %tool.name,
                        missing = %preview_ids(&tool.missing, 5),
                        "Patterns still missing"
                    );
                }
                warn!(
                    org = %org,
                    attempts = attempt,
                    mismatched,
                    "Destination partially converged"
                );
                return Ok(result(container_id, pass, attempt, status));
            }

            info!(org = %org, attempt, mismatched, "Repairing mismatched tools");
            lifecycle.transition(
                DestinationState::PatternsReplicated,
                &format!("repair after attempt {attempt}"),
            )?;
            self.repair(snapshot, org, container_id, &pass).await?;
            attempt += 1;
        }
    }

    async fn compare(
        &self,
        snapshot: &Snapshot,
        org: &OrgRef,
        container_id: &str,
    ) -> Result<Pass, ValidationError> {
        let client = self.replicator.client();
        let destination = client
            .list_tools(org, container_id)
            .await
            .map_err(|source| ValidationError::Fetch {
                org: org.clone(),
                container_id: container_id.to_string(),
                source,
            })?;

        let enabled: BTreeSet<String> = destination
            .into_iter()
            .filter(|t| t.enabled)
            .map(|t| t.id)
            .collect();
        let expected_tools: BTreeSet<String> = snapshot.tool_patterns.keys().cloned().collect();
        let only_in_snapshot: Vec<String> = expected_tools.difference(&enabled).cloned().collect();
        let only_in_destination: Vec<String> =
            enabled.difference(&expected_tools).cloned().collect();
        if !only_in_destination.is_empty() {
            info!(org = %org, tools = ?only_in_destination, "Destination has extra enabled tools");
        }

        let sample = self.settings.tool_sample.unwrap_or(usize::MAX);
        let mut tools = Vec::new();
        let mut unchecked = Vec::new();

        for (index, (tool_id, tool)) in snapshot.tool_patterns.iter().enumerate() {
            if index >= sample {
                unchecked.push(tool_id.clone());
                continue;
            }
            let expected = tool.pattern_ids();
            let tool_enabled = enabled.contains(tool_id);

            let (observed, fetch_error) = if tool_enabled {
                match client
                    .pattern_listing(org, container_id, tool_id, self.settings.page_cap)
                    .await
                {
                    Ok(listing) if listing.truncated => {
                        warn!(
                            tool = %tool.name,
                            read = listing.items.len(),
                            "Pattern listing cut by the page cap, leaving tool unchecked"
                        );
                        unchecked.push(tool_id.clone());
                        continue;
                    }
                    Ok(listing) => (
                        listing
                            .items
                            .into_iter()
                            .filter(|p| p.enabled)
                            .map(|p| p.id)
                            .collect::<BTreeSet<String>>(),
                        None,
                    ),
                    Err(err) => {
                        warn!(
                            tool = %tool.name,
                            error = %err,
                            "Failed to read destination patterns"
                        );
                        (BTreeSet::new(), Some(err.to_string()))
                    }
                }
            } else {
                (BTreeSet::new(), None)
            };

            let validation = ToolValidation {
                tool_id: tool_id.clone(),
                name: tool.name.clone(),
                tool_enabled,
                expected: expected.len(),
                observed: observed.len(),
                matched: expected.intersection(&observed).cloned().collect(),
                missing: expected.difference(&observed).cloned().collect(),
                extra: observed.difference(&expected).cloned().collect(),
                fetch_error,
            };
            if !validation.extra.is_empty() {
                info!(
                    tool = %tool.name,
                    extra = validation.extra.len(),
                    "Destination has extra patterns, leaving them"
                );
            }
            debug!(
                tool = %tool.name,
                expected = validation.expected,
                observed = validation.observed,
                missing = validation.missing.len(),
                "Compared tool"
            );
            tools.push(validation);
        }

        if !unchecked.is_empty() {
            debug!(org = %org, unchecked = unchecked.len(), "Some tools were not checked");
        }

        Ok(Pass {
            tools,
            only_in_snapshot,
            only_in_destination,
            unchecked,
        })
    }

    /// Re-enable absent tools, then push only the missing pattern ids.
    async fn repair(
        &self,
        snapshot: &Snapshot,
        org: &OrgRef,
        container_id: &str,
        pass: &Pass,
    ) -> Result<(), ValidationError> {
        let repair_cap = self.settings.repair_cap.unwrap_or(usize::MAX);

        for tool in pass.tools.iter().filter(|t| !t.is_match()) {
            let Some(snapshot_tool) = snapshot.tool_patterns.get(&tool.tool_id) else {
                continue;
            };

            if !tool.tool_enabled
                && let Err(err) = self
                    .replicator
                    .activate_tool(org, container_id, &tool.tool_id)
                    .await
            {
                warn!(tool = %tool.name, error = %err, "Failed to re-enable tool");
                continue;
            }

            let missing: BTreeSet<&str> = tool.missing.iter().map(String::as_str).collect();
            let updates: Vec<PatternUpdate> = snapshot_tool
                .patterns
                .iter()
                .filter(|p| missing.contains(p.id.as_str()))
                .take(repair_cap)
                .map(|p| p.enable_update())
                .collect();
            if updates.is_empty() {
                continue;
            }

            debug!(tool = %tool.name, patterns = updates.len(), "Re-pushing missing patterns");
            let outcome = self
                .replicator
                .push_patterns(org, container_id, &tool.tool_id, updates)
                .await
                .map_err(|source| ValidationError::Repair {
                    org: org.clone(),
                    source,
                })?;
            if !outcome.is_complete() {
                warn!(
                    tool = %tool.name,
                    failed = outcome.failed_ids.len(),
                    "Repair batches rejected"
                );
            }
        }
        Ok(())
    }
}

fn result(
    container_id: &str,
    pass: Pass,
    attempts: u32,
    status: ValidationStatus,
) -> MigrationResult {
    MigrationResult {
        container_id: container_id.to_string(),
        tools: pass.tools,
        only_in_snapshot: pass.only_in_snapshot,
        only_in_destination: pass.only_in_destination,
        unchecked: pass.unchecked,
        attempts,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::mock::pattern;
    use crate::registry::{MockRegistry, RegistryClient};
    use crate::replicator::StopSignal;
    use stdmig_common::config::{HttpSettings, ReplicationSettings};
    use stdmig_common::{Pattern, PolicyContainer};

    fn snapshot(tool_id: &str, name: &str, ids: &[&str]) -> Snapshot {
        let mut snapshot = Snapshot::new(PolicyContainer {
            id: "src".into(),
            name: "Source".into(),
            languages: BTreeSet::from(["Java".to_string()]),
            is_draft: false,
            is_default: false,
        });
        let patterns: Vec<Pattern> = ids.iter().map(|id| pattern(id, true)).collect();
        snapshot.insert_tool(tool_id, name, patterns);
        snapshot
    }

    fn destination(mock: &MockRegistry, tool_id: &str, ids: &[&str]) -> OrgRef {
        let org = OrgRef::new("gh", "dest");
        mock.add_standard(&org, "cs", "Migrated", &["Java"]);
        let patterns = ids.iter().map(|id| pattern(id, true)).collect();
        mock.set_tool(&org, "cs", tool_id, None, true, patterns);
        org
    }

    /// Lifecycle already past replication, as the engine hands it over.
    fn replicated_lifecycle(max_attempts: u32) -> DestinationLifecycle {
        let mut lifecycle = DestinationLifecycle::new("gh/dest", max_attempts);
        for state in [
            DestinationState::Created,
            DestinationState::ToolsDisabled,
            DestinationState::PatternsReplicated,
        ] {
            lifecycle.transition(state, "setup").unwrap();
        }
        lifecycle
    }

    #[tokio::test]
    async fn test_exact_match_converges_first_pass() {
        let mock = MockRegistry::new();
        let org = destination(&mock, "x", &["p1", "p2", "p3"]);
        let client = RegistryClient::with_transport("dest", mock, HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings::default();
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "x-tool", &["p3", "p1", "p2"]), &org, "cs", &mut lifecycle)
            .await
            .unwrap();

        assert!(result.is_converged());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.tools[0].expected, 3);
        assert_eq!(result.tools[0].observed, 3);
        assert_eq!(lifecycle.state(), DestinationState::Converged);
    }

    #[tokio::test]
    async fn test_missing_patterns_repaired() {
        let mock = MockRegistry::new();
        let org = destination(&mock, "x", &["p1"]);
        let client =
            RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings::default();
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "x-tool", &["p1", "p2"]), &org, "cs", &mut lifecycle)
            .await
            .unwrap();

        assert!(result.is_converged());
        assert_eq!(result.attempts, 2);
        assert_eq!(lifecycle.repairs(), 1);
        assert!(mock.enabled_pattern_ids(&org, "cs", "x").contains("p2"));
    }

    #[tokio::test]
    async fn test_disabled_tool_is_reenabled() {
        let mock = MockRegistry::new();
        let org = destination(&mock, "x", &[]);
        mock.set_tool(&org, "cs", "x", None, false, vec![]);
        let client =
            RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings::default();
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "x-tool", &["p1"]), &org, "cs", &mut lifecycle)
            .await
            .unwrap();

        assert!(result.is_converged());
        assert!(result.only_in_snapshot.is_empty());
        assert!(mock.tool_enabled(&org, "cs", "x"));
    }

    #[tokio::test]
    async fn test_extra_patterns_reported_not_removed() {
        let mock = MockRegistry::new();
        let org = destination(&mock, "x", &["p1", "stray"]);
        let client =
            RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings::default();
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "x-tool", &["p1"]), &org, "cs", &mut lifecycle)
            .await
            .unwrap();

        assert!(result.is_converged());
        assert_eq!(result.tools[0].extra, ["stray"]);
        assert!(mock.enabled_pattern_ids(&org, "cs", "x").contains("stray"));
    }

    #[tokio::test]
    async fn test_tool_sample_limits_checks() {
        let mock = MockRegistry::new();
        let org = destination(&mock, "a", &["p"]);
        mock.set_tool(&org, "cs", "b", None, true, vec![pattern("q", true)]);
        let client = RegistryClient::with_transport("dest", mock, HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings {
            tool_sample: Some(1),
            ..ValidationSettings::default()
        };
        let mut snapshot = snapshot("a", "A", &["p"]);
        snapshot.insert_tool("b", "B", vec![pattern("q", true)]);
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot, &org, "cs", &mut lifecycle)
            .await
            .unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.unchecked, ["b"]);
    }

    #[tokio::test]
    async fn test_patterns_spread_over_pages_converge() {
        let mock = MockRegistry::new().with_page_size(2);
        let ids = ["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
        let org = destination(&mock, "x", &ids);
        let client =
            RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings::default();
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "x-tool", &ids), &org, "cs", &mut lifecycle)
            .await
            .unwrap();

        assert!(result.is_converged());
        assert_eq!(result.attempts, 1);
        assert_eq!((result.tools[0].expected, result.tools[0].observed), (7, 7));
        assert!(result.tools[0].missing.is_empty());
        assert_eq!(
            mock.count_calls(
                crate::registry::Method::Get,
                "/organizations/gh/dest/coding-standards/cs/tools/x/patterns"
            ),
            4
        );
    }

    #[tokio::test]
    async fn test_page_capped_listing_is_not_diffed() {
        let mock = MockRegistry::new().with_page_size(1);
        let org = destination(&mock, "x", &["p1", "p2", "p3"]);
        let client =
            RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings {
            page_cap: Some(2),
            ..ValidationSettings::default()
        };
        let mut lifecycle = replicated_lifecycle(3);

        let result = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "x-tool", &["p1", "p2", "p3"]), &org, "cs", &mut lifecycle)
            .await
            .unwrap();

        assert!(result.is_converged());
        assert_eq!(result.attempts, 1);
        assert!(result.tools.is_empty());
        assert_eq!(result.unchecked, ["x"]);
        assert_eq!(result.missing_count(), 0);
        assert_eq!(lifecycle.repairs(), 0);
        assert_eq!(lifecycle.state(), DestinationState::Converged);
    }

    #[tokio::test]
    async fn test_unreadable_destination_fails() {
        let mock = MockRegistry::new();
        let org = destination(&mock, "x", &[]);
        mock.fail_requests(
            crate::registry::Method::Get,
            "/organizations/gh/dest/coding-standards/cs/tools",
            404,
            1,
        );
        let client = RegistryClient::with_transport("dest", mock, HttpSettings::immediate());
        let replication = ReplicationSettings::immediate();
        let replicator = Replicator::new(&client, &replication, StopSignal::new());
        let settings = ValidationSettings::default();
        let mut lifecycle = replicated_lifecycle(3);

        let err = Validator::new(&replicator, &settings)
            .validate(&snapshot("x", "X", &["p"]), &org, "cs", &mut lifecycle)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationFetchFailed);
        assert_eq!(lifecycle.state(), DestinationState::Failed);
    }
}
