//! Replays a [`Snapshot`] into one destination coding standard.
//!
//! Writes go out in bounded batches with a fixed retry budget per batch.
//! Batches that never land are re-pushed once in smaller sub-batches, and
//! whatever still fails is recorded per pattern id for the validator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use stdmig_common::config::ReplicationSettings;
use stdmig_common::{ErrorCode, OrgRef, PatternUpdate, PolicyContainer, ToolPatch};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::lifecycle::{DestinationLifecycle, DestinationState, LifecycleError};
use crate::registry::{RegistryClient, RegistryError, Transport};
use crate::snapshot::{Snapshot, SnapshotTool};

/// Cooperative stop flag shared between the CLI and the engine.
///
/// Checked between destinations, tools and batches; in-flight requests are
/// never interrupted and nothing is rolled back.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the snapshot is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationTarget {
    /// New standard named after the source one.
    Create,
    /// A standard created by an earlier run, re-used for convergence.
    Existing(String),
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("failed to prepare coding standard in {org}: {source}")]
    ContainerCreate {
        org: OrgRef,
        #[source]
        source: RegistryError,
    },

    #[error("coding standard {id} does not exist in {org}")]
    ContainerMissing { org: OrgRef, id: String },

    #[error("failed to list tools of {org} standard {container_id}: {source}")]
    DefaultsDisable {
        org: OrgRef,
        container_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("stopped while replicating into {org}")]
    Cancelled { org: OrgRef },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ReplicationError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ContainerCreate { .. } | Self::ContainerMissing { .. } => {
                ErrorCode::ReplicationContainerCreateFailed
            }
            Self::DefaultsDisable { .. } => ErrorCode::ReplicationDefaultsDisableFailed,
            Self::Cancelled { .. } => ErrorCode::ReplicationCancelled,
            Self::Lifecycle(err) => err.error_code(),
        }
    }
}

/// A batch that was still rejected after its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub pattern_ids: Vec<String>,
    pub attempts: u32,
    pub error: String,
}

impl BatchFailure {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::ReplicationBatchFailed
    }
}

/// Result of pushing a list of pattern updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub pushed: usize,
    pub failed_ids: Vec<String>,
    pub failures: Vec<BatchFailure>,
}

impl PushOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_ids.is_empty()
    }
}

/// Why a tool could not be enabled in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationFailure {
    pub code: String,
    pub error: String,
}

impl ActivationFailure {
    fn new(err: &RegistryError) -> Self {
        Self {
            code: ErrorCode::ReplicationToolEnableFailed.code_string(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolReplication {
    pub tool_id: String,
    pub name: String,
    pub activated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_error: Option<ActivationFailure>,
    pub disabled: usize,
    pub pushed: usize,
    pub failed_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batch_failures: Vec<BatchFailure>,
}

/// Destination container plus what happened to each snapshot tool.
#[derive(Debug, Clone, Serialize)]
pub struct Replication {
    pub container: PolicyContainer,
    pub disabled_tools: Vec<String>,
    pub tools: Vec<ToolReplication>,
}

impl Replication {
    pub fn failed_pattern_count(&self) -> usize {
        self.tools.iter().map(|t| t.failed_patterns.len()).sum()
    }

    pub fn inactive_tools(&self) -> impl Iterator<Item = &ToolReplication> {
        self.tools.iter().filter(|t| !t.activated)
    }
}

pub struct Replicator<'a, T> {
    client: &'a RegistryClient<T>,
    settings: &'a ReplicationSettings,
    stop: StopSignal,
}

impl<'a, T: Transport> Replicator<'a, T> {
    pub fn new(
        client: &'a RegistryClient<T>,
        settings: &'a ReplicationSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            client,
            settings,
            stop,
        }
    }

    pub fn client(&self) -> &RegistryClient<T> {
        self.client
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub async fn replicate(
        &self,
        snapshot: &Snapshot,
        org: &OrgRef,
        target: &ReplicationTarget,
        lifecycle: &mut DestinationLifecycle,
    ) -> Result<Replication, ReplicationError> {
        let container = self.prepare_container(snapshot, org, target).await?;
        lifecycle.transition(DestinationState::Created, "container ready")?;

        let disabled_tools = self.disable_enabled_tools(org, &container.id).await?;
        lifecycle.transition(
            DestinationState::ToolsDisabled,
            &format!("{} tools disabled", disabled_tools.len()),
        )?;

        let mut tools = Vec::with_capacity(snapshot.tool_count());
        for (tool_id, tool) in &snapshot.tool_patterns {
            if self.stop.is_stopped() {
                warn!(org = %org, done = tools.len(), "Stop requested, leaving remaining tools");
                return Err(ReplicationError::Cancelled { org: org.clone() });
            }
            tools.push(self.replicate_tool(org, &container.id, tool_id, tool).await?);
        }

        let failed: usize = tools.iter().map(|t| t.failed_patterns.len()).sum();
        lifecycle.transition(
            DestinationState::PatternsReplicated,
            &format!("{} tools replicated, {failed} patterns failed", tools.len()),
        )?;
        info!(
            org = %org,
            standard = %container.name,
            tools = tools.len(),
            failed_patterns = failed,
            "Replication complete"
        );

        Ok(Replication {
            container,
            disabled_tools,
            tools,
        })
    }

    async fn prepare_container(
        &self,
        snapshot: &Snapshot,
        org: &OrgRef,
        target: &ReplicationTarget,
    ) -> Result<PolicyContainer, ReplicationError> {
        match target {
            ReplicationTarget::Existing(id) => {
                let standards = self.client.list_standards(org).await.map_err(|source| {
                    ReplicationError::ContainerCreate {
                        org: org.clone(),
                        source,
                    }
                })?;
                let container = standards
                    .into_iter()
                    .find(|s| &s.id == id)
                    .ok_or_else(|| ReplicationError::ContainerMissing {
                        org: org.clone(),
                        id: id.clone(),
                    })?;
                info!(
                    org = %org,
                    standard = %container.name,
                    id = %container.id,
                    "Reusing coding standard"
                );
                Ok(container)
            }
            ReplicationTarget::Create => {
                let source = &snapshot.coding_standard;
                let name = format!(
                    "{}{}_{}",
                    self.settings.name_prefix,
                    source.name,
                    chrono::Utc::now().timestamp()
                );
                let mut languages = source.languages.clone();
                if languages.is_empty() {
                    warn!(
                        standard = %source.name,
                        language = %self.settings.default_language,
                        "Source standard has no languages, using default"
                    );
                    languages.insert(self.settings.default_language.clone());
                }

                let container = self
                    .client
                    .create_standard(org, &name, &languages)
                    .await
                    .map_err(|source| ReplicationError::ContainerCreate {
                        org: org.clone(),
                        source,
                    })?;
                info!(
                    org = %org,
                    standard = %container.name,
                    id = %container.id,
                    "Created coding standard"
                );
                Ok(container)
            }
        }
    }

    /// Switch off every tool the destination enabled on its own.
    async fn disable_enabled_tools(
        &self,
        org: &OrgRef,
        container_id: &str,
    ) -> Result<Vec<String>, ReplicationError> {
        let tools = self
            .client
            .list_tools(org, container_id)
            .await
            .map_err(|source| ReplicationError::DefaultsDisable {
                org: org.clone(),
                container_id: container_id.to_string(),
                source,
            })?;

        let mut disabled = Vec::new();
        for tool in tools.into_iter().filter(|t| t.enabled) {
            match self
                .client
                .update_tool(org, container_id, &tool.id, &ToolPatch::disable_tool())
                .await
            {
                Ok(()) => disabled.push(tool.id),
                Err(err) => {
                    warn!(org = %org, tool = %tool.id, error = %err, "Failed to disable tool");
                }
            }
        }
        debug!(org = %org, disabled = disabled.len(), "Disabled pre-enabled tools");
        Ok(disabled)
    }

    async fn replicate_tool(
        &self,
        org: &OrgRef,
        container_id: &str,
        tool_id: &str,
        tool: &SnapshotTool,
    ) -> Result<ToolReplication, ReplicationError> {
        let mut record = ToolReplication {
            tool_id: tool_id.to_string(),
            name: tool.name.clone(),
            activated: false,
            activation_error: None,
            disabled: 0,
            pushed: 0,
            failed_patterns: Vec::new(),
            batch_failures: Vec::new(),
        };

        // Pattern writes only follow a successful activation.
        if let Err(err) = self.activate_tool(org, container_id, tool_id).await {
            warn!(
                org = %org,
                tool = %tool.name,
                error = %err,
                "Failed to enable tool, skipping its patterns"
            );
            record.activation_error = Some(ActivationFailure::new(&err));
            record.failed_patterns = tool.patterns.iter().map(|p| p.id.clone()).collect();
            return Ok(record);
        }
        record.activated = true;

        match self
            .client
            .enabled_patterns(org, container_id, tool_id, None)
            .await
        {
            Ok(current) if !current.is_empty() => {
                let updates = current
                    .iter()
                    .map(|p| PatternUpdate::disable(p.id.clone()))
                    .collect();
                let outcome = self.push_patterns(org, container_id, tool_id, updates).await?;
                record.disabled = outcome.pushed;
                if !outcome.is_complete() {
                    warn!(
                        tool = %tool.name,
                        failed = outcome.failed_ids.len(),
                        "Some destination defaults could not be disabled"
                    );
                }
                if !self.settings.batch_pause.is_zero() {
                    sleep(self.settings.batch_pause).await;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    tool = %tool.name,
                    error = %err,
                    "Failed to read destination defaults, enabling on top"
                );
            }
        }

        let updates = tool.patterns.iter().map(|p| p.enable_update()).collect();
        let outcome = self.push_patterns(org, container_id, tool_id, updates).await?;
        info!(
            tool = %tool.name,
            pushed = outcome.pushed,
            failed = outcome.failed_ids.len(),
            "Tool replicated"
        );
        record.pushed = outcome.pushed;
        record.failed_patterns = outcome.failed_ids;
        record.batch_failures = outcome.failures;
        Ok(record)
    }

    /// Enable a tool without pattern changes.
    pub async fn activate_tool(
        &self,
        org: &OrgRef,
        container_id: &str,
        tool_id: &str,
    ) -> Result<(), RegistryError> {
        self.client
            .update_tool(org, container_id, tool_id, &ToolPatch::enable_tool())
            .await?;
        if !self.settings.write_pause.is_zero() {
            sleep(self.settings.write_pause).await;
        }
        Ok(())
    }

    /// Send pattern updates in batches of `batch_size`, then re-send the
    /// batches that failed in sub-batches of `sub_batch_size`.
    pub async fn push_patterns(
        &self,
        org: &OrgRef,
        container_id: &str,
        tool_id: &str,
        updates: Vec<PatternUpdate>,
    ) -> Result<PushOutcome, ReplicationError> {
        let mut outcome = PushOutcome::default();
        let mut leftovers: Vec<Vec<PatternUpdate>> = Vec::new();
        let batch_size = self.settings.batch_size.max(1);
        let total = updates.len().div_ceil(batch_size);

        for (index, batch) in updates.chunks(batch_size).enumerate() {
            self.check_stop(org)?;
            debug!(
                tool = tool_id,
                batch = index + 1,
                total,
                size = batch.len(),
                "Sending pattern batch"
            );
            match self.send_batch(org, container_id, tool_id, batch).await {
                Ok(()) => outcome.pushed += batch.len(),
                Err((err, _)) => {
                    warn!(
                        tool = tool_id,
                        batch = index + 1,
                        error = %err,
                        "Batch failed, will retry in sub-batches"
                    );
                    leftovers.push(batch.to_vec());
                }
            }
        }

        let sub_size = self.settings.sub_batch_size.max(1);
        for batch in leftovers {
            for sub in batch.chunks(sub_size) {
                self.check_stop(org)?;
                match self.send_batch(org, container_id, tool_id, sub).await {
                    Ok(()) => outcome.pushed += sub.len(),
                    Err((err, attempts)) => {
                        let ids: Vec<String> = sub.iter().map(|u| u.id.clone()).collect();
                        warn!(tool = tool_id, patterns = ?ids, error = %err, "Sub-batch failed");
                        outcome.failed_ids.extend(ids.iter().cloned());
                        outcome.failures.push(BatchFailure {
                            pattern_ids: ids,
                            attempts,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// One batch with up to `batch_attempts` tries and a fixed delay.
    /// Rejections that would repeat end it early. A failure carries the
    /// number of tries actually made.
    async fn send_batch(
        &self,
        org: &OrgRef,
        container_id: &str,
        tool_id: &str,
        batch: &[PatternUpdate],
    ) -> Result<(), (RegistryError, u32)> {
        let patch = ToolPatch::patterns(batch.to_vec());
        let attempts = self.settings.batch_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.client.update_tool(org, container_id, tool_id, &patch).await {
                Ok(()) => {
                    if !self.settings.write_pause.is_zero() {
                        sleep(self.settings.write_pause).await;
                    }
                    return Ok(());
                }
                Err(err) if attempt < attempts && err.is_transient() => {
                    debug!(tool = tool_id, attempt, error = %err, "Batch attempt failed");
                    attempt += 1;
                    if !self.settings.batch_retry_delay.is_zero() {
                        sleep(self.settings.batch_retry_delay).await;
                    }
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }

    fn check_stop(&self, org: &OrgRef) -> Result<(), ReplicationError> {
        if self.stop.is_stopped() {
            return Err(ReplicationError::Cancelled { org: org.clone() });
        }
        Ok(())
    }
}
