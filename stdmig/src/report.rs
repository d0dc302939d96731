//! Per-run results: what each destination ended up as, and why.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use stdmig_common::{ErrorCode, PolicyContainer};
use tracing::info;
use uuid::Uuid;

use crate::extractor::ExcludedTool;
use crate::lifecycle::StateTransition;
use crate::replicator::Replication;
use crate::snapshot::Snapshot;
use crate::validator::MigrationResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DestinationOutcome {
    Success,
    Partial {
        code: String,
        mismatched_tools: usize,
        missing_patterns: usize,
    },
    Failed {
        code: String,
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

impl DestinationOutcome {
    pub fn partial(mismatched_tools: usize, missing_patterns: usize) -> Self {
        Self::Partial {
            code: ErrorCode::ValidationIncomplete.code_string(),
            mismatched_tools,
            missing_patterns,
        }
    }

    pub fn failed(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Failed {
            code: code.code_string(),
            reason: reason.into(),
        }
    }

    /// Catalog code for outcomes that need attention.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Partial { code, .. } | Self::Failed { code, .. } => Some(code.as_str()),
            Self::Success | Self::Skipped { .. } => None,
        }
    }

    fn label(&self) -> colored::ColoredString {
        match self {
            Self::Success => "success".green().bold(),
            Self::Partial { .. } => "partial".yellow().bold(),
            Self::Failed { .. } => "failed".red().bold(),
            Self::Skipped { .. } => "skipped".dimmed(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationReport {
    pub organization: String,
    #[serde(flatten)]
    pub outcome: DestinationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<PolicyContainer>,
    pub promoted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<Replication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<MigrationResult>,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DestinationReport {
    pub fn skipped(organization: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            organization: organization.into(),
            outcome: DestinationOutcome::Skipped {
                reason: reason.into(),
            },
            container: None,
            promoted: false,
            replication: None,
            validation: None,
            transitions: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// Source standard the run replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub standard_id: String,
    pub standard_name: String,
    pub tools: usize,
    pub patterns: usize,
}

impl SourceSummary {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            standard_id: snapshot.coding_standard.id.clone(),
            standard_name: snapshot.coding_standard.name.clone(),
            tools: snapshot.tool_count(),
            patterns: snapshot.pattern_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub source: SourceSummary,
    pub excluded: Vec<ExcludedTool>,
    #[serde(serialize_with = "by_organization")]
    pub destinations: Vec<DestinationReport>,
}

fn by_organization<S: serde::Serializer>(
    destinations: &[DestinationReport],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let keyed: BTreeMap<&str, &DestinationReport> = destinations
        .iter()
        .map(|d| (d.organization.as_str(), d))
        .collect();
    serde::Serialize::serialize(&keyed, serializer)
}

impl RunReport {
    pub fn new(snapshot: &Snapshot) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            source: SourceSummary::from_snapshot(snapshot),
            excluded: Vec::new(),
            destinations: Vec::new(),
        }
    }

    pub fn with_excluded(mut self, excluded: Vec<ExcludedTool>) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn push(&mut self, report: DestinationReport) {
        self.destinations.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn count(&self, pred: impl Fn(&DestinationOutcome) -> bool) -> usize {
        self.destinations.iter().filter(|d| pred(&d.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, DestinationOutcome::Success))
    }

    pub fn partial(&self) -> usize {
        self.count(|o| matches!(o, DestinationOutcome::Partial { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DestinationOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DestinationOutcome::Skipped { .. }))
    }

    /// True when every destination converged.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.destinations.len()
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} ({} tools, {} patterns)",
            "Source:".bold(),
            self.source.standard_name,
            self.source.tools,
            self.source.patterns
        );
        if !self.excluded.is_empty() {
            let _ = writeln!(out, "{}", "Excluded tools:".bold());
            for tool in &self.excluded {
                let reason = match &tool.reason {
                    crate::extractor::ExclusionReason::Unmapped => {
                        "no destination match".to_string()
                    }
                    crate::extractor::ExclusionReason::FetchFailed { error } => error.clone(),
                };
                let _ = writeln!(out, "  - {} ({})", tool.name, reason);
            }
        }

        let _ = writeln!(out, "{}", "Destinations:".bold());
        for destination in &self.destinations {
            let detail = match &destination.outcome {
                DestinationOutcome::Success => destination
                    .container
                    .as_ref()
                    .map(|c| {
                        let promoted = if destination.promoted { ", promoted" } else { "" };
                        format!("{} (id {}){}", c.name, c.id, promoted)
                    })
                    .unwrap_or_default(),
                DestinationOutcome::Partial {
                    code,
                    mismatched_tools,
                    missing_patterns,
                } => format!(
                    "[{code}] {mismatched_tools} tools differ, {missing_patterns} patterns missing"
                ),
                DestinationOutcome::Failed { code, reason } => format!("[{code}] {reason}"),
                DestinationOutcome::Skipped { reason } => reason.clone(),
            };
            let _ = writeln!(
                out,
                "  {:<30} {:<8} {}",
                destination.organization,
                destination.outcome.label(),
                detail
            );
        }

        let _ = writeln!(
            out,
            "{} {} succeeded, {} partial, {} failed, {} skipped",
            "Summary:".bold(),
            self.succeeded(),
            self.partial(),
            self.failed(),
            self.skipped()
        );
        out
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json_pretty().map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), run_id = %self.run_id, "Run report written");
        Ok(())
    }
}
