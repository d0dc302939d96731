//! Sequential driver over destination organizations.
//!
//! Each destination goes through replicate → validate → optional promote
//! on its own lifecycle. A failing destination is reported and the run
//! moves on; a stop request skips whatever has not started yet.

use stdmig_common::config::{ReplicationSettings, ValidationSettings};
use stdmig_common::{ErrorCode, OrgRef};
use tracing::{Instrument, error, info, info_span, warn};

use crate::lifecycle::{DestinationLifecycle, DestinationState};
use crate::registry::{RegistryClient, Transport};
use crate::replicator::{ReplicationTarget, Replicator, StopSignal};
use crate::report::{DestinationOutcome, DestinationReport, RunReport};
use crate::snapshot::Snapshot;
use crate::validator::Validator;

#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    /// Make the migrated standard the destination default once converged.
    pub promote: bool,
    /// Replay into this existing standard id instead of creating one.
    pub reuse_standard: Option<String>,
}

impl MigrationOptions {
    fn target(&self) -> ReplicationTarget {
        match &self.reuse_standard {
            Some(id) => ReplicationTarget::Existing(id.clone()),
            None => ReplicationTarget::Create,
        }
    }
}

pub struct MigrationEngine<'a, T> {
    destination: &'a RegistryClient<T>,
    replication: &'a ReplicationSettings,
    validation: &'a ValidationSettings,
    stop: StopSignal,
}

impl<'a, T: Transport> MigrationEngine<'a, T> {
    pub fn new(
        destination: &'a RegistryClient<T>,
        replication: &'a ReplicationSettings,
        validation: &'a ValidationSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            destination,
            replication,
            validation,
            stop,
        }
    }

    pub async fn migrate(
        &self,
        snapshot: &Snapshot,
        destinations: &[OrgRef],
        options: &MigrationOptions,
    ) -> RunReport {
        let mut report = RunReport::new(snapshot);
        info!(
            run_id = %report.run_id,
            standard = %snapshot.coding_standard.name,
            destinations = destinations.len(),
            "Starting migration"
        );

        for org in destinations {
            if self.stop.is_stopped() {
                warn!(org = %org, "Stop requested, skipping destination");
                report.push(DestinationReport::skipped(org.to_string(), "stopped before start"));
                continue;
            }
            let span = info_span!("destination", org = %org);
            let destination = self
                .migrate_destination(snapshot, org, options)
                .instrument(span)
                .await;
            report.push(destination);
        }

        report.finish();
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            partial = report.partial(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Migration finished"
        );
        report
    }

    async fn migrate_destination(
        &self,
        snapshot: &Snapshot,
        org: &OrgRef,
        options: &MigrationOptions,
    ) -> DestinationReport {
        let mut report = DestinationReport::skipped(org.to_string(), "");
        let mut lifecycle =
            DestinationLifecycle::new(org.to_string(), self.validation.max_attempts);
        let replicator = Replicator::new(self.destination, self.replication, self.stop.clone());

        let replication = match replicator
            .replicate(snapshot, org, &options.target(), &mut lifecycle)
            .await
        {
            Ok(replication) => replication,
            Err(err) => {
                error!(org = %org, error = %err, "Replication failed");
                mark_failed(&mut lifecycle, "replication failed");
                report.outcome = DestinationOutcome::failed(err.error_code(), err.to_string());
                return finish(report, lifecycle);
            }
        };
        let container = replication.container.clone();
        report.container = Some(container.clone());
        report.replication = Some(replication);

        let validator = Validator::new(&replicator, self.validation);
        let result = match validator
            .validate(snapshot, org, &container.id, &mut lifecycle)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                error!(org = %org, error = %err, "Validation failed");
                mark_failed(&mut lifecycle, "validation failed");
                report.outcome = DestinationOutcome::failed(err.error_code(), err.to_string());
                return finish(report, lifecycle);
            }
        };

        report.outcome = if result.is_converged() {
            DestinationOutcome::Success
        } else {
            DestinationOutcome::partial(result.mismatched().count(), result.missing_count())
        };
        let converged = result.is_converged();
        report.validation = Some(result);

        if options.promote {
            if converged {
                match self.destination.promote_standard(org, &container.id).await {
                    Ok(()) => {
                        info!(org = %org, standard = %container.name, "Promoted to default");
                        report.promoted = true;
                    }
                    Err(err) => {
                        error!(org = %org, error = %err, "Promotion failed");
                        report.outcome = DestinationOutcome::failed(
                            ErrorCode::ReplicationPromoteFailed,
                            err.to_string(),
                        );
                    }
                }
            } else {
                warn!(org = %org, "Not promoting a partially converged standard");
            }
        }

        finish(report, lifecycle)
    }
}

fn mark_failed(lifecycle: &mut DestinationLifecycle, reason: &str) {
    if !lifecycle.state().is_terminal() {
        let _ = lifecycle.transition(DestinationState::Failed, reason);
    }
}

fn finish(mut report: DestinationReport, lifecycle: DestinationLifecycle) -> DestinationReport {
    report.transitions = lifecycle.transitions().to_vec();
    report.finished_at = chrono::Utc::now();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::mock::pattern;
    use crate::registry::{Method, MockRegistry};
    use std::collections::BTreeSet;
    use stdmig_common::PolicyContainer;
    use stdmig_common::config::HttpSettings;

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new(PolicyContainer {
            id: "src".into(),
            name: "Backend".into(),
            languages: BTreeSet::from(["Java".to_string()]),
            is_draft: false,
            is_default: true,
        });
        snapshot.insert_tool("pmd", "PMD", vec![pattern("a", true), pattern("b", true)]);
        snapshot
    }

    fn engine_parts(
        mock: &MockRegistry,
    ) -> (RegistryClient<MockRegistry>, ReplicationSettings, ValidationSettings) {
        mock.add_destination_tool("pmd", "PMD", false, vec![]);
        (
            RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate()),
            ReplicationSettings::immediate(),
            ValidationSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_failed_destination_does_not_stop_run() {
        let mock = MockRegistry::new();
        let (client, replication, validation) = engine_parts(&mock);
        mock.fail_requests(Method::Post, "/organizations/gh/broken/coding-standards", 403, 1);

        let engine = MigrationEngine::new(&client, &replication, &validation, StopSignal::new());
        let orgs = [OrgRef::new("gh", "broken"), OrgRef::new("gh", "ok")];
        let report = engine.migrate(&snapshot(), &orgs, &MigrationOptions::default()).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        let broken = &report.destinations[0];
        assert!(matches!(
            &broken.outcome,
            DestinationOutcome::Failed { code, .. } if code == "MIG-E300"
        ));
        assert_eq!(broken.transitions.last().unwrap().to, DestinationState::Failed);
    }

    #[tokio::test]
    async fn test_promote_only_when_converged() {
        let mock = MockRegistry::new();
        let (client, replication, validation) = engine_parts(&mock);
        let engine = MigrationEngine::new(&client, &replication, &validation, StopSignal::new());
        let options = MigrationOptions {
            promote: true,
            ..MigrationOptions::default()
        };

        let org = OrgRef::new("gh", "dest");
        let report = engine.migrate(&snapshot(), std::slice::from_ref(&org), &options).await;
        assert!(report.destinations[0].promoted);
        assert!(mock.standards(&org).iter().any(|s| s.is_default));

        mock.drop_pattern_writes("b", None);
        let other = OrgRef::new("gh", "other");
        let report = engine.migrate(&snapshot(), std::slice::from_ref(&other), &options).await;
        assert!(matches!(report.destinations[0].outcome, DestinationOutcome::Partial { .. }));
        assert!(!report.destinations[0].promoted);
        assert!(mock.standards(&other).iter().all(|s| !s.is_default));
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_destinations() {
        let mock = MockRegistry::new();
        let (client, replication, validation) = engine_parts(&mock);
        let stop = StopSignal::new();
        stop.stop();
        let engine = MigrationEngine::new(&client, &replication, &validation, stop);

        let orgs = [OrgRef::new("gh", "a"), OrgRef::new("gh", "b")];
        let report = engine.migrate(&snapshot(), &orgs, &MigrationOptions::default()).await;
        assert_eq!(report.skipped(), 2);
        assert!(mock.calls().is_empty());
    }
}
