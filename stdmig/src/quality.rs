//! Repository quality settings (gates) carried alongside the standard.
//!
//! For each repository and category the source settings are read, written
//! to the destination as-is and read back for verification.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use stdmig_common::{ErrorCode, OrgRef, Repository, SettingsKind};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::{RegistryClient, RegistryError, Transport};
use crate::replicator::StopSignal;
use crate::selector::{SelectionError, Selector};

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("failed to list repositories of {org}: {source}")]
    ListRepositories {
        org: OrgRef,
        #[source]
        source: RegistryError,
    },

    #[error("repository selection failed: {0}")]
    Selection(#[from] SelectionError),
}

impl QualityError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ListRepositories { .. } => ErrorCode::QualitySettingsFailed,
            Self::Selection(err) => err.error_code(),
        }
    }
}

/// Which repositories to carry over.
pub enum RepositoryScope<'s> {
    All,
    One(&'s (dyn Selector<Repository> + Sync)),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryResult {
    Migrated {
        source_settings: Value,
        update_result: Value,
        verified_settings: Value,
        verified: bool,
    },
    Failed {
        code: String,
        error: String,
    },
}

impl CategoryResult {
    fn failed(err: &RegistryError) -> Self {
        Self::Failed {
            code: err.error_code().code_string(),
            error: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Migrated { .. })
    }
}

type RepositoryResults = BTreeMap<SettingsKind, CategoryResult>;

/// Results keyed by destination organization, repository, category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub source: String,
    pub results: BTreeMap<String, BTreeMap<String, RepositoryResults>>,
    pub stopped: bool,
}

impl QualityReport {
    /// Repositories whose every category migrated, per destination.
    pub fn fully_successful(&self, destination: &str) -> usize {
        self.results
            .get(destination)
            .map(|repos| {
                repos
                    .values()
                    .filter(|categories| {
                        categories.len() == SettingsKind::ALL.len()
                            && categories.values().all(CategoryResult::is_success)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Nothing stopped early and every processed repository fully migrated.
    pub fn is_complete(&self) -> bool {
        !self.stopped
            && self
                .results
                .iter()
                .all(|(destination, repos)| self.fully_successful(destination) == repos.len())
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        for (destination, repos) in &self.results {
            let ok = self.fully_successful(destination);
            let line = format!("{ok}/{} repositories fully migrated", repos.len());
            let line = if ok == repos.len() { line.green() } else { line.yellow() };
            let _ = writeln!(out, "{} {}", format!("{destination}:").bold(), line);
            for (repo, categories) in repos {
                for (kind, result) in categories {
                    if let CategoryResult::Failed { code, error } = result {
                        let _ = writeln!(out, "  {repo} {kind}: [{code}] {error}");
                    }
                }
            }
        }
        if self.stopped {
            let _ = writeln!(out, "{}", "Stopped before all repositories were processed".yellow());
        }
        out
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Quality settings results written");
        Ok(())
    }
}

pub struct QualitySettingsMigrator<'a, S, D> {
    source: &'a RegistryClient<S>,
    destination: &'a RegistryClient<D>,
    stop: StopSignal,
}

impl<'a, S: Transport, D: Transport> QualitySettingsMigrator<'a, S, D> {
    pub fn new(
        source: &'a RegistryClient<S>,
        destination: &'a RegistryClient<D>,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            destination,
            stop,
        }
    }

    pub async fn migrate(
        &self,
        source_org: &OrgRef,
        destinations: &[OrgRef],
        scope: RepositoryScope<'_>,
    ) -> Result<QualityReport, QualityError> {
        let repositories = self
            .source
            .list_repositories(source_org)
            .await
            .map_err(|source| QualityError::ListRepositories {
                org: source_org.clone(),
                source,
            })?;
        let repositories = match scope {
            RepositoryScope::All => repositories,
            RepositoryScope::One(selector) => {
                let index = selector.select(&repositories)?;
                vec![repositories[index].clone()]
            }
        };
        info!(org = %source_org, repositories = repositories.len(), "Migrating quality settings");

        let mut report = QualityReport {
            source: source_org.to_string(),
            ..QualityReport::default()
        };
        let mut cache: BTreeMap<(String, SettingsKind), Result<Value, RegistryError>> =
            BTreeMap::new();

        'outer: for destination in destinations {
            let per_destination = report.results.entry(destination.to_string()).or_default();
            for repository in &repositories {
                if self.stop.is_stopped() {
                    warn!(
                        destination = %destination,
                        "Stop requested, leaving remaining repositories"
                    );
                    report.stopped = true;
                    break 'outer;
                }
                let mut categories = RepositoryResults::new();
                for kind in SettingsKind::ALL {
                    let key = (repository.name.clone(), kind);
                    let fetched = match cache.get(&key) {
                        Some(fetched) => fetched.clone(),
                        None => {
                            let fetched = self
                                .source
                                .quality_settings(source_org, &repository.name, kind)
                                .await;
                            cache.insert(key, fetched.clone());
                            fetched
                        }
                    };
                    let result = match fetched {
                        Ok(settings) => {
                            self.copy(destination, &repository.name, kind, &settings).await
                        }
                        Err(err) => {
                            warn!(
                                repository = %repository.name,
                                %kind,
                                error = %err,
                                "Failed to read source settings"
                            );
                            CategoryResult::failed(&err)
                        }
                    };
                    categories.insert(kind, result);
                }
                per_destination.insert(repository.name.clone(), categories);
            }
            info!(
                destination = %destination,
                repositories = per_destination.len(),
                "Quality settings processed"
            );
        }

        Ok(report)
    }

    async fn copy(
        &self,
        destination: &OrgRef,
        repository: &str,
        kind: SettingsKind,
        settings: &Value,
    ) -> CategoryResult {
        let update_result = match self
            .destination
            .update_quality_settings(destination, repository, kind, settings)
            .await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(repository, %kind, error = %err, "Failed to update settings");
                return CategoryResult::failed(&err);
            }
        };
        let verified_settings = match self
            .destination
            .quality_settings(destination, repository, kind)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!(repository, %kind, error = %err, "Failed to verify settings");
                return CategoryResult::failed(&err);
            }
        };

        let verified = &verified_settings == settings;
        if verified {
            debug!(repository, %kind, "Settings verified");
        } else {
            warn!(repository, %kind, "Destination settings differ from source after update");
        }
        CategoryResult::Migrated {
            source_settings: settings.clone(),
            update_result,
            verified_settings,
            verified,
        }
    }
}
