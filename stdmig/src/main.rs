//! stdmig - coding standard migrator CLI.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use stdmig::{
    DefaultFlagSelector, ExplicitSelector, Extraction, ExtractionError, Extractor, IdentifierMapper,
    InteractiveSelector, MigrationEngine, MigrationOptions, QualityError, QualitySettingsMigrator,
    RegistryClient, RegistryError, RepositoryScope, RunReport, SelectionError, Selector, Snapshot,
    SnapshotError, StopSignal, ToolSynonyms, snapshot_schema,
};
use stdmig_common::config::{ConfigError, MigrationConfig};
use stdmig_common::{
    ErrorCode, LogConfig, LogFormat, LoggingGuards, OrgRef, PolicyContainer, Repository,
    init_logging,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "stdmig")]
#[command(author, version, about = "Migrate coding standards between code-quality registries")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "STDMIG_CONFIG")]
    config: Option<PathBuf>,

    /// Git provider segment of organization paths
    #[arg(long, global = true, env = "STDMIG_PROVIDER", default_value = "gh")]
    provider: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a source coding standard into a snapshot file
    Extract {
        #[arg(long)]
        source_org: String,

        #[command(flatten)]
        selection: StandardSelection,

        /// Snapshot output path
        #[arg(short, long, default_value = "coding_standard_snapshot.json")]
        output: PathBuf,
    },

    /// Replay a snapshot file into destination organizations
    Import {
        /// Snapshot written by `extract` (older `tools` layout accepted)
        #[arg(long)]
        snapshot: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Extract and import in one run
    Migrate {
        #[arg(long)]
        source_org: String,

        #[command(flatten)]
        selection: StandardSelection,

        /// Also keep the snapshot on disk
        #[arg(long)]
        save_snapshot: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Copy repository quality settings (gates)
    QualitySettings {
        #[arg(long)]
        source_org: String,

        /// Destination organization (repeatable)
        #[arg(long = "dest-org", required = true)]
        dest_orgs: Vec<String>,

        /// Only this repository
        #[arg(long, conflicts_with = "interactive")]
        repository: Option<String>,

        /// Pick one repository from a list
        #[arg(long)]
        interactive: bool,

        /// Results file (default: <source org>_migration_results.json)
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Print the effective configuration and where each value came from
    Config {
        #[arg(long)]
        json: bool,
    },

    /// Print the snapshot JSON Schema
    Schema,
}

/// How the source coding standard is chosen; exactly one is required.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct StandardSelection {
    /// Coding standard id or exact name
    #[arg(long)]
    standard: Option<String>,

    /// The standard flagged as default in the source organization
    #[arg(long)]
    default_standard: bool,

    /// Pick from a list
    #[arg(long)]
    interactive: bool,
}

impl StandardSelection {
    fn selector(&self) -> Box<dyn Selector<PolicyContainer> + Send + Sync> {
        if let Some(key) = &self.standard {
            Box::new(ExplicitSelector::new(key.clone()))
        } else if self.default_standard {
            Box::new(DefaultFlagSelector)
        } else {
            Box::new(InteractiveSelector::new("Coding standard to migrate"))
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Destination organization (repeatable)
    #[arg(long = "dest-org", required = true)]
    dest_orgs: Vec<String>,

    /// Make the migrated standard the default once it converged
    #[arg(long)]
    promote: bool,

    /// Replay into an existing standard id instead of creating one
    #[arg(long)]
    reuse_standard: Option<String>,

    /// Validation passes before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Patterns per write
    #[arg(long)]
    batch_size: Option<usize>,

    /// Write the run report as JSON
    #[arg(long)]
    results: Option<PathBuf>,
}

/// A command failure with its catalog code.
#[derive(Debug)]
struct Failure {
    code: ErrorCode,
    message: String,
}

impl Failure {
    fn new(code: ErrorCode, message: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

macro_rules! failure_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Failure {
                fn from(err: $ty) -> Self {
                    Self::new(err.error_code(), err)
                }
            }
        )*
    };
}

failure_from!(
    ConfigError,
    RegistryError,
    ExtractionError,
    SnapshotError,
    QualityError,
    SelectionError
);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log = log.with_level("debug");
    }
    if cli.json_logs {
        log = log.with_format(LogFormat::Json);
    }
    let _guards = match start_logging(&log) {
        Ok(guards) => guards,
        Err(failure) => {
            print_failure(&failure);
            return Ok(ExitCode::FAILURE);
        }
    };

    match run(cli).await {
        Ok(code) => Ok(code),
        Err(failure) => {
            error!(code = %failure.code.code_string(), "{}", failure.message);
            print_failure(&failure);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn start_logging(log: &LogConfig) -> Result<LoggingGuards, Failure> {
    init_logging(log)
        .map_err(|err| Failure::new(ErrorCode::InternalLoggingError, format!("{err:#}")))
}

fn write_failure(path: &Path, err: std::io::Error) -> Failure {
    Failure::new(ErrorCode::SnapshotWriteError, format!("{}: {err}", path.display()))
}

fn print_failure(failure: &Failure) {
    eprintln!("{}", failure.code.entry().format_full().red());
    eprintln!("Cause: {}", failure.message);
}

async fn run(cli: Cli) -> Result<ExitCode, Failure> {
    let provider = cli.provider.clone();
    let org = |name: &str| OrgRef::new(provider.clone(), name);

    match cli.command {
        Command::Schema => {
            let schema = serde_json::to_string_pretty(&snapshot_schema())
                .map_err(|e| Failure::new(ErrorCode::InternalSerdeError, e))?;
            println!("{schema}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { json } => {
            let config = MigrationConfig::load(cli.config.as_deref())?;
            print_config(&config, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Extract {
            source_org,
            selection,
            output,
        } => {
            let config = MigrationConfig::load(cli.config.as_deref())?;
            let extraction = extract(&config, &org(&source_org), &selection).await?;
            extraction.snapshot.save(&output)?;
            print_extraction(&extraction);
            Ok(ExitCode::SUCCESS)
        }
        Command::Import { snapshot, run } => {
            let mut config = MigrationConfig::load(cli.config.as_deref())?;
            apply_overrides(&mut config, &run);
            let snapshot = Snapshot::load(&snapshot)?;
            info!(
                standard = %snapshot.coding_standard.name,
                tools = snapshot.tool_count(),
                patterns = snapshot.pattern_count(),
                "Loaded snapshot"
            );
            let destinations: Vec<OrgRef> = run.dest_orgs.iter().map(|d| org(d)).collect();
            let report = import(&config, &snapshot, &destinations, &run).await?;
            finish_run(report, &run)
        }
        Command::Migrate {
            source_org,
            selection,
            save_snapshot,
            run,
        } => {
            let mut config = MigrationConfig::load(cli.config.as_deref())?;
            apply_overrides(&mut config, &run);
            let extraction = extract(&config, &org(&source_org), &selection).await?;
            if let Some(path) = &save_snapshot {
                extraction.snapshot.save(path)?;
            }
            print_extraction(&extraction);

            let destinations: Vec<OrgRef> = run.dest_orgs.iter().map(|d| org(d)).collect();
            let report = import(&config, &extraction.snapshot, &destinations, &run)
                .await?
                .with_excluded(extraction.excluded);
            finish_run(report, &run)
        }
        Command::QualitySettings {
            source_org,
            dest_orgs,
            repository,
            interactive,
            results,
        } => {
            let config = MigrationConfig::load(cli.config.as_deref())?;
            let source = RegistryClient::connect(
                "source",
                &config.endpoints.source_endpoint()?,
                &config.http,
            )?;
            let destination = RegistryClient::connect(
                "destination",
                &config.endpoints.destination_endpoint()?,
                &config.http,
            )?;

            let explicit = repository.map(ExplicitSelector::new);
            let prompt = InteractiveSelector::new("Repository to migrate");
            let scope = match (&explicit, interactive) {
                (Some(selector), _) => {
                    RepositoryScope::One(selector as &(dyn Selector<Repository> + Sync))
                }
                (None, true) => RepositoryScope::One(&prompt),
                (None, false) => RepositoryScope::All,
            };

            let source_org = org(&source_org);
            let destinations: Vec<OrgRef> = dest_orgs.iter().map(|d| org(d)).collect();
            let migrator = QualitySettingsMigrator::new(&source, &destination, stop_on_interrupt());
            let report = migrator.migrate(&source_org, &destinations, scope).await?;

            print!("{}", report.render_summary());
            let path = results.unwrap_or_else(|| {
                PathBuf::from(format!("{}_migration_results.json", source_org.name))
            });
            report.write_json(&path).map_err(|e| write_failure(&path, e))?;

            Ok(if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
    }
}

fn apply_overrides(config: &mut MigrationConfig, run: &RunArgs) {
    if let Some(attempts) = run.max_attempts {
        config.validation.max_attempts = attempts.max(1);
        config.note_cli_override("validation.max_attempts", attempts, "--max-attempts");
    }
    if let Some(size) = run.batch_size {
        config.replication.batch_size = size.max(1);
        config.note_cli_override("replication.batch_size", size, "--batch-size");
    }
}

async fn extract(
    config: &MigrationConfig,
    source_org: &OrgRef,
    selection: &StandardSelection,
) -> Result<Extraction, Failure> {
    let source =
        RegistryClient::connect("source", &config.endpoints.source_endpoint()?, &config.http)?;
    let destination = RegistryClient::connect(
        "destination",
        &config.endpoints.destination_endpoint()?,
        &config.http,
    )?;

    let catalog = destination.tool_catalog().await?;
    info!(tools = catalog.len(), "Loaded destination tool catalog");
    let synonyms = ToolSynonyms::builtin().with_overrides(&config.tool_synonyms);
    let mapper = IdentifierMapper::new(&catalog, synonyms);

    let selector = selection.selector();
    let extraction = Extractor::new(&source, &mapper)
        .extract(source_org, selector.as_ref())
        .await?;
    Ok(extraction)
}

async fn import(
    config: &MigrationConfig,
    snapshot: &Snapshot,
    destinations: &[OrgRef],
    run: &RunArgs,
) -> Result<RunReport, Failure> {
    let destination = RegistryClient::connect(
        "destination",
        &config.endpoints.destination_endpoint()?,
        &config.http,
    )?;
    let options = MigrationOptions {
        promote: run.promote,
        reuse_standard: run.reuse_standard.clone(),
    };
    let engine = MigrationEngine::new(
        &destination,
        &config.replication,
        &config.validation,
        stop_on_interrupt(),
    );
    Ok(engine.migrate(snapshot, destinations, &options).await)
}

fn finish_run(report: RunReport, run: &RunArgs) -> Result<ExitCode, Failure> {
    print!("{}", report.render_summary());
    if let Some(path) = &run.results {
        report.write_json(path).map_err(|e| write_failure(path, e))?;
    }
    for destination in &report.destinations {
        if let Some(code) = destination.outcome.code()
            && let Some(code) = ErrorCode::from_code_string(code)
        {
            eprintln!("{}: {}", destination.organization.bold(), code.entry().format_full());
        }
    }
    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// Stop signal raised by Ctrl-C; the run finishes its current step.
fn stop_on_interrupt() -> StopSignal {
    let stop = StopSignal::new();
    let handle = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            handle.stop();
        }
    });
    stop
}

fn print_extraction(extraction: &Extraction) {
    let snapshot = &extraction.snapshot;
    println!(
        "{} {} (id {}): {} tools, {} patterns",
        "Extracted".green().bold(),
        snapshot.coding_standard.name,
        snapshot.coding_standard.id,
        snapshot.tool_count(),
        snapshot.pattern_count()
    );
    for tool in &extraction.excluded {
        println!(
            "  {} {} ({})",
            "excluded".yellow(),
            tool.name,
            tool.reason.error_code().code_string()
        );
    }
}

fn print_config(config: &MigrationConfig, json: bool) -> Result<(), Failure> {
    if json {
        let out = serde_json::to_string_pretty(config.entries())
            .map_err(|e| Failure::new(ErrorCode::InternalSerdeError, e))?;
        println!("{out}");
        return Ok(());
    }
    if let Some(path) = &config.config_path {
        println!("{} {}", "Config file:".bold(), path.display());
    }
    for entry in config.entries() {
        let origin = entry
            .origin
            .as_deref()
            .map(|o| format!(" ({o})"))
            .unwrap_or_default();
        println!(
            "  {:<36} {:<24} {}{}",
            entry.key,
            entry.value,
            entry.source.to_string().dimmed(),
            origin
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritable_log_file_maps_to_logging_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let log = LogConfig::from_env("info").with_file(blocker.join("stdmig.log"));

        let failure = start_logging(&log).err().unwrap();
        assert_eq!(failure.code, ErrorCode::InternalLoggingError);
        assert!(failure.message.contains("log directory"), "{}", failure.message);
    }
}
