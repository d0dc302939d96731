//! Coding standard migrator.
//!
//! Extracts a coding standard (enabled tools and patterns) from a source
//! registry into a [`Snapshot`], replays it into destination organizations
//! and validates convergence with bounded repair passes.

pub mod engine;
pub mod extractor;
pub mod lifecycle;
pub mod mapper;
pub mod quality;
pub mod registry;
pub mod replicator;
pub mod report;
pub mod selector;
pub mod snapshot;
pub mod validator;

pub use engine::{MigrationEngine, MigrationOptions};
pub use extractor::{ExcludedTool, ExclusionReason, Extraction, ExtractionError, Extractor};
pub use lifecycle::{DestinationLifecycle, DestinationState, LifecycleError, StateTransition};
pub use mapper::{DestinationTool, IdentifierMapper, MatchKind, ToolMapping, ToolSynonyms};
pub use quality::{QualityError, QualityReport, QualitySettingsMigrator, RepositoryScope};
pub use registry::{
    Listing, MockRegistry, RegistryClient, RegistryError, ReqwestTransport, Transport,
};
pub use replicator::{
    ActivationFailure, BatchFailure, PushOutcome, Replication, ReplicationError, ReplicationTarget,
    Replicator, StopSignal, ToolReplication,
};
pub use report::{DestinationOutcome, DestinationReport, RunReport};
pub use selector::{
    Choice, DefaultFlagSelector, ExplicitSelector, InteractiveSelector, SelectionError, Selector,
};
pub use snapshot::{Snapshot, SnapshotError, SnapshotTool, snapshot_schema};
pub use validator::{MigrationResult, ToolValidation, ValidationError, ValidationStatus, Validator};
