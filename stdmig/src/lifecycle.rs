//! Per-destination lifecycle state machine.
//!
//! ```text
//! Pending → Created → ToolsDisabled → PatternsReplicated → Validating → Converged
//!                                            ↑                 │     → PartiallyConverged
//!                                            └── repair ───────┘
//! ```
//!
//! Any non-terminal state may move to `Failed`. The repair edge is bounded
//! by `max_attempts - 1`.

use serde::{Deserialize, Serialize};
use stdmig_common::ErrorCode;
use thiserror::Error;
use tracing::{debug, info};

// ── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationState {
    /// Nothing written yet.
    Pending,
    /// Container created or located.
    Created,
    /// Pre-existing tools switched off.
    ToolsDisabled,
    /// Snapshot tools and patterns pushed (or a repair pass finished).
    PatternsReplicated,
    /// Comparing destination against the snapshot.
    Validating,
    Converged,
    /// Mismatches remained after the last attempt.
    PartiallyConverged,
    Failed,
}

impl DestinationState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::PartiallyConverged | Self::Failed)
    }
}

impl std::fmt::Display for DestinationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Created => write!(f, "created"),
            Self::ToolsDisabled => write!(f, "tools_disabled"),
            Self::PatternsReplicated => write!(f, "patterns_replicated"),
            Self::Validating => write!(f, "validating"),
            Self::Converged => write!(f, "converged"),
            Self::PartiallyConverged => write!(f, "partially_converged"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ── Transition ──────────────────────────────────────────────────────────────

/// Record of a state change with reason and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: DestinationState,
    pub to: DestinationState,
    pub reason: String,
    pub at_unix_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: DestinationState,
        to: DestinationState,
    },

    #[error("repair budget exhausted after {max_attempts} validation attempts")]
    RepairBudgetExhausted { max_attempts: u32 },
}

impl LifecycleError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::ValidationStateError
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DestinationLifecycle {
    destination: String,
    state: DestinationState,
    max_attempts: u32,
    repairs: u32,
    transitions: Vec<StateTransition>,
}

impl DestinationLifecycle {
    pub fn new(destination: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            destination: destination.into(),
            state: DestinationState::Pending,
            max_attempts: max_attempts.max(1),
            repairs: 0,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> DestinationState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn repairs(&self) -> u32 {
        self.repairs
    }

    /// Whether another `Validating → PatternsReplicated` pass is allowed.
    pub fn can_repair(&self) -> bool {
        self.repairs + 1 < self.max_attempts
    }

    pub fn transition(&mut self, to: DestinationState, reason: &str) -> Result<(), LifecycleError> {
        use DestinationState::*;

        let from = self.state;
        let allowed = match (from, to) {
            (Pending, Created)
            | (Created, ToolsDisabled)
            | (ToolsDisabled, PatternsReplicated)
            | (PatternsReplicated, Validating)
            | (Validating, Converged)
            | (Validating, PartiallyConverged) => true,
            (Validating, PatternsReplicated) => {
                if !self.can_repair() {
                    return Err(LifecycleError::RepairBudgetExhausted {
                        max_attempts: self.max_attempts,
                    });
                }
                true
            }
            (from, Failed) => !from.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(LifecycleError::IllegalTransition { from, to });
        }

        if from == Validating && to == PatternsReplicated {
            self.repairs += 1;
        }
        self.state = to;
        self.transitions.push(StateTransition {
            from,
            to,
            reason: reason.to_string(),
            at_unix_ms: chrono::Utc::now().timestamp_millis(),
        });

        if to.is_terminal() {
            info!(destination = %self.destination, %from, %to, reason, "Destination finished");
        } else {
            debug!(destination = %self.destination, %from, %to, reason, "Destination transition");
        }
        Ok(())
    }
}
