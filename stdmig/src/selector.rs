//! Choosing one candidate (a coding standard, a repository) out of many.
//!
//! A selection is always explicit: by id or name, by the registry's
//! default flag, interactively, or through a caller-supplied closure.
//! Nothing here falls back to "the first one".

use stdmig_common::{ErrorCode, PolicyContainer, Repository};
use thiserror::Error;

/// Something a [`Selector`] can choose.
pub trait Choice {
    fn choice_id(&self) -> &str;

    fn choice_label(&self) -> String;

    /// Whether the registry marks this candidate as the default.
    fn is_flagged_default(&self) -> bool {
        false
    }

    fn choice_name(&self) -> &str {
        self.choice_id()
    }
}

impl Choice for PolicyContainer {
    fn choice_id(&self) -> &str {
        &self.id
    }

    fn choice_label(&self) -> String {
        let languages = self.languages.iter().cloned().collect::<Vec<_>>().join(", ");
        let default = if self.is_default { " [default]" } else { "" };
        format!("{} (id {}, {}){}", self.name, self.id, languages, default)
    }

    fn is_flagged_default(&self) -> bool {
        self.is_default
    }

    fn choice_name(&self) -> &str {
        &self.name
    }
}

impl Choice for Repository {
    fn choice_id(&self) -> &str {
        &self.name
    }

    fn choice_label(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("nothing to choose from")]
    NoCandidates,
    #[error("no candidate matches '{key}'")]
    NoMatch { key: String },
    #[error("'{key}' matches {count} candidates; use the id instead")]
    Ambiguous { key: String, count: usize },
    #[error("no candidate is flagged as default")]
    NoDefault,
    #[error("{count} candidates are flagged as default")]
    MultipleDefaults { count: usize },
    #[error("selection cancelled")]
    Cancelled,
    #[error("selected index {index} is out of range (0..{len})")]
    OutOfRange { index: usize, len: usize },
    #[error("interactive prompt failed: {0}")]
    Prompt(String),
}

impl SelectionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Prompt(_) => ErrorCode::InternalPromptError,
            _ => ErrorCode::ExtractionSelectionFailed,
        }
    }
}

/// Picks the index of one candidate.
pub trait Selector<C> {
    fn select(&self, candidates: &[C]) -> Result<usize, SelectionError>;
}

impl<C, F> Selector<C> for F
where
    F: Fn(&[C]) -> Option<usize>,
{
    fn select(&self, candidates: &[C]) -> Result<usize, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let index = self(candidates).ok_or(SelectionError::Cancelled)?;
        if index >= candidates.len() {
            return Err(SelectionError::OutOfRange {
                index,
                len: candidates.len(),
            });
        }
        Ok(index)
    }
}

/// Match by id, then by exact name.
#[derive(Debug, Clone)]
pub struct ExplicitSelector {
    key: String,
}

impl ExplicitSelector {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl<C: Choice> Selector<C> for ExplicitSelector {
    fn select(&self, candidates: &[C]) -> Result<usize, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        if let Some(index) = candidates.iter().position(|c| c.choice_id() == self.key) {
            return Ok(index);
        }

        let by_name: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.choice_name() == self.key)
            .map(|(i, _)| i)
            .collect();
        match by_name.as_slice() {
            [index] => Ok(*index),
            [] => Err(SelectionError::NoMatch {
                key: self.key.clone(),
            }),
            many => Err(SelectionError::Ambiguous {
                key: self.key.clone(),
                count: many.len(),
            }),
        }
    }
}

/// The single candidate the registry flags as default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFlagSelector;

impl<C: Choice> Selector<C> for DefaultFlagSelector {
    fn select(&self, candidates: &[C]) -> Result<usize, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let flagged: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_flagged_default())
            .map(|(i, _)| i)
            .collect();
        match flagged.as_slice() {
            [index] => Ok(*index),
            [] => Err(SelectionError::NoDefault),
            many => Err(SelectionError::MultipleDefaults { count: many.len() }),
        }
    }
}

/// Terminal prompt with fuzzy filtering.
#[derive(Debug, Clone)]
pub struct InteractiveSelector {
    prompt: String,
}

impl InteractiveSelector {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl<C: Choice> Selector<C> for InteractiveSelector {
    fn select(&self, candidates: &[C]) -> Result<usize, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let labels: Vec<String> = candidates.iter().map(Choice::choice_label).collect();
        dialoguer::FuzzySelect::new()
            .with_prompt(&self.prompt)
            .items(&labels)
            .interact_opt()
            .map_err(|e| SelectionError::Prompt(e.to_string()))?
            .ok_or(SelectionError::Cancelled)
    }
}
