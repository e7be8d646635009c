//! Error types and result definitions.
//!
//! Every failure of a fusion run is reported as a [`FusionError`] naming the
//! [`Stage`] it happened in, a short context string and the underlying cause.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::ModelError;
use crate::fusion::output::OutputError;
use crate::fusion::policy::PolicyError;
use crate::parsing::ParseError;
use crate::sources::SourceError;
use crate::storage::external_sort::SortError;
use crate::storage::merge_join::MergeError;

/// Result type alias for fusion operations.
pub type Result<T> = std::result::Result<T, FusionError>;

/// Phase of a fusion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Ingest,
    Sort,
    Merge,
    Stream,
    Resolve,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Ingest => "ingest",
            Stage::Sort => "sort",
            Stage::Merge => "merge",
            Stage::Stream => "stream",
            Stage::Resolve => "resolve",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Underlying cause of a stage failure.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Sort(#[from] SortError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Main error type of a fusion run.
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("{stage} failed ({context}): {source}")]
    Stage {
        stage: Stage,
        context: String,
        #[source]
        source: StageError,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("fusion run was cancelled")]
    Cancelled,
}

impl FusionError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FusionError::Stage { stage, .. } => Some(*stage),
            FusionError::Config(_) => Some(Stage::Config),
            FusionError::Cancelled => None,
        }
    }
}

/// Attaches a [`Stage`] and context to a lower-level error.
pub trait StageContext<T> {
    fn stage(self, stage: Stage, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<StageError>> StageContext<T> for std::result::Result<T, E> {
    fn stage(self, stage: Stage, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| FusionError::Stage {
            stage,
            context: context.into(),
            source: source.into(),
        })
    }
}
