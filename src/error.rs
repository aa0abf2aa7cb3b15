use std::fmt;

use thiserror::Error;

/// Remote call that produced a [`PipelineError::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classify,
    Analyze,
    Session,
    Health,
    Version,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Analyze => "analyze",
            Stage::Session => "session",
            Stage::Health => "health",
            Stage::Version => "version",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the capture-and-analysis pipeline.
///
/// Only [`PipelineError::DeviceUnavailable`] leaves the pipeline
/// non-operational; everything else is scoped to a single tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("no video frame available yet")]
    NoActiveFrame,
    #[error("{stage} request failed{}: {message}", status_suffix(.status))]
    Remote {
        stage: Stage,
        status: Option<u16>,
        message: String,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("frame encoding failed: {0}")]
    Encode(String),
    #[error("{0}")]
    InvalidState(&'static str),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl PipelineError {
    pub fn remote(stage: Stage, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Remote {
            stage,
            status,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::DeviceUnavailable(_))
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Remote { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
