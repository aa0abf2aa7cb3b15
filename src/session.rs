//! Session correlation across successive analyze-form calls.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exercise the form analysis is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseType {
    #[default]
    Squat,
}

impl ExerciseType {
    pub const ALL: [ExerciseType; 1] = [ExerciseType::Squat];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseType::Squat => "squat",
        }
    }
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExerciseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExerciseType::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported exercise type '{}'", s.trim()))
    }
}

/// Client-side view of one capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSession {
    pub session_id: Option<String>,
    pub exercise: ExerciseType,
}

/// Holds the server-assigned session id.
///
/// The first id seen is kept for the rest of the session; later candidates
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    session: CaptureSession,
}

impl SessionTracker {
    pub fn new(exercise: ExerciseType) -> Self {
        Self {
            session: CaptureSession {
                session_id: None,
                exercise,
            },
        }
    }

    /// Returns true when `candidate` became the held id.
    pub fn adopt(&mut self, candidate: Option<&str>) -> bool {
        if self.session.session_id.is_some() {
            return false;
        }
        match candidate.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                log::info!("adopted session {id}");
                self.session.session_id = Some(id.to_string());
                true
            }
            None => false,
        }
    }

    /// Forgets the held id so the next response can start a new session.
    pub fn clear(&mut self) -> Option<String> {
        self.session.session_id.take()
    }

    pub fn current(&self) -> Option<&str> {
        self.session.session_id.as_deref()
    }

    pub fn exercise(&self) -> ExerciseType {
        self.session.exercise
    }

    pub fn set_exercise(&mut self, exercise: ExerciseType) {
        self.session.exercise = exercise;
    }
}
