use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pose::Keypoints;

/// Stage-one result: which exercise the frame shows.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClassificationResult {
    pub exercise: String,
    /// Percent, 0〜100.
    pub confidence: f64,
    #[serde(default, alias = "allConfidences")]
    pub all_confidences: BTreeMap<String, f64>,
}

/// A joint angle, or an explicit marker that it could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Measurement {
    Degrees(f64),
    Undetectable,
}

impl Measurement {
    pub fn degrees(&self) -> Option<f64> {
        match self {
            Measurement::Degrees(d) => Some(*d),
            Measurement::Undetectable => None,
        }
    }
}

impl From<Option<f64>> for Measurement {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(d) if d.is_finite() => Measurement::Degrees(d),
            _ => Measurement::Undetectable,
        }
    }
}

impl From<Measurement> for Option<f64> {
    fn from(value: Measurement) -> Self {
        value.degrees()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Degrees(d) => write!(f, "{d:.1}°"),
            Measurement::Undetectable => f.write_str("N/A"),
        }
    }
}

/// Stage-two result, replaced wholesale on every successful tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormAnalysis {
    pub overall: String,
    pub measurements: BTreeMap<String, Measurement>,
    pub issues: Vec<String>,
    pub keypoints: Keypoints,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IssueStat {
    pub count: u32,
    pub percentage: f64,
}

/// Running session statistics echoed by every analyze-form response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionProgress {
    pub session_id: Option<String>,
    pub duration_secs: Option<f64>,
    pub common_issues: BTreeMap<String, IssueStat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TopIssue {
    pub issue: String,
    pub count: u32,
    pub percentage: f64,
}

/// `GET /session/<id>` and `DELETE /session/<id>` body.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionSummary {
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub exercise_type: Option<String>,
    #[serde(default)]
    pub duration: f64,
    /// Share of frames judged good or fair, percent.
    #[serde(default)]
    pub form_quality: f64,
    #[serde(default)]
    pub top_issues: Vec<TopIssue>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceVersion {
    pub api_version: String,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub supported_exercises: Vec<String>,
}

/// Everything one successful sample-and-analyze round trip produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTrip {
    pub classification: ClassificationResult,
    pub analysis: FormAnalysis,
    pub session: Option<SessionProgress>,
}

impl RoundTrip {
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref()?.session_id.as_deref()
    }
}
