//! JSON shapes exchanged with the analysis service.
//!
//! Self-contained apart from the domain model: request bodies borrow from the
//! caller, response bodies are decoded into [`crate::analysis::model`] types.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::analysis::model::{
    ClassificationResult, FormAnalysis, IssueStat, Measurement, SessionProgress,
};
use crate::error::PipelineError;
use crate::pose::{Keypoints, Point2};
use crate::session::ExerciseType;

pub const CLASSIFY_PATH: &str = "/classify_exercise";
pub const ANALYZE_PATH: &str = "/analyze_form";
pub const SESSION_PATH: &str = "/session";
pub const HEALTH_PATH: &str = "/health";
pub const VERSION_PATH: &str = "/version";

// --- Requests ---

#[derive(Debug, Serialize)]
pub struct ClassifyRequest<'a> {
    /// `data:image/jpeg;base64,...`
    pub image: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub image: &'a str,
    pub exercise_type: ExerciseType,
    /// Sent as `null` until the service has assigned one.
    pub session_id: Option<&'a str>,
}

// --- Responses ---

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    classification: ClassificationResult,
}

/// `[x, y]`, `[x, y, score]`, `[null, null]` or `null`.
type WireKeypoint = Option<Vec<Option<f64>>>;

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    analysis: AnalysisBody,
    #[serde(default)]
    keypoints: Option<Vec<WireKeypoint>>,
    #[serde(default)]
    session: Option<SessionBody>,
}

#[derive(Debug, Deserialize)]
struct AnalysisBody {
    overall: String,
    #[serde(default)]
    measurements: BTreeMap<String, Measurement>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    keypoints: Option<Vec<WireKeypoint>>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    common_issues: BTreeMap<String, IssueStat>,
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, PipelineError> {
    serde_json::from_str(body).map_err(|e| PipelineError::MalformedResponse(e.to_string()))
}

pub fn decode_classification(body: &str) -> Result<ClassificationResult, PipelineError> {
    parse::<ClassifyResponse>(body).map(|r| r.classification)
}

/// Decode an already sanitised analyze-form body.
pub fn decode_analysis(body: &str) -> Result<(FormAnalysis, Option<SessionProgress>), PipelineError> {
    let response: AnalyzeResponse = parse(body)?;

    // Top-level keypoints win over the nested copy
    let wire_keypoints = response
        .keypoints
        .or(response.analysis.keypoints)
        .unwrap_or_default();
    let keypoints = decode_keypoints(wire_keypoints)?;

    let analysis = FormAnalysis {
        overall: response.analysis.overall,
        measurements: response.analysis.measurements,
        issues: response.analysis.issues,
        keypoints,
    };

    let session = response.session.map(|s| SessionProgress {
        session_id: s.session_id,
        duration_secs: s.duration,
        common_issues: s.common_issues,
    });

    Ok((analysis, session))
}

fn decode_keypoints(wire: Vec<WireKeypoint>) -> Result<Keypoints, PipelineError> {
    let count = wire.len();
    let slots = wire
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            None => Ok(None),
            Some(coords) if coords.len() < 2 => Err(PipelineError::MalformedResponse(format!(
                "keypoint {i} has {} coordinates",
                coords.len()
            ))),
            Some(coords) => Ok(match (coords[0], coords[1]) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some(Point2::new(x, y)),
                _ => None,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Keypoints::from_slots(slots).ok_or_else(|| {
        PipelineError::MalformedResponse(format!("expected at most 17 keypoints, got {count}"))
    })
}
