use async_trait::async_trait;

use super::model::{ClassificationResult, RoundTrip};
use super::sanitize::sanitize;
use crate::camera::Frame;
use crate::error::PipelineError;
use crate::protocol;
use crate::session::ExerciseType;

/// Transport for the two remote analysis stages.
///
/// Non-success responses come back as [`PipelineError::Remote`] tagged with
/// the stage that failed.
#[async_trait]
pub trait AnalysisService: Send + Sync + 'static {
    async fn classify(&self, frame: &Frame) -> Result<ClassificationResult, PipelineError>;

    /// Returns the raw, unsanitised response body.
    async fn analyze_form(
        &self,
        frame: &Frame,
        exercise: ExerciseType,
        session_id: Option<&str>,
    ) -> Result<String, PipelineError>;
}

/// Runs classify then analyze-form for one frame.
pub struct AnalysisClient<S> {
    service: S,
}

impl<S: AnalysisService> AnalysisClient<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Both stages must succeed; a failed classify never reaches analyze.
    pub async fn round_trip(
        &self,
        frame: &Frame,
        exercise: ExerciseType,
        session_id: Option<&str>,
    ) -> Result<RoundTrip, PipelineError> {
        let classification = self.service.classify(frame).await?;
        log::debug!(
            "classified as {} ({:.1}%)",
            classification.exercise,
            classification.confidence
        );

        let raw = self.service.analyze_form(frame, exercise, session_id).await?;
        let body = sanitize(&raw);
        let (analysis, session) = protocol::decode_analysis(&body).map_err(|e| {
            log::warn!("unparseable analyze-form body: {}", truncate(&body, 200));
            e
        })?;

        Ok(RoundTrip {
            classification,
            analysis,
            session,
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
