pub mod client;
pub mod http;
pub mod model;
pub mod sanitize;

pub use client::{AnalysisClient, AnalysisService};
pub use http::HttpAnalysisService;
pub use model::{
    ClassificationResult, FormAnalysis, HealthStatus, IssueStat, Measurement, RoundTrip,
    ServiceVersion, SessionProgress, SessionSummary, TopIssue,
};
pub use sanitize::sanitize;
