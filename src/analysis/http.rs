//! HTTP transport for the analysis service.
//!
//! `ureq` is blocking, so every call runs on tokio's blocking pool and the
//! scheduler's event loop never stalls on the network.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::client::AnalysisService;
use super::model::{ClassificationResult, HealthStatus, ServiceVersion, SessionSummary};
use crate::camera::Frame;
use crate::config::ServerConfig;
use crate::error::{PipelineError, Stage};
use crate::protocol::{
    self, AnalyzeRequest, ClassifyRequest, ANALYZE_PATH, CLASSIFY_PATH, HEALTH_PATH,
    SESSION_PATH, VERSION_PATH,
};
use crate::session::ExerciseType;

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Delete,
}

/// `{"error": "..."}` body the service sends with non-success statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct HttpAnalysisService {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpAnalysisService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.base_url, config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        stage: Stage,
        method: Method,
        path: &str,
        payload: Option<String>,
    ) -> Result<String, PipelineError> {
        let agent = self.agent.clone();
        let url = format!("{}{}", self.base_url, path);
        log::debug!("{stage}: {method:?} {url}");

        tokio::task::spawn_blocking(move || {
            let request = match method {
                Method::Get => agent.get(&url),
                Method::Post => agent.post(&url),
                Method::Delete => agent.delete(&url),
            };
            let result = match payload {
                Some(body) => request
                    .set("Content-Type", "application/json")
                    .send_string(&body),
                None => request.call(),
            };
            let response = result.map_err(|e| map_call_error(stage, e))?;
            response
                .into_string()
                .map_err(|e| PipelineError::remote(stage, None, format!("failed to read body: {e}")))
        })
        .await
        .map_err(|e| PipelineError::remote(stage, None, format!("request worker failed: {e}")))?
    }

    async fn fetch_json<T: DeserializeOwned>(&self, stage: Stage, method: Method, path: &str) -> Result<T, PipelineError> {
        let body = self.send(stage, method, path, None).await?;
        serde_json::from_str(&body).map_err(|e| PipelineError::MalformedResponse(e.to_string()))
    }

    pub async fn health(&self) -> Result<HealthStatus, PipelineError> {
        self.fetch_json(Stage::Health, Method::Get, HEALTH_PATH).await
    }

    pub async fn version(&self) -> Result<ServiceVersion, PipelineError> {
        self.fetch_json(Stage::Version, Method::Get, VERSION_PATH).await
    }

    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary, PipelineError> {
        let path = format!("{SESSION_PATH}/{session_id}");
        self.fetch_json(Stage::Session, Method::Get, &path).await
    }

    /// Closes the session server-side and returns its final summary.
    pub async fn end_session(&self, session_id: &str) -> Result<SessionSummary, PipelineError> {
        let path = format!("{SESSION_PATH}/{session_id}");
        self.fetch_json(Stage::Session, Method::Delete, &path).await
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<String, PipelineError> {
    serde_json::to_string(value).map_err(|e| PipelineError::Encode(e.to_string()))
}

fn map_call_error(stage: Stage, err: ureq::Error) -> PipelineError {
    match err {
        ureq::Error::Status(code, response) => {
            let status_text = response.status_text().to_string();
            let message = response
                .into_string()
                .ok()
                .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
                .map(|b| b.error)
                .unwrap_or(status_text);
            log::warn!("{stage} failed with HTTP {code}: {message}");
            PipelineError::remote(stage, Some(code), message)
        }
        ureq::Error::Transport(transport) => {
            log::warn!("{stage} transport error: {transport}");
            PipelineError::remote(stage, None, transport.to_string())
        }
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn classify(&self, frame: &Frame) -> Result<ClassificationResult, PipelineError> {
        let image = frame.to_data_url();
        let payload = to_payload(&ClassifyRequest { image: &image })?;
        let body = self
            .send(Stage::Classify, Method::Post, CLASSIFY_PATH, Some(payload))
            .await?;
        protocol::decode_classification(&body)
    }

    async fn analyze_form(
        &self,
        frame: &Frame,
        exercise: ExerciseType,
        session_id: Option<&str>,
    ) -> Result<String, PipelineError> {
        let image = frame.to_data_url();
        let payload = to_payload(&AnalyzeRequest {
            image: &image,
            exercise_type: exercise,
            session_id,
        })?;
        self.send(Stage::Analyze, Method::Post, ANALYZE_PATH, Some(payload))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    struct Canned {
        status: u16,
        reason: &'static str,
        body: String,
    }

    impl Canned {
        fn ok(body: &str) -> Self {
            Self {
                status: 200,
                reason: "OK",
                body: body.to_string(),
            }
        }
    }

    struct Recorded {
        request_line: String,
        body: String,
    }

    /// Answers one connection per canned response, then exits.
    fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<Recorded>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut recorded = Vec::new();
            for canned in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();

                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();

                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    canned.status,
                    canned.reason,
                    canned.body.len(),
                    canned.body
                )
                .unwrap();
                stream.flush().unwrap();

                recorded.push(Recorded {
                    request_line: request_line.trim_end().to_string(),
                    body: String::from_utf8(body).unwrap(),
                });
            }
            recorded
        });

        (base_url, handle)
    }

    fn frame() -> Frame {
        Frame {
            width: 2,
            height: 2,
            jpeg_data: vec![0xFF, 0xD8, 0xFF],
        }
    }

    fn service(base_url: &str) -> HttpAnalysisService {
        HttpAnalysisService::new(base_url, Duration::from_secs(5))
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        assert_eq!(service("http://10.0.0.5:5000/").base_url(), "http://10.0.0.5:5000");
        assert_eq!(service("http://localhost:5000").base_url(), "http://localhost:5000");
    }

    #[tokio::test]
    async fn test_classify_posts_data_url() {
        let (url, server) = serve(vec![Canned::ok(
            r#"{"classification":{"exercise":"squat","confidence":93.1,"all_confidences":{"squat":93.1,"lunge":6.9}}}"#,
        )]);

        let result = service(&url).classify(&frame()).await.unwrap();
        assert_eq!(result.exercise, "squat");
        assert_eq!(result.all_confidences.len(), 2);

        let recorded = server.join().unwrap();
        assert_eq!(recorded[0].request_line, "POST /classify_exercise HTTP/1.1");
        let sent: serde_json::Value = serde_json::from_str(&recorded[0].body).unwrap();
        assert_eq!(sent["image"], "data:image/jpeg;base64,/9j/");
    }

    #[tokio::test]
    async fn test_analyze_returns_raw_body() {
        let raw = r#"{"analysis":{"overall":"good","measurements":{"knee_angle": NaN},"issues":[]},"keypoints":[]}"#;
        let (url, server) = serve(vec![Canned::ok(raw)]);

        let body = service(&url)
            .analyze_form(&frame(), ExerciseType::Squat, Some("s-42"))
            .await
            .unwrap();
        assert_eq!(body, raw);

        let recorded = server.join().unwrap();
        assert_eq!(recorded[0].request_line, "POST /analyze_form HTTP/1.1");
        let sent: serde_json::Value = serde_json::from_str(&recorded[0].body).unwrap();
        assert_eq!(sent["exercise_type"], "squat");
        assert_eq!(sent["session_id"], "s-42");
    }

    #[tokio::test]
    async fn test_non_success_status_is_remote_error() {
        let (url, server) = serve(vec![Canned {
            status: 400,
            reason: "BAD REQUEST",
            body: r#"{"error": "No image provided"}"#.to_string(),
        }]);

        let err = service(&url).classify(&frame()).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::remote(Stage::Classify, Some(400), "No image provided")
        );
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_status_without_error_body_uses_reason() {
        let (url, server) = serve(vec![Canned {
            status: 503,
            reason: "Service Unavailable",
            body: String::new(),
        }]);

        let err = service(&url)
            .analyze_form(&frame(), ExerciseType::Squat, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::remote(Stage::Analyze, Some(503), "Service Unavailable")
        );
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_has_no_status() {
        let url = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };

        let err = service(&url).classify(&frame()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Remote { stage: Stage::Classify, status: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_session_summary_and_end() {
        let summary = r#"{"session_id":"abc","exercise_type":"squat","duration":42.0,"form_quality":80.0,"top_issues":[{"issue":"Hips are not level. Balance your weight evenly.","count":5,"percentage":31.2}],"completed":false}"#;
        let ended = r#"{"session_id":"abc","exercise_type":"squat","duration":43.5,"form_quality":80.0,"top_issues":[],"completed":true}"#;
        let (url, server) = serve(vec![Canned::ok(summary), Canned::ok(ended)]);
        let svc = service(&url);

        let s = svc.session_summary("abc").await.unwrap();
        assert_eq!(s.top_issues.len(), 1);
        assert!(!s.completed);

        let e = svc.end_session("abc").await.unwrap();
        assert!(e.completed);

        let recorded = server.join().unwrap();
        assert_eq!(recorded[0].request_line, "GET /session/abc HTTP/1.1");
        assert_eq!(recorded[1].request_line, "DELETE /session/abc HTTP/1.1");
    }

    #[tokio::test]
    async fn test_health_and_version() {
        let (url, server) = serve(vec![
            Canned::ok(r#"{"status":"ok","timestamp":1710000000.0}"#),
            Canned::ok(r#"{"api_version":"0.2.0","model_version":"pose-n","supported_exercises":["squat"]}"#),
        ]);
        let svc = service(&format!("{url}/"));

        assert_eq!(svc.health().await.unwrap().status, "ok");
        let version = svc.version().await.unwrap();
        assert_eq!(version.api_version, "0.2.0");
        assert_eq!(version.supported_exercises, vec!["squat".to_string()]);

        let recorded = server.join().unwrap();
        assert_eq!(recorded[0].request_line, "GET /health HTTP/1.1");
        assert_eq!(recorded[1].request_line, "GET /version HTTP/1.1");
    }
}
