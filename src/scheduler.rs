//! Capture scheduling.
//!
//! `CaptureScheduler` owns the attached camera, the session tracker and the
//! displayed analysis state. While capturing, a ticker task fires every
//! interval and each firing runs its own sample→analyze round trip without
//! waiting for earlier ones. Every firing gets a sequence number when it
//! starts; a completion is applied only if no later-started tick has been
//! applied already, so a slow response can never overwrite a newer one.
//!
//! The displayed state is published on a `watch` channel after every change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::analysis::{AnalysisClient, AnalysisService, ClassificationResult, FormAnalysis};
use crate::analysis::{RoundTrip, SessionProgress};
use crate::camera::FrameSampler;
use crate::config::CaptureConfig;
use crate::error::PipelineError;
use crate::session::{ExerciseType, SessionTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
        }
    }
}

/// What the user currently sees.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisSnapshot {
    pub state: CaptureState,
    pub exercise: ExerciseType,
    pub camera_attached: bool,
    pub session_id: Option<String>,
    pub classification: Option<ClassificationResult>,
    pub form: Option<FormAnalysis>,
    pub progress: Option<SessionProgress>,
    /// Last surfaced error. Cleared by the next successful tick.
    pub error: Option<PipelineError>,
    /// Sequence number of the last applied tick, 0 before any.
    pub last_tick: u64,
}

struct Inner {
    snapshot: AnalysisSnapshot,
    tracker: SessionTracker,
    camera: Option<Arc<dyn FrameSampler>>,
    cancel: Option<CancellationToken>,
    next_tick: u64,
    /// Ticks numbered at or below this started before the last session
    /// clear and may not adopt an id.
    session_floor: u64,
}

struct Shared<S> {
    client: AnalysisClient<S>,
    interval: Duration,
    inner: Mutex<Inner>,
    tx: watch::Sender<AnalysisSnapshot>,
}

pub struct CaptureScheduler<S: AnalysisService> {
    shared: Arc<Shared<S>>,
}

impl<S: AnalysisService> CaptureScheduler<S> {
    pub fn new(client: AnalysisClient<S>, interval: Duration, exercise: ExerciseType) -> Self {
        let snapshot = AnalysisSnapshot {
            exercise,
            ..Default::default()
        };
        let (tx, _rx) = watch::channel(snapshot.clone());

        Self {
            shared: Arc::new(Shared {
                client,
                interval,
                inner: Mutex::new(Inner {
                    snapshot,
                    tracker: SessionTracker::new(exercise),
                    camera: None,
                    cancel: None,
                    next_tick: 0,
                    session_floor: 0,
                }),
                tx,
            }),
        }
    }

    pub fn from_config(client: AnalysisClient<S>, config: &CaptureConfig) -> Self {
        Self::new(client, config.interval(), config.exercise)
    }

    pub fn client(&self) -> &AnalysisClient<S> {
        &self.shared.client
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.shared.lock().snapshot.clone()
    }

    pub fn state(&self) -> CaptureState {
        self.shared.lock().snapshot.state
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.lock().tracker.current().map(str::to_string)
    }

    /// Hands a freshly acquired camera to the scheduler. Any previously
    /// attached camera is released. Clears a recorded device error.
    pub fn attach_camera(&self, camera: Arc<dyn FrameSampler>) -> Result<(), PipelineError> {
        let previous = {
            let mut inner = self.shared.lock();
            if inner.snapshot.state == CaptureState::Capturing {
                return Err(PipelineError::InvalidState(
                    "cannot swap the camera while capturing",
                ));
            }
            let previous = inner.camera.replace(camera);
            inner.snapshot.camera_attached = true;
            if inner.snapshot.error.as_ref().is_some_and(PipelineError::is_fatal) {
                inner.snapshot.error = None;
            }
            self.shared.publish(&inner);
            previous
        };
        if let Some(previous) = previous {
            previous.release();
        }
        Ok(())
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        if inner.snapshot.state == CaptureState::Capturing {
            return Err(PipelineError::InvalidState("already capturing"));
        }
        if inner.camera.is_none() {
            return Err(PipelineError::InvalidState("no camera attached"));
        }

        let cancel = CancellationToken::new();
        tokio::spawn(ticker_loop(Arc::clone(&self.shared), cancel.clone()));
        inner.cancel = Some(cancel);
        inner.snapshot.state = CaptureState::Capturing;
        log::info!(
            "capture started ({} every {:?})",
            inner.tracker.exercise(),
            self.shared.interval
        );
        self.shared.publish(&inner);
        Ok(())
    }

    /// Returns false when not capturing. In-flight round trips still complete
    /// and are applied.
    pub fn stop(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.snapshot.state != CaptureState::Capturing {
            return false;
        }
        self.shared.halt(&mut inner);
        log::info!("capture stopped");
        self.shared.publish(&inner);
        true
    }

    /// Runs one round trip outside the periodic schedule. Idle only.
    ///
    /// Returns the tick's own outcome, whether or not it was applied.
    pub async fn capture_once(&self) -> Result<(), PipelineError> {
        let seq = {
            let mut inner = self.shared.lock();
            if inner.snapshot.state == CaptureState::Capturing {
                return Err(PipelineError::InvalidState(
                    "capture once is unavailable while capturing",
                ));
            }
            if inner.camera.is_none() {
                return Err(PipelineError::InvalidState("no camera attached"));
            }
            inner.next_tick += 1;
            inner.next_tick
        };
        run_tick(Arc::clone(&self.shared), seq).await
    }

    pub fn set_exercise(&self, exercise: ExerciseType) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        if inner.snapshot.state == CaptureState::Capturing {
            return Err(PipelineError::InvalidState(
                "exercise can only be changed while idle",
            ));
        }
        inner.tracker.set_exercise(exercise);
        inner.snapshot.exercise = exercise;
        self.shared.publish(&inner);
        Ok(())
    }

    /// Drops the held session id so the next response can start a new one.
    pub fn clear_session(&self) -> Result<Option<String>, PipelineError> {
        let mut inner = self.shared.lock();
        if inner.snapshot.state == CaptureState::Capturing {
            return Err(PipelineError::InvalidState(
                "session can only be cleared while idle",
            ));
        }
        let cleared = inner.tracker.clear();
        inner.session_floor = inner.next_tick;
        inner.snapshot.session_id = None;
        inner.snapshot.progress = None;
        self.shared.publish(&inner);
        Ok(cleared)
    }

    /// Cancels the timer and releases the camera. Safe to call on any path,
    /// any number of times.
    pub fn teardown(&self) {
        let camera = {
            let mut inner = self.shared.lock();
            self.shared.halt(&mut inner);
            let camera = inner.camera.take();
            inner.snapshot.camera_attached = false;
            self.shared.publish(&inner);
            camera
        };
        if let Some(camera) = camera {
            log::info!("releasing camera");
            camera.release();
        }
    }
}

impl<S: AnalysisService> Drop for CaptureScheduler<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<S: AnalysisService> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.tx.send_replace(inner.snapshot.clone());
    }

    fn halt(&self, inner: &mut Inner) {
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        inner.snapshot.state = CaptureState::Idle;
    }

    /// Applies a finished tick.
    fn complete(&self, seq: u64, result: Result<RoundTrip, PipelineError>) {
        let released = {
            let mut inner = self.lock();

            // A lost device is reported whatever its ordering.
            let fatal = matches!(&result, Err(e) if e.is_fatal());
            if !fatal && seq <= inner.snapshot.last_tick {
                log::debug!(
                    "tick {seq} superseded by tick {}, dropping result",
                    inner.snapshot.last_tick
                );
                return;
            }
            inner.snapshot.last_tick = inner.snapshot.last_tick.max(seq);

            let mut released = None;
            match result {
                Ok(round_trip) => {
                    if seq > inner.session_floor {
                        let session_id = round_trip.session_id().map(str::to_string);
                        inner.tracker.adopt(session_id.as_deref());
                        inner.snapshot.session_id =
                            inner.tracker.current().map(str::to_string);
                        if round_trip.session.is_some() {
                            inner.snapshot.progress = round_trip.session;
                        }
                    } else {
                        log::debug!("tick {seq} predates the session clear, not adopting");
                    }
                    log::debug!(
                        "tick {seq}: {} / {} ({} issues)",
                        round_trip.classification.exercise,
                        round_trip.analysis.overall,
                        round_trip.analysis.issues.len()
                    );
                    inner.snapshot.classification = Some(round_trip.classification);
                    inner.snapshot.form = Some(round_trip.analysis);
                    inner.snapshot.error = None;
                }
                Err(err) if err.is_fatal() => {
                    log::error!("tick {seq}: {err}");
                    self.halt(&mut inner);
                    released = inner.camera.take();
                    inner.snapshot.camera_attached = false;
                    inner.snapshot.error = Some(err);
                }
                Err(err) => {
                    log::warn!("tick {seq}: {err}");
                    inner.snapshot.error = Some(err);
                }
            }
            self.publish(&inner);
            released
        };

        if let Some(camera) = released {
            camera.release();
        }
    }
}

async fn ticker_loop<S: AnalysisService>(shared: Arc<Shared<S>>, cancel: CancellationToken) {
    let period = shared.interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("ticker shutting down");
                break;
            }
            _ = ticker.tick() => {
                let seq = {
                    let mut inner = shared.lock();
                    inner.next_tick += 1;
                    inner.next_tick
                };
                tokio::spawn(run_tick(Arc::clone(&shared), seq));
            }
        }
    }
}

async fn run_tick<S: AnalysisService>(shared: Arc<Shared<S>>, seq: u64) -> Result<(), PipelineError> {
    let (camera, exercise, session_id) = {
        let inner = shared.lock();
        (
            inner.camera.clone(),
            inner.tracker.exercise(),
            inner.tracker.current().map(str::to_string),
        )
    };
    let Some(camera) = camera else {
        return Err(PipelineError::InvalidState("no camera attached"));
    };

    let frame = match camera.sample() {
        Ok(frame) => frame,
        Err(PipelineError::NoActiveFrame) => {
            log::debug!("tick {seq}: no frame yet, skipping");
            return Err(PipelineError::NoActiveFrame);
        }
        Err(err) => {
            shared.complete(seq, Err(err.clone()));
            return Err(err);
        }
    };
    drop(camera);

    let result = shared
        .client
        .round_trip(&frame, exercise, session_id.as_deref())
        .await;
    let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
    shared.complete(seq, result);
    outcome
}
