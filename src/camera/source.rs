//! Exclusive ownership of a video input device.
//!
//! [`CameraSource::acquire`] claims the device, opens it, and starts a capture
//! thread that keeps the most recent image. [`CameraSource::release`] (also run
//! on drop) stops the thread and gives the claim back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::RgbImage;

use super::frame::{Frame, FrameSampler};
use crate::error::PipelineError;

/// Consecutive read failures after which the device is treated as lost.
const MAX_READ_FAILURES: u32 = 30;
const TARGET_INTERVAL: Duration = Duration::from_millis(33); // ~30fps

/// Requested capture geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub width: u32,
    pub height: u32,
}

/// An opened video device, read from the capture thread.
pub trait VideoDevice: Send + 'static {
    fn resolution(&self) -> (u32, u32);

    /// `Ok(None)` while no frame is ready yet.
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;
}

/// Opens devices of one kind.
pub trait CameraBackend {
    type Device: VideoDevice;

    /// Stable identifier used for the exclusivity claim.
    fn device_id(&self) -> String;

    fn open(&self, constraints: &Constraints) -> anyhow::Result<Self::Device>;
}

static CLAIMED: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn claim(device_id: &str) -> bool {
    let mut claimed = lock(&CLAIMED);
    if claimed.iter().any(|id| id == device_id) {
        return false;
    }
    claimed.push(device_id.to_string());
    true
}

fn unclaim(device_id: &str) {
    lock(&CLAIMED).retain(|id| id != device_id);
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<RgbImage>>,
    running: AtomicBool,
    lost: AtomicBool,
}

/// A live camera. At most one instance per device exists at a time.
pub struct CameraSource {
    device_id: String,
    resolution: (u32, u32),
    jpeg_quality: u8,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl CameraSource {
    pub fn acquire<B: CameraBackend>(
        backend: &B,
        constraints: Constraints,
        jpeg_quality: u8,
    ) -> Result<Self, PipelineError> {
        let device_id = backend.device_id();
        if !claim(&device_id) {
            log::error!("camera {device_id} is already in use");
            return Err(PipelineError::DeviceUnavailable(format!(
                "{device_id} is busy"
            )));
        }

        let device = match backend.open(&constraints) {
            Ok(device) => device,
            Err(e) => {
                unclaim(&device_id);
                log::error!("failed to open camera {device_id}: {e:#}");
                return Err(PipelineError::DeviceUnavailable(format!("{e:#}")));
            }
        };

        let resolution = device.resolution();
        log::info!(
            "camera {device_id} opened (requested {}x{}, actual {}x{})",
            constraints.width,
            constraints.height,
            resolution.0,
            resolution.1
        );

        let shared = Arc::new(Shared::default());
        shared.running.store(true, Ordering::Release);
        let handle = spawn_capture_thread(device, Arc::clone(&shared), device_id.clone());

        Ok(Self {
            device_id,
            resolution,
            jpeg_quality,
            shared,
            thread: Mutex::new(Some(handle)),
            released: AtomicBool::new(false),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn is_live(&self) -> bool {
        !self.released.load(Ordering::Acquire) && !self.shared.lost.load(Ordering::Acquire)
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = lock(&self.thread).take() {
            if handle.join().is_err() {
                log::warn!("camera {} capture thread panicked", self.device_id);
            }
        }
        lock(&self.shared.latest).take();
        unclaim(&self.device_id);
        log::info!("camera {} released", self.device_id);
    }
}

impl FrameSampler for CameraSource {
    fn sample(&self) -> Result<Frame, PipelineError> {
        if self.released.load(Ordering::Acquire) {
            return Err(PipelineError::DeviceUnavailable("camera released".into()));
        }
        if self.shared.lost.load(Ordering::Acquire) {
            return Err(PipelineError::DeviceUnavailable(format!(
                "{} stopped delivering frames",
                self.device_id
            )));
        }
        let image = lock(&self.shared.latest)
            .clone()
            .ok_or(PipelineError::NoActiveFrame)?;
        Frame::encode(&image, self.jpeg_quality)
    }

    fn release(&self) {
        CameraSource::release(self);
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn spawn_capture_thread<D: VideoDevice>(
    mut device: D,
    shared: Arc<Shared>,
    device_id: String,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut failures = 0u32;
        let mut seen_frame = false;
        while shared.running.load(Ordering::Acquire) {
            let start = Instant::now();
            let failure = match device.read_frame() {
                Ok(Some(image)) => {
                    failures = 0;
                    seen_frame = true;
                    *lock(&shared.latest) = Some(image);
                    None
                }
                // 起動直後の空フレームは待つ
                Ok(None) if !seen_frame => {
                    thread::sleep(Duration::from_millis(5));
                    None
                }
                // 一度映った後の空フレームは抜線とみなす
                Ok(None) => Some("no frame delivered".to_string()),
                Err(e) => Some(format!("{e:#}")),
            };
            if let Some(reason) = failure {
                failures += 1;
                log::warn!("[{device_id}] read error ({failures}): {reason}");
                if failures >= MAX_READ_FAILURES {
                    log::error!("[{device_id}] device lost after {failures} failed reads");
                    shared.lost.store(true, Ordering::Release);
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
            let elapsed = start.elapsed();
            if elapsed < TARGET_INTERVAL {
                thread::sleep(TARGET_INTERVAL - elapsed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeDevice {
        frames_before_ready: usize,
        dark_after: usize,
        reads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl VideoDevice for FakeDevice {
        fn resolution(&self) -> (u32, u32) {
            (32, 24)
        }

        fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("unplugged");
            }
            if n < self.frames_before_ready || n >= self.dark_after {
                return Ok(None);
            }
            Ok(Some(RgbImage::from_pixel(32, 24, image::Rgb([1, 2, 3]))))
        }
    }

    struct FakeBackend {
        id: &'static str,
        open_fails: bool,
        frames_before_ready: usize,
        dark_after: usize,
        fail_reads: bool,
        reads: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                open_fails: false,
                frames_before_ready: 0,
                dark_after: usize::MAX,
                fail_reads: false,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl CameraBackend for FakeBackend {
        type Device = FakeDevice;

        fn device_id(&self) -> String {
            self.id.to_string()
        }

        fn open(&self, _constraints: &Constraints) -> anyhow::Result<FakeDevice> {
            if self.open_fails {
                anyhow::bail!("permission denied");
            }
            Ok(FakeDevice {
                frames_before_ready: self.frames_before_ready,
                dark_after: self.dark_after,
                reads: Arc::clone(&self.reads),
                fail: self.fail_reads,
            })
        }
    }

    const CONSTRAINTS: Constraints = Constraints {
        width: 640,
        height: 480,
    };

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_sample_after_first_frame() {
        let backend = FakeBackend::new("fake:sample");
        let camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        assert_eq!(camera.resolution(), (32, 24));
        assert!(wait_for(|| camera.sample().is_ok()));
        let frame = camera.sample().unwrap();
        assert_eq!((frame.width, frame.height), (32, 24));
    }

    #[test]
    fn test_no_active_frame_while_starting() {
        let mut backend = FakeBackend::new("fake:starting");
        backend.frames_before_ready = usize::MAX;
        let camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        assert_eq!(camera.sample(), Err(PipelineError::NoActiveFrame));
    }

    #[test]
    fn test_open_failure_is_device_unavailable_and_unclaims() {
        let mut backend = FakeBackend::new("fake:denied");
        backend.open_fails = true;
        let err = CameraSource::acquire(&backend, CONSTRAINTS, 80).err().unwrap();
        assert!(matches!(err, PipelineError::DeviceUnavailable(ref msg) if msg.contains("permission denied")));

        backend.open_fails = false;
        assert!(CameraSource::acquire(&backend, CONSTRAINTS, 80).is_ok());
    }

    #[test]
    fn test_exclusive_until_released() {
        let backend = FakeBackend::new("fake:exclusive");
        let first = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        let second = CameraSource::acquire(&backend, CONSTRAINTS, 80);
        assert!(matches!(second, Err(PipelineError::DeviceUnavailable(_))));

        first.release();
        let third = CameraSource::acquire(&backend, CONSTRAINTS, 80);
        assert!(third.is_ok());
    }

    #[test]
    fn test_drop_releases_claim() {
        let backend = FakeBackend::new("fake:drop");
        {
            let _camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        }
        assert!(CameraSource::acquire(&backend, CONSTRAINTS, 80).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let backend = FakeBackend::new("fake:idempotent");
        let camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        camera.release();
        camera.release();
        assert!(!camera.is_live());
        assert!(matches!(camera.sample(), Err(PipelineError::DeviceUnavailable(_))));
        assert!(lock(&camera.shared.latest).is_none());
    }

    #[test]
    fn test_repeated_read_failures_mark_device_lost() {
        let mut backend = FakeBackend::new("fake:lost");
        backend.fail_reads = true;
        let camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        assert!(wait_for(|| !camera.is_live()));
        let err = camera.sample().unwrap_err();
        assert!(err.is_fatal());
        assert!(backend.reads.load(Ordering::SeqCst) >= MAX_READ_FAILURES as usize);
    }

    #[test]
    fn test_frames_stopping_after_start_mark_device_lost() {
        let mut backend = FakeBackend::new("fake:dark");
        backend.dark_after = 3;
        let camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        assert!(wait_for(|| !camera.is_live()));
        assert!(matches!(
            camera.sample(),
            Err(PipelineError::DeviceUnavailable(_))
        ));
        assert!(backend.reads.load(Ordering::SeqCst) >= 3 + MAX_READ_FAILURES as usize);
    }

    #[test]
    fn test_empty_reads_before_first_frame_are_not_failures() {
        let mut backend = FakeBackend::new("fake:warmup");
        backend.frames_before_ready = usize::MAX;
        let camera = CameraSource::acquire(&backend, CONSTRAINTS, 80).unwrap();
        assert!(wait_for(|| {
            backend.reads.load(Ordering::SeqCst) > MAX_READ_FAILURES as usize * 2
        }));
        assert!(camera.is_live());
        assert_eq!(camera.sample(), Err(PipelineError::NoActiveFrame));
    }
}
