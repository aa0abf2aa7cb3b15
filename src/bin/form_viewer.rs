use anyhow::Result;
use std::sync::Arc;

use liftmate::analysis::{AnalysisClient, HttpAnalysisService};
use liftmate::camera::acquire_camera;
use liftmate::config::{Config, DEFAULT_CONFIG_PATH};
use liftmate::logging;
use liftmate::render::{Key, OverlayCanvas, OverlayWindow};
use liftmate::scheduler::{AnalysisSnapshot, CaptureScheduler, CaptureState};

type Scheduler = CaptureScheduler<HttpAnalysisService>;

fn title(snapshot: &AnalysisSnapshot) -> String {
    let mut title = format!("LiftMate [{} / {}]", snapshot.exercise, snapshot.state.as_str());
    if let Some(form) = &snapshot.form {
        title.push_str(&format!(" {} - {} issue(s)", form.overall, form.issues.len()));
    }
    if let Some(err) = &snapshot.error {
        title.push_str(&format!(" ! {err}"));
    }
    title
}

fn toggle_capture(scheduler: &Scheduler) {
    if scheduler.state() == CaptureState::Capturing {
        scheduler.stop();
    } else if let Err(e) = scheduler.start() {
        log::warn!("cannot start capture: {e}");
    }
}

/// 今のカメラを手放してから掴み直す
fn reacquire(scheduler: &Scheduler, config: &Config) {
    scheduler.teardown();
    let camera = match acquire_camera(&config.camera) {
        Ok(camera) => camera,
        Err(e) => {
            log::warn!("cannot acquire camera: {e}");
            return;
        }
    };
    let id = camera.device_id().to_string();
    let (w, h) = camera.resolution();
    match scheduler.attach_camera(Arc::new(camera)) {
        Ok(()) => log::info!("camera {id} ready ({w}x{h})"),
        Err(e) => log::warn!("cannot attach camera: {e}"),
    }
}

fn run(scheduler: &Arc<Scheduler>, config: &Config) -> Result<()> {
    let width = config.overlay.width as usize;
    let height = config.overlay.height as usize;
    let mut canvas = OverlayCanvas::new(width, height);
    let mut window = OverlayWindow::new("LiftMate", width, height)?;
    let mut updates = scheduler.subscribe();
    window.set_title(&title(&updates.borrow_and_update()));

    while window.is_open() {
        if window.pressed(Key::Space) {
            toggle_capture(scheduler);
        }
        if window.pressed(Key::C) {
            let scheduler = Arc::clone(scheduler);
            tokio::spawn(async move {
                if let Err(e) = scheduler.capture_once().await {
                    log::warn!("capture once failed: {e}");
                }
            });
        }
        if window.pressed(Key::A) {
            reacquire(scheduler, config);
        }
        if window.pressed(Key::P) {
            let path = format!("overlay_{}.png", chrono::Local::now().format("%Y%m%d_%H%M%S"));
            match canvas.save_png(&path) {
                Ok(()) => log::info!("saved {path}"),
                Err(e) => log::warn!("{e:#}"),
            }
        }

        if updates.has_changed().unwrap_or(false) {
            let snapshot = updates.borrow_and_update().clone();
            match &snapshot.form {
                Some(form) => {
                    canvas.render(&form.keypoints);
                }
                None => canvas.clear(),
            }
            window.set_title(&title(&snapshot));
        }

        window.present(&canvas)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, fallback) = Config::load_or_default(&config_path);
    logging::init(&config.logging, "form_viewer")?;
    if let Some(e) = fallback {
        log::warn!("{e:#}; using default configuration");
    }
    log::info!("Form Viewer ({})", env!("LIFTMATE_BUILD"));
    log::info!("Space: start/stop, C: capture once, A: acquire camera, P: save overlay, Esc: quit");

    let service = HttpAnalysisService::from_config(&config.server);
    log::info!("server: {}", service.base_url());
    let scheduler = Arc::new(CaptureScheduler::from_config(
        AnalysisClient::new(service),
        &config.capture,
    ));

    // 失敗してもウィンドウは開き、A キーで掴み直せる
    reacquire(&scheduler, &config);
    let result = run(&scheduler, &config);

    scheduler.teardown();
    log::info!("Shutting down...");
    result
}
