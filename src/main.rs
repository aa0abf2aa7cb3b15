use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

use liftmate::analysis::{AnalysisClient, HttpAnalysisService, SessionSummary};
use liftmate::camera::acquire_camera;
use liftmate::config::{Config, DEFAULT_CONFIG_PATH};
use liftmate::logging;
use liftmate::pose::KeypointIndex;
use liftmate::scheduler::{AnalysisSnapshot, CaptureScheduler, CaptureState};
use liftmate::session::ExerciseType;

type Scheduler = CaptureScheduler<HttpAnalysisService>;

fn print_help() {
    println!("Commands:");
    println!("  start | stop        - toggle periodic capture");
    println!("  once                - analyze a single frame (idle only)");
    println!("  exercise <name>     - select exercise (idle only)");
    println!("  acquire             - (re)open the camera");
    println!("  status              - capture state and session");
    println!("  snapshot            - latest classification and form feedback");
    println!("  summary             - server-side session summary");
    println!("  end                 - end the session on the server");
    println!("  health | version    - check the analysis service");
    println!("  help | quit");
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// stdin の行をチャンネルへ流す
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line.trim().to_string()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn acquire(scheduler: &Scheduler, config: &Config) {
    // 同じデバイスを掴み直す前に手放す
    scheduler.teardown();
    match acquire_camera(&config.camera) {
        Ok(camera) => {
            let (w, h) = camera.resolution();
            let id = camera.device_id().to_string();
            match scheduler.attach_camera(Arc::new(camera)) {
                Ok(()) => println!("Camera {id} ready ({w}x{h})"),
                Err(e) => println!("Error: {e}"),
            }
        }
        Err(e) => println!("Error: {e}"),
    }
}

fn print_status(snapshot: &AnalysisSnapshot) {
    println!("  state:    {}", snapshot.state.as_str());
    println!("  exercise: {}", snapshot.exercise);
    println!("  camera:   {}", if snapshot.camera_attached { "attached" } else { "none" });
    println!(
        "  session:  {}",
        snapshot.session_id.as_deref().unwrap_or("(none)")
    );
    println!("  ticks:    {}", snapshot.last_tick);
    if let Some(err) = &snapshot.error {
        println!("  error:    {err}");
    }
}

fn print_snapshot(snapshot: &AnalysisSnapshot) {
    match &snapshot.classification {
        Some(c) => {
            println!("Detected: {} ({:.1}%)", c.exercise, c.confidence);
            for (name, confidence) in &c.all_confidences {
                println!("  {name}: {confidence:.1}%");
            }
        }
        None => println!("No classification yet"),
    }

    if let Some(form) = &snapshot.form {
        println!("Overall: {}", form.overall);
        for (name, value) in &form.measurements {
            println!("  {name}: {value}");
        }
        if form.issues.is_empty() {
            println!("  No issues detected");
        }
        for issue in &form.issues {
            println!("  - {issue}");
        }
        println!("  keypoints: {}/17", form.keypoints.present_count());
        if !form.keypoints.is_empty() {
            let missing: Vec<_> = (0..KeypointIndex::COUNT)
                .filter_map(KeypointIndex::from_index)
                .filter(|&i| form.keypoints.get(i).is_none())
                .map(|i| i.name())
                .collect();
            if !missing.is_empty() {
                println!("  not detected: {}", missing.join(", "));
            }
        }
    }

    if let Some(progress) = &snapshot.progress {
        if let Some(duration) = progress.duration_secs {
            println!("Session time: {duration:.1}s");
        }
        for (issue, stat) in &progress.common_issues {
            println!("  {issue}: {} ({:.1}%)", stat.count, stat.percentage);
        }
    }

    if let Some(err) = &snapshot.error {
        println!("Last error: {err}");
    }
}

fn print_summary(summary: &SessionSummary) {
    println!("Session {}", summary.session_id);
    if let Some(exercise) = &summary.exercise_type {
        println!("  exercise:     {exercise}");
    }
    println!("  duration:     {:.1}s", summary.duration);
    println!("  form quality: {:.1}%", summary.form_quality);
    println!("  completed:    {}", summary.completed);
    for issue in &summary.top_issues {
        println!("  - {} ({}x, {:.1}%)", issue.issue, issue.count, issue.percentage);
    }
}

/// 1行のコマンドを処理する。終了するなら false
async fn handle_command(line: &str, scheduler: &Scheduler, config: &Config) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return true;
    };
    let service = scheduler.client().service();

    match command {
        "start" => match scheduler.start() {
            Ok(()) => println!("Capturing every {:?}", scheduler.interval()),
            Err(e) => println!("Error: {e}"),
        },
        "stop" => {
            if !scheduler.stop() {
                println!("Not capturing");
            }
        }
        "once" => match scheduler.capture_once().await {
            Ok(()) => print_snapshot(&scheduler.snapshot()),
            Err(e) => println!("Error: {e}"),
        },
        "exercise" if parts.len() == 2 => match parts[1].parse::<ExerciseType>() {
            Ok(exercise) => match scheduler.set_exercise(exercise) {
                Ok(()) => println!("Exercise: {exercise}"),
                Err(e) => println!("Error: {e}"),
            },
            Err(e) => println!("Error: {e}"),
        },
        "exercise" => {
            let names: Vec<_> = ExerciseType::ALL.iter().map(|e| e.as_str()).collect();
            println!("Usage: exercise <{}>", names.join("|"));
        }
        "acquire" => acquire(scheduler, config),
        "status" => print_status(&scheduler.snapshot()),
        "snapshot" => print_snapshot(&scheduler.snapshot()),
        "summary" => match scheduler.session_id() {
            Some(id) => match service.session_summary(&id).await {
                Ok(summary) => print_summary(&summary),
                Err(e) => println!("Error: {e}"),
            },
            None => println!("No session yet"),
        },
        "end" => match scheduler.session_id() {
            Some(id) => match service.end_session(&id).await {
                Ok(summary) => {
                    print_summary(&summary);
                    if let Err(e) = scheduler.clear_session() {
                        println!("Error: {e}");
                    }
                }
                Err(e) => println!("Error: {e}"),
            },
            None => println!("No session yet"),
        },
        "health" => match service.health().await {
            Ok(health) => println!("Service: {}", health.status),
            Err(e) => println!("Error: {e}"),
        },
        "version" => match service.version().await {
            Ok(v) => {
                println!("API {}", v.api_version);
                if let Some(model) = &v.model_version {
                    println!("  model: {model}");
                }
                println!("  exercises: {}", v.supported_exercises.join(", "));
            }
            Err(e) => println!("Error: {e}"),
        },
        "help" | "h" => print_help(),
        "quit" | "q" => return false,
        other => println!("Unknown command: {other}"),
    }
    true
}

async fn run(scheduler: &Scheduler, config: &Config) -> Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut updates = scheduler.subscribe();
    let mut last_tick = 0;

    prompt()?;
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if !handle_command(&line, scheduler, config).await {
                    break;
                }
                prompt()?;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                // 定期キャプチャの結果だけ一行で流す
                if snapshot.last_tick != last_tick {
                    last_tick = snapshot.last_tick;
                    if snapshot.state == CaptureState::Capturing || snapshot.error.is_some() {
                        match (&snapshot.error, &snapshot.form) {
                            (Some(err), _) => println!("\n[{last_tick}] {err}"),
                            (None, Some(form)) => println!(
                                "\n[{last_tick}] {} - {} issue(s)",
                                form.overall,
                                form.issues.len()
                            ),
                            (None, None) => {}
                        }
                        prompt()?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                log::info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, fallback) = Config::load_or_default(&config_path);
    if let Some(path) = logging::init(&config.logging, "liftmate")? {
        log::info!("logging to {}", path.display());
    }
    if let Some(e) = fallback {
        log::warn!("{e:#}; using default configuration");
    }

    let service = HttpAnalysisService::from_config(&config.server);

    println!("=== LiftMate ({}) ===", env!("LIFTMATE_BUILD"));
    println!("Server: {}", service.base_url());
    println!("Exercise: {}", config.capture.exercise);
    println!();

    let scheduler = CaptureScheduler::from_config(AnalysisClient::new(service), &config.capture);
    acquire(&scheduler, &config);
    println!();
    print_help();

    let result = run(&scheduler, &config).await;
    scheduler.teardown();
    println!("Bye");
    result
}
