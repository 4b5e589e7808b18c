//! Supervisor: wires every component together, runs the per-frame
//! orchestration loop on the main thread, and tears everything down in
//! order on shutdown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use common::{Detection, Embedding, Frame};
use face_index::{FaceIndex, IndexPaths};
use parking_lot::RwLock;
use vision::{
    align_face, align_from_bbox, ArcFaceEmbedder, FaceDetector, FaceEmbedder, QualityConfig,
    QualityFilter, ScrfdConfig, ScrfdDetector,
};

use crate::access_log::AccessLogger;
use crate::alarm::{AlarmConfig, AlarmSystem, Beeper, BeepSequence, ConsoleBeeper, PwmBeeper};
use crate::alert::{AlertCenter, AlertConfig};
use crate::capture::{spawn_capture, NokhwaSource};
use crate::config::Config;
use crate::decision::DecisionEngine;
use crate::gate::{GateController, GpioRelay, RelayLine, SimulatedRelay};
use crate::recognition::{RecognitionContext, RecognitionDispatcher};
use crate::render::Renderer;
use crate::stream::{spawn_stream, LogTransport};
use crate::sync::{spawn_sync_worker, SyncConfig};
use crate::tracker::{SharedTracker, TrackPhase};
use crate::ui::{spawn_ui, DisplaySink, HeadlessSink, TerminalSink, UiContext};

/// Software-PWM buzzer pin used when the node runs with GPIO enabled.
const ALARM_BUZZER_PIN: u8 = 18;

const AI_READ_TIMEOUT: Duration = Duration::from_millis(100);
const THREAD_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const STATUS_REFRESH_FRAMES: u64 = 30;
const RECOGNITION_WORKERS: usize = 2;
const ATTEMPT_INTERVAL: Duration = Duration::from_millis(500);

/// Separates "never came up" from "came up and then broke", for the exit
/// code.
#[derive(Debug)]
pub enum NodeError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Startup(e) => write!(f, "startup failed: {e:#}"),
            NodeError::Runtime(e) => write!(f, "runtime failure: {e:#}"),
        }
    }
}

pub fn run(config: Config) -> Result<(), NodeError> {
    tracing::info!(gate_id = %config.gate_id, org_id = %config.org_id, "gate node starting");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))
        .map_err(NodeError::Startup)?;

    // Face index first: everything downstream needs it.
    let index = Arc::new(RwLock::new(FaceIndex::open(IndexPaths {
        vectors: config.index_path.clone(),
        metadata: config.metadata_path.clone(),
        version: config.version_path.clone(),
    })));

    // Vision adapters are mandatory resources.
    let detector: Box<dyn FaceDetector> = Box::new(
        ScrfdDetector::load(ScrfdConfig {
            model_path: config.detector_model_path.clone(),
            ..ScrfdConfig::default()
        })
        .context("loading face detector")
        .map_err(NodeError::Startup)?,
    );
    let embedder: Arc<dyn FaceEmbedder> = Arc::new(
        ArcFaceEmbedder::load(&config.recognizer_model_path, 2)
            .context("loading face embedder")
            .map_err(NodeError::Startup)?,
    );
    let quality = QualityFilter::new(QualityConfig::default());

    // Gate controller. With GPIO enabled a missing controller is fatal;
    // otherwise the relay is simulated.
    let relay: Box<dyn RelayLine> = if config.gpio_enabled {
        Box::new(
            GpioRelay::open(config.gpio_pin, config.gpio_active_low)
                .context("opening gate relay")
                .map_err(NodeError::Startup)?,
        )
    } else {
        tracing::info!("GPIO disabled, gate runs in simulation mode");
        Box::new(SimulatedRelay)
    };
    let gate = GateController::new(relay, config.gate_open_duration, config.gate_cooldown);

    let log = Arc::new(
        AccessLogger::open(&config.log_db_path)
            .context("opening access log")
            .map_err(NodeError::Startup)?,
    );

    // Frame source.
    let stop = Arc::new(AtomicBool::new(false));
    let camera = NokhwaSource::open(
        config.camera_index,
        config.camera_width,
        config.camera_height,
        config.camera_fps,
    )
    .context("opening camera")
    .map_err(NodeError::Startup)?;
    let (hub, capture_handle) = spawn_capture(Box::new(camera), Arc::clone(&stop))
        .map_err(NodeError::Startup)?;

    // Alarm.
    let beeper: Arc<dyn Beeper> = if config.gpio_enabled {
        match PwmBeeper::open(ALARM_BUZZER_PIN) {
            Ok(pwm) => Arc::new(pwm),
            Err(e) => {
                tracing::warn!(error = %e, "PWM buzzer unavailable, using console bell");
                Arc::new(ConsoleBeeper)
            }
        }
    } else {
        Arc::new(ConsoleBeeper)
    };
    let alarm = AlarmSystem::new(
        AlarmConfig {
            enabled: config.alarm_enabled,
            cooldown: config.alarm_cooldown,
            wanted: BeepSequence {
                frequency_hz: config.alarm_wanted_frequency,
                duration_ms: config.alarm_wanted_duration_ms,
                beeps: config.alarm_wanted_beeps,
                gap_ms: config.alarm_wanted_gap_ms,
            },
            unknown: BeepSequence {
                frequency_hz: config.alarm_unknown_frequency,
                duration_ms: config.alarm_unknown_duration_ms,
                beeps: config.alarm_unknown_beeps,
                gap_ms: config.alarm_unknown_gap_ms,
            },
        },
        beeper,
    );

    // Shared state and worker threads.
    let tracker = SharedTracker::new(config.tracker.clone());
    let alerts = AlertCenter::new(AlertConfig {
        wanted_duration: config.alert_display_duration,
        unknown_duration: config.alert_display_duration,
        cooldown: config.alert_cooldown,
    });

    let (sync_handle, sync_thread) = spawn_sync_worker(
        SyncConfig {
            backend_url: config.backend_url.clone(),
            org_id: config.org_id.clone(),
            interval: config.sync_interval,
            request_timeout: Duration::from_secs(30),
            retention_days: config.log_retention_days,
        },
        Arc::clone(&index),
        Arc::clone(&log),
        Arc::clone(&stop),
    )
    .map_err(NodeError::Startup)?;

    let quit_requested = Arc::new(AtomicBool::new(false));
    let sink: Box<dyn DisplaySink> = if config.display_enabled {
        match TerminalSink::new(config.display_fullscreen) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                tracing::warn!(error = %e, "no display available, running headless");
                Box::new(HeadlessSink::default())
            }
        }
    } else {
        Box::new(HeadlessSink::default())
    };
    let ui_handle = spawn_ui(
        UiContext {
            alerts: alerts.clone(),
            tracker: tracker.clone(),
            hub: hub.clone(),
            renderer: Renderer::new(
                config.display_width,
                config.display_height,
                &config.display_font_path,
            ),
            gate_id: config.gate_id.clone(),
            initial_mode: config.display_mode,
            fullscreen: config.display_fullscreen,
        },
        sink,
        Arc::clone(&stop),
        Arc::clone(&quit_requested),
    )
    .map_err(NodeError::Startup)?;

    let stream_handle = spawn_stream(hub.clone(), Box::<LogTransport>::default(), Arc::clone(&stop))
        .map_err(NodeError::Startup)?;

    let dispatcher = RecognitionDispatcher::start(
        RecognitionContext {
            tracker: tracker.clone(),
            embedder: Arc::clone(&embedder),
            index: Arc::clone(&index),
            decision: DecisionEngine::new(config.auth_threshold, config.wanted_threshold),
            gate: gate.clone(),
            log: Arc::clone(&log),
            alerts: alerts.clone(),
            alarm,
            gate_id: config.gate_id.clone(),
            max_attempts: config.max_recognition_attempts,
        },
        RECOGNITION_WORKERS,
        ATTEMPT_INTERVAL,
        config.track_cooldown,
    )
    .map_err(NodeError::Startup)?;

    // SIGINT/SIGTERM raise the same stop everything else watches.
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            stop.store(true, Ordering::SeqCst);
        })
        .context("installing signal handler")
        .map_err(NodeError::Startup)?;
    }

    tracing::info!("gate node started");
    let started_at = Instant::now();
    let run_result = main_loop(
        &config,
        &stop,
        &quit_requested,
        &hub,
        &capture_handle,
        detector.as_ref(),
        &quality,
        embedder.as_ref(),
        &tracker,
        &dispatcher,
        &alerts,
        &index,
        &sync_handle,
        &gate,
    );

    // Shutdown: broadcast stop, join in reverse start order, release
    // hardware, persist, report.
    stop.store(true, Ordering::SeqCst);
    let _ = ui_handle.join();
    let _ = stream_handle.join();
    let _ = sync_thread.join();
    join_with_timeout(capture_handle, THREAD_JOIN_TIMEOUT);
    dispatcher.shutdown();
    gate.shutdown();

    if let Err(e) = index.read().save() {
        tracing::warn!(error = %e, "final index save failed");
    }

    print_session_summary(started_at, &hub, &tracker, &gate, &log);
    tracing::info!("gate node stopped");

    run_result
}

#[allow(clippy::too_many_arguments)]
fn main_loop(
    config: &Config,
    stop: &AtomicBool,
    quit_requested: &AtomicBool,
    hub: &crate::capture::FrameHub,
    capture_handle: &std::thread::JoinHandle<()>,
    detector: &dyn FaceDetector,
    quality: &QualityFilter,
    embedder: &dyn FaceEmbedder,
    tracker: &SharedTracker,
    dispatcher: &RecognitionDispatcher,
    alerts: &AlertCenter,
    index: &RwLock<FaceIndex>,
    sync_handle: &crate::sync::SyncHandle,
    gate: &GateController,
) -> Result<(), NodeError> {
    let mut frames_processed = 0u64;
    let mut inference_failures = 0u64;

    while !stop.load(Ordering::Relaxed) {
        if quit_requested.load(Ordering::Relaxed) {
            tracing::info!("quit requested, leaving main loop");
            break;
        }

        let Some(frame) = hub.next_ai_frame(AI_READ_TIMEOUT) else {
            if capture_handle.is_finished() && !stop.load(Ordering::Relaxed) {
                return Err(NodeError::Runtime(anyhow!("capture thread exited unexpectedly")));
            }
            continue;
        };
        frames_processed += 1;

        // Detection; a failed frame is counted and skipped, never fatal.
        let detections = match detector.detect(frame.image()) {
            Ok(detections) => detections,
            Err(e) => {
                inference_failures += 1;
                if inference_failures % 50 == 1 {
                    tracing::warn!(error = %e, inference_failures, "detection failed, frame skipped");
                }
                continue;
            }
        };

        let (mut kept, _rejected) = quality.split(detections, &frame);

        // Embeddings are expensive, so the main loop computes them only
        // where the tracker's swap gate can use them: detections sitting on
        // top of an already-recognized track.
        attach_swap_embeddings(&mut kept, &frame, tracker, embedder, config.tracker.iou_threshold);

        tracker.update(&kept);

        let ready = tracker.tracks_ready_for_recognition();
        if !ready.is_empty() {
            dispatcher.dispatch(&ready, &frame);
        }

        if frames_processed % STATUS_REFRESH_FRAMES == 0 {
            let live: HashSet<u64> = tracker.all_tracks().iter().map(|t| t.track_id).collect();
            dispatcher.prune(&live);
            alerts.set_system_status(
                index.read().count(),
                sync_handle.status().label().to_string(),
                gate.state().to_string(),
            );
        }
    }

    Ok(())
}

/// Attach inline embeddings to detections that overlap a RECOGNIZED track.
fn attach_swap_embeddings(
    detections: &mut [Detection],
    frame: &Frame,
    tracker: &SharedTracker,
    embedder: &dyn FaceEmbedder,
    iou_threshold: f32,
) {
    let recognized: Vec<_> = tracker
        .active_tracks()
        .into_iter()
        .filter(|t| t.phase == TrackPhase::Recognized)
        .collect();
    if recognized.is_empty() {
        return;
    }

    for detection in detections.iter_mut() {
        if detection.embedding.is_some() {
            continue;
        }
        if recognized.iter().any(|t| detection.bbox.iou(&t.bbox) >= iou_threshold) {
            if let Some(embedding) = embed_detection(embedder, frame, detection) {
                detection.embedding = Some(embedding);
            }
        }
    }
}

fn embed_detection(
    embedder: &dyn FaceEmbedder,
    frame: &Frame,
    detection: &Detection,
) -> Option<Embedding> {
    let aligned = match &detection.landmarks {
        Some(landmarks) => align_face(frame.image(), landmarks)
            .unwrap_or_else(|| align_from_bbox(frame.image(), &detection.bbox, 0.1)),
        None => align_from_bbox(frame.image(), &detection.bbox, 0.1),
    };
    match embedder.embed(&aligned.image) {
        Ok(embedding) => Some(embedding),
        Err(e) => {
            tracing::debug!(error = %e, "swap-gate embedding failed");
            None
        }
    }
}

fn join_with_timeout(handle: std::thread::JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        tracing::warn!("thread did not stop within timeout, detaching");
    }
}

fn print_session_summary(
    started_at: Instant,
    hub: &crate::capture::FrameHub,
    tracker: &SharedTracker,
    gate: &GateController,
    log: &AccessLogger,
) {
    let runtime = started_at.elapsed().as_secs_f64();
    let capture = hub.stats();
    let tracks = tracker.stats();
    let gate_stats = gate.stats();

    tracing::info!(
        runtime_secs = runtime,
        frames_captured = capture.frames_captured,
        frames_dropped_ai = capture.frames_dropped_ai,
        frames_dropped_stream = capture.frames_dropped_stream,
        "session: capture"
    );
    tracing::info!(
        created = tracks.tracks_created,
        confirmed = tracks.tracks_confirmed,
        recognized = tracks.tracks_recognized,
        authorized = tracks.authorized_count,
        wanted = tracks.wanted_count,
        unknown = tracks.unknown_count,
        swap_resets = tracks.swap_resets,
        "session: tracks"
    );
    tracing::info!(
        total_opens = gate_stats.total_opens,
        authorized_opens = gate_stats.authorized_opens,
        wanted_opens = gate_stats.wanted_opens,
        rejected = gate_stats.rejected_unknown,
        "session: gate"
    );
    if let Ok(log_stats) = log.stats() {
        tracing::info!(
            total_events = log_stats.total_events,
            unsynced = log_stats.unsynced_events,
            "session: access log"
        );
    }
}
