//! Dedicated camera capture thread.
//!
//! The camera is read at its native rate on its own thread and fanned out
//! to three consumers: a small AI buffer (the recognition pipeline is slow
//! and only ever wants a recent frame), a larger stream buffer (smooth
//! admin viewing), and a latest-frame slot for the UI. Both buffers drop
//! the OLDEST frame under pressure, never the newest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use common::Frame;
use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbImage;
use parking_lot::Mutex;

const AI_BUFFER_CAPACITY: usize = 2;
const STREAM_BUFFER_CAPACITY: usize = 5;

/// Narrow camera contract; the node never sees a driver type.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Result<RgbImage>;
    /// Native capture rate, used to pace the loop.
    fn fps(&self) -> u32;
    /// Release the device. Also called on drop paths.
    fn release(&mut self) {}
}

/// Webcam / CSI camera via nokhwa.
pub struct NokhwaSource {
    camera: nokhwa::Camera,
    fps: u32,
}

impl NokhwaSource {
    pub fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{
            CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
            Resolution,
        };

        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps),
        ));
        let mut camera = nokhwa::Camera::new(CameraIndex::Index(index), format)
            .with_context(|| format!("opening camera {index}"))?;
        camera.open_stream().context("starting camera stream")?;

        let actual = camera.camera_format();
        tracing::info!(
            index,
            width = actual.resolution().width(),
            height = actual.resolution().height(),
            fps = actual.frame_rate(),
            "camera opened"
        );

        Ok(Self {
            fps: actual.frame_rate().max(1),
            camera,
        })
    }
}

impl VideoSource for NokhwaSource {
    fn read_frame(&mut self) -> Result<RgbImage> {
        let buffer = self.camera.frame().context("camera read")?;
        buffer.decode_image::<nokhwa::pixel_format::RgbFormat>().context("frame decode")
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn release(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!(error = %e, "camera stream did not stop cleanly");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_dropped_ai: u64,
    pub frames_dropped_stream: u64,
    pub read_failures: u64,
    /// Observed rate over the last second.
    pub fps: f32,
}

/// Consumer side of the capture thread.
#[derive(Clone)]
pub struct FrameHub {
    ai_rx: Receiver<Frame>,
    stream_rx: Receiver<Frame>,
    latest: Arc<Mutex<Option<Frame>>>,
    stats: Arc<Mutex<CaptureStats>>,
}

impl FrameHub {
    /// Blocking read from the AI buffer, bounded by `timeout`.
    pub fn next_ai_frame(&self, timeout: Duration) -> Option<Frame> {
        self.ai_rx.recv_timeout(timeout).ok()
    }

    /// Short-timeout read from the stream buffer.
    pub fn next_stream_frame(&self, timeout: Duration) -> Option<Frame> {
        self.stream_rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking snapshot of the most recent frame.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }

    pub fn stats(&self) -> CaptureStats {
        *self.stats.lock()
    }
}

/// Start the capture thread. It runs until `stop` is raised, then releases
/// the camera regardless of how the loop ended.
pub fn spawn_capture(
    mut source: Box<dyn VideoSource>,
    stop: Arc<AtomicBool>,
) -> Result<(FrameHub, JoinHandle<()>)> {
    let (ai_tx, ai_rx) = bounded(AI_BUFFER_CAPACITY);
    let (stream_tx, stream_rx) = bounded(STREAM_BUFFER_CAPACITY);
    let latest = Arc::new(Mutex::new(None));
    let stats = Arc::new(Mutex::new(CaptureStats::default()));

    let hub = FrameHub {
        ai_rx: ai_rx.clone(),
        stream_rx: stream_rx.clone(),
        latest: Arc::clone(&latest),
        stats: Arc::clone(&stats),
    };

    let handle = thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            let frame_interval = Duration::from_secs_f64(1.0 / source.fps().max(1) as f64);
            let mut seq = 0u64;
            let mut fps_window_start = Instant::now();
            let mut fps_count = 0u32;
            let mut consecutive_failures = 0u32;

            tracing::info!(fps = source.fps(), "capture thread running");

            while !stop.load(Ordering::Relaxed) {
                let loop_start = Instant::now();

                let image = match source.read_frame() {
                    Ok(image) => {
                        consecutive_failures = 0;
                        image
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        stats.lock().read_failures += 1;
                        if consecutive_failures % 10 == 1 {
                            tracing::warn!(error = %e, consecutive_failures, "frame capture failed, retrying");
                        }
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                };

                seq += 1;
                let frame = Frame::new(image, seq);

                {
                    let mut stats = stats.lock();
                    stats.frames_captured += 1;
                    fps_count += 1;
                    let elapsed = fps_window_start.elapsed();
                    if elapsed >= Duration::from_secs(1) {
                        stats.fps = fps_count as f32 / elapsed.as_secs_f32();
                        fps_count = 0;
                        fps_window_start = Instant::now();
                    }
                }

                *latest.lock() = Some(frame.clone());
                if push_drop_oldest(&ai_tx, &ai_rx, frame.clone()) {
                    stats.lock().frames_dropped_ai += 1;
                }
                if push_drop_oldest(&stream_tx, &stream_rx, frame) {
                    stats.lock().frames_dropped_stream += 1;
                }

                if let Some(remaining) = frame_interval.checked_sub(loop_start.elapsed()) {
                    thread::sleep(remaining);
                }
            }

            source.release();
            tracing::info!("capture thread stopped, camera released");
        })
        .context("spawning capture thread")?;

    Ok((hub, handle))
}

/// Push into a bounded channel, discarding the oldest entry when full.
/// Returns true when a frame was shed.
fn push_drop_oldest(tx: &Sender<Frame>, rx: &Receiver<Frame>, frame: Frame) -> bool {
    let mut dropped = false;
    if tx.is_full() {
        dropped = rx.try_recv().is_ok();
    }
    // A consumer may have raced us and made room; a second failure only
    // happens if it raced the other way, in which case the frame is shed.
    if tx.try_send(frame).is_err() {
        dropped = true;
    }
    dropped
}
