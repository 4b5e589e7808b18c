//! Stream thread: drains the stream buffer into the admin transport.
//!
//! The transport itself (WebRTC, MJPEG relay, whatever the deployment
//! uses) is an external collaborator behind the one-method
//! [`StreamTransport`] trait; the node ships a logging stand-in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use common::Frame;

use crate::capture::FrameHub;

const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(50);

pub trait StreamTransport: Send {
    fn publish(&mut self, frame: &Frame) -> Result<()>;
}

/// Counts frames and logs a heartbeat; stands in when no transport is
/// configured.
pub struct LogTransport {
    published: u64,
    last_heartbeat: Instant,
}

impl Default for LogTransport {
    fn default() -> Self {
        Self {
            published: 0,
            last_heartbeat: Instant::now(),
        }
    }
}

impl StreamTransport for LogTransport {
    fn publish(&mut self, _frame: &Frame) -> Result<()> {
        self.published += 1;
        if self.last_heartbeat.elapsed() >= Duration::from_secs(30) {
            self.last_heartbeat = Instant::now();
            tracing::debug!(published = self.published, "stream heartbeat");
        }
        Ok(())
    }
}

pub fn spawn_stream(
    hub: FrameHub,
    mut transport: Box<dyn StreamTransport>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stream".into())
        .spawn(move || {
            tracing::info!("stream thread running");
            let mut failures = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let Some(frame) = hub.next_stream_frame(STREAM_READ_TIMEOUT) else {
                    continue;
                };
                if let Err(e) = transport.publish(&frame) {
                    failures += 1;
                    if failures % 100 == 1 {
                        tracing::warn!(error = %e, failures, "stream publish failed");
                    }
                }
            }
            tracing::info!("stream thread stopped");
        })
        .context("spawning stream thread")
}
