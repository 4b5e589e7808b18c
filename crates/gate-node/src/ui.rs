//! UI thread: owns the display, the mode machine and the key bindings.
//!
//! The display itself is an external collaborator behind the narrow
//! [`DisplaySink`] trait. Two backends ship: a terminal sink that paints a
//! downscaled preview with half-block cells and reads raw-mode keys, and a
//! headless sink that merely logs, for nodes with no display attached.

use std::io::Write as _;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbImage;

use crate::alert::AlertCenter;
use crate::capture::FrameHub;
use crate::render::Renderer;
use crate::tracker::SharedTracker;

/// Render cadence of the UI loop.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Production default: idle dashboard, alert cells when active.
    AlertOnly,
    /// Live stream with per-face annotations.
    Continuous,
    /// Raw stream with a minimal overlay.
    Streaming,
}

impl DisplayMode {
    pub fn next(self) -> Self {
        match self {
            DisplayMode::AlertOnly => DisplayMode::Continuous,
            DisplayMode::Continuous => DisplayMode::Streaming,
            DisplayMode::Streaming => DisplayMode::AlertOnly,
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayMode::AlertOnly => write!(f, "alert_only"),
            DisplayMode::Continuous => write!(f, "continuous"),
            DisplayMode::Streaming => write!(f, "streaming"),
        }
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alert_only" | "alert-only" => Ok(DisplayMode::AlertOnly),
            "continuous" => Ok(DisplayMode::Continuous),
            "streaming" => Ok(DisplayMode::Streaming),
            _ => Err(format!("Invalid display mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiKey {
    CycleMode,
    ToggleFullscreen,
    Quit,
}

/// Narrow display contract consumed by the UI loop.
pub trait DisplaySink: Send {
    fn present(&mut self, canvas: &RgbImage) -> Result<()>;
    fn poll_key(&mut self) -> Option<UiKey>;
    fn set_fullscreen(&mut self, _on: bool) {}
}

/// No display attached: alerts and status go to the log only.
pub struct HeadlessSink {
    last_logged: Instant,
}

impl Default for HeadlessSink {
    fn default() -> Self {
        Self {
            last_logged: Instant::now(),
        }
    }
}

impl DisplaySink for HeadlessSink {
    fn present(&mut self, _canvas: &RgbImage) -> Result<()> {
        if self.last_logged.elapsed() >= Duration::from_secs(60) {
            self.last_logged = Instant::now();
            tracing::debug!("headless display active");
        }
        Ok(())
    }

    fn poll_key(&mut self) -> Option<UiKey> {
        None
    }
}

/// Half-block preview in the controlling terminal, keys via raw mode.
pub struct TerminalSink {
    fullscreen: bool,
}

impl TerminalSink {
    pub fn new(fullscreen: bool) -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("enabling raw terminal mode")?;
        crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::EnterAlternateScreen,
            crossterm::cursor::Hide
        )
        .context("entering alternate screen")?;
        Ok(Self { fullscreen })
    }
}

impl DisplaySink for TerminalSink {
    fn present(&mut self, canvas: &RgbImage) -> Result<()> {
        let (cols, rows) = crossterm::terminal::size().unwrap_or((100, 30));
        let (cols, rows) = if self.fullscreen {
            (cols, rows)
        } else {
            (cols.min(100), rows.min(30))
        };
        // Each text row shows two pixel rows via the upper-half block.
        let target_w = cols.max(2) as u32;
        let target_h = (rows.max(2) as u32 - 1) * 2;
        let small = image::imageops::resize(
            canvas,
            target_w,
            target_h,
            image::imageops::FilterType::Nearest,
        );

        let mut out = String::with_capacity((target_w as usize + 16) * rows as usize);
        out.push_str("\x1b[H");
        for y in (0..target_h).step_by(2) {
            for x in 0..target_w {
                let top = small.get_pixel(x, y);
                let bottom = small.get_pixel(x, (y + 1).min(target_h - 1));
                out.push_str(&format!(
                    "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m\u{2580}",
                    top[0], top[1], top[2], bottom[0], bottom[1], bottom[2]
                ));
            }
            out.push_str("\x1b[0m\r\n");
        }

        let mut stdout = std::io::stdout();
        stdout.write_all(out.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<UiKey> {
        use crossterm::event::{self, Event, KeyCode};
        if !event::poll(Duration::ZERO).unwrap_or(false) {
            return None;
        }
        match event::read() {
            Ok(Event::Key(key)) => match key.code {
                KeyCode::Char('m') | KeyCode::Char('M') => Some(UiKey::CycleMode),
                KeyCode::Char('f') | KeyCode::Char('F') => Some(UiKey::ToggleFullscreen),
                KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(UiKey::Quit),
                _ => None,
            },
            _ => None,
        }
    }

    fn set_fullscreen(&mut self, on: bool) {
        self.fullscreen = on;
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::cursor::Show,
            crossterm::terminal::LeaveAlternateScreen
        );
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

pub struct UiContext {
    pub alerts: AlertCenter,
    pub tracker: SharedTracker,
    pub hub: FrameHub,
    pub renderer: Renderer,
    pub gate_id: String,
    pub initial_mode: DisplayMode,
    pub fullscreen: bool,
}

/// Start the 30 fps render loop. `quit_requested` is raised when the
/// operator presses the quit key; the supervisor treats it like a signal.
pub fn spawn_ui(
    ctx: UiContext,
    mut sink: Box<dyn DisplaySink>,
    stop: Arc<AtomicBool>,
    quit_requested: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ui".into())
        .spawn(move || {
            let mut mode = ctx.initial_mode;
            let mut fullscreen = ctx.fullscreen;
            sink.set_fullscreen(fullscreen);
            tracing::info!(mode = %mode, "UI thread running");

            while !stop.load(Ordering::Relaxed) {
                let started = Instant::now();

                while let Some(key) = sink.poll_key() {
                    match key {
                        UiKey::CycleMode => {
                            mode = mode.next();
                            tracing::info!(mode = %mode, "display mode cycled");
                        }
                        UiKey::ToggleFullscreen => {
                            fullscreen = !fullscreen;
                            sink.set_fullscreen(fullscreen);
                        }
                        UiKey::Quit => {
                            tracing::info!("quit requested from keyboard");
                            quit_requested.store(true, Ordering::Relaxed);
                        }
                    }
                }

                ctx.alerts.expire();
                let status = ctx.alerts.system_status();

                let canvas = match mode {
                    DisplayMode::AlertOnly => {
                        let alerts = ctx.alerts.active_alerts();
                        ctx.renderer.render_alerts(&alerts, &ctx.alerts, &status, &ctx.gate_id)
                    }
                    DisplayMode::Continuous => match ctx.hub.latest_frame() {
                        Some(frame) => {
                            let tracks = ctx.tracker.all_tracks();
                            ctx.renderer.render_continuous(&frame, &tracks, &status)
                        }
                        None => ctx.renderer.render_idle(&status, &ctx.gate_id),
                    },
                    DisplayMode::Streaming => match ctx.hub.latest_frame() {
                        Some(frame) => ctx.renderer.render_streaming(&frame),
                        None => ctx.renderer.render_idle(&status, &ctx.gate_id),
                    },
                };

                if let Err(e) = sink.present(&canvas) {
                    tracing::warn!(error = %e, "display present failed");
                }

                if let Some(remaining) = FRAME_INTERVAL.checked_sub(started.elapsed()) {
                    std::thread::sleep(remaining);
                }
            }

            tracing::info!("UI thread stopped");
        })
        .context("spawning UI thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertConfig;
    use crate::capture::{spawn_capture, VideoSource};
    use crate::tracker::TrackerConfig;
    use parking_lot::Mutex;

    #[test]
    fn display_mode_parses_and_cycles() {
        assert_eq!("alert_only".parse::<DisplayMode>().unwrap(), DisplayMode::AlertOnly);
        assert_eq!("CONTINUOUS".parse::<DisplayMode>().unwrap(), DisplayMode::Continuous);
        assert!("cinema".parse::<DisplayMode>().is_err());

        let mut mode = DisplayMode::AlertOnly;
        mode = mode.next();
        assert_eq!(mode, DisplayMode::Continuous);
        mode = mode.next();
        assert_eq!(mode, DisplayMode::Streaming);
        mode = mode.next();
        assert_eq!(mode, DisplayMode::AlertOnly);
    }

    struct ScriptedSink {
        keys: Arc<Mutex<Vec<UiKey>>>,
        presents: Arc<Mutex<u32>>,
    }

    impl DisplaySink for ScriptedSink {
        fn present(&mut self, canvas: &RgbImage) -> Result<()> {
            assert!(canvas.width() > 0);
            *self.presents.lock() += 1;
            Ok(())
        }

        fn poll_key(&mut self) -> Option<UiKey> {
            self.keys.lock().pop()
        }
    }

    struct BlankSource;

    impl VideoSource for BlankSource {
        fn read_frame(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::new(64, 48))
        }

        fn fps(&self) -> u32 {
            60
        }
    }

    #[test]
    fn ui_loop_renders_and_honours_quit_key() {
        let stop = Arc::new(AtomicBool::new(false));
        let quit = Arc::new(AtomicBool::new(false));
        let (hub, capture_handle) = spawn_capture(Box::new(BlankSource), Arc::clone(&stop)).unwrap();

        let keys = Arc::new(Mutex::new(vec![UiKey::Quit, UiKey::CycleMode]));
        let presents = Arc::new(Mutex::new(0));
        let sink = ScriptedSink {
            keys: Arc::clone(&keys),
            presents: Arc::clone(&presents),
        };

        let ctx = UiContext {
            alerts: AlertCenter::new(AlertConfig::default()),
            tracker: SharedTracker::new(TrackerConfig::default()),
            hub,
            renderer: Renderer::new(320, 180, "/nonexistent/font.ttf"),
            gate_id: "gate-001".to_string(),
            initial_mode: DisplayMode::AlertOnly,
            fullscreen: false,
        };

        let handle = spawn_ui(ctx, Box::new(sink), Arc::clone(&stop), Arc::clone(&quit)).unwrap();

        std::thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        capture_handle.join().unwrap();

        assert!(*presents.lock() > 1, "render loop presented frames");
        assert!(quit.load(Ordering::SeqCst), "quit key raised the flag");
    }
}
