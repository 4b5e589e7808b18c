//! Node configuration, bound from environment variables (with `.env`
//! support). Every recognised key has a default suitable for a laptop demo;
//! a mis-typed value is a configuration error and fatal at startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::tracker::TrackerConfig;
use crate::ui::DisplayMode;

#[derive(Debug, Clone)]
pub struct Config {
    // Identity
    pub gate_id: String,
    pub org_id: String,

    // Backend
    pub backend_url: String,
    pub sync_interval: Duration,

    // Camera
    pub camera_index: u32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,

    // Models
    pub detector_model_path: String,
    pub recognizer_model_path: String,

    // Recognition policy
    pub auth_threshold: f32,
    pub wanted_threshold: f32,
    pub max_recognition_attempts: u32,
    /// How long per-track recognition bookkeeping outlives the track.
    pub track_cooldown: Duration,

    // Tracker
    pub tracker: TrackerConfig,

    // Gate / GPIO
    pub gpio_enabled: bool,
    pub gpio_pin: u8,
    pub gpio_active_low: bool,
    pub gate_open_duration: Duration,
    pub gate_cooldown: Duration,

    // Display
    pub display_enabled: bool,
    pub display_width: u32,
    pub display_height: u32,
    pub display_mode: DisplayMode,
    pub display_fullscreen: bool,
    pub display_font_path: String,
    pub alert_display_duration: Duration,
    pub alert_cooldown: Duration,

    // Alarm
    pub alarm_enabled: bool,
    pub alarm_cooldown: Duration,
    pub alarm_wanted_frequency: u32,
    pub alarm_wanted_duration_ms: u64,
    pub alarm_wanted_beeps: u32,
    pub alarm_wanted_gap_ms: u64,
    pub alarm_unknown_frequency: u32,
    pub alarm_unknown_duration_ms: u64,
    pub alarm_unknown_beeps: u32,
    pub alarm_unknown_gap_ms: u64,

    // Persistence
    pub data_dir: PathBuf,
    pub log_db_path: PathBuf,
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    pub version_path: PathBuf,
    pub log_retention_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env is fine; a present one fills the environment.
        let _ = dotenvy::dotenv();

        let tracker = TrackerConfig {
            iou_threshold: parse_env("TRACKER_IOU_THRESHOLD", 0.3)?,
            min_hits: parse_env("TRACKER_MIN_HITS", 3)?,
            max_age: parse_env("TRACKER_MAX_AGE", 30)?,
            embedding_weight: parse_env("TRACKER_EMBEDDING_WEIGHT", 0.3)?,
            max_embedding_distance: parse_env("MAX_EMBEDDING_DISTANCE", 0.6)?,
            swap_threshold: parse_env("SWAP_THRESHOLD", 0.7)?,
            ..TrackerConfig::default()
        };
        if tracker.swap_threshold <= tracker.max_embedding_distance {
            bail!(
                "SWAP_THRESHOLD ({}) must be greater than MAX_EMBEDDING_DISTANCE ({}): \
                 otherwise a legitimate match reads as a person swap",
                tracker.swap_threshold,
                tracker.max_embedding_distance
            );
        }

        let data_dir: PathBuf = env_or("DATA_DIR", "data").into();

        let config = Self {
            gate_id: env_or("GATE_ID", "gate-001"),
            org_id: env_or("ORG_ID", "default-org"),

            backend_url: env_or("BACKEND_URL", "http://localhost:8000")
                .trim_end_matches('/')
                .to_string(),
            sync_interval: Duration::from_secs(parse_env("SYNC_INTERVAL_SECONDS", 120u64)?),

            camera_index: parse_env("CAMERA_INDEX", 0)?,
            camera_width: parse_env("CAMERA_WIDTH", 640)?,
            camera_height: parse_env("CAMERA_HEIGHT", 480)?,
            camera_fps: parse_env("CAMERA_FPS", 15)?,

            detector_model_path: env_or("DETECTOR_MODEL_PATH", "models/face_detector.onnx"),
            recognizer_model_path: env_or("RECOGNIZER_MODEL_PATH", "models/face_embedding.onnx"),

            auth_threshold: parse_env("AUTH_THRESHOLD", 0.5)?,
            wanted_threshold: parse_env("WANTED_THRESHOLD", 0.7)?,
            max_recognition_attempts: parse_env("MAX_RECOGNITION_ATTEMPTS", 3)?,
            track_cooldown: Duration::from_secs(parse_env("TRACK_COOLDOWN_SECONDS", 30u64)?),

            tracker,

            gpio_enabled: parse_env("GPIO_ENABLED", false)?,
            gpio_pin: parse_env("GPIO_PIN", 17)?,
            gpio_active_low: parse_env("GPIO_ACTIVE_LOW", true)?,
            gate_open_duration: Duration::from_secs_f64(parse_env("GATE_OPEN_DURATION", 5.0)?),
            gate_cooldown: Duration::from_secs_f64(parse_env("GATE_COOLDOWN", 2.0)?),

            display_enabled: parse_env("DISPLAY_ENABLED", true)?,
            display_width: parse_env("DISPLAY_WIDTH", 1280)?,
            display_height: parse_env("DISPLAY_HEIGHT", 720)?,
            display_mode: parse_env("DISPLAY_MODE", DisplayMode::AlertOnly)?,
            display_fullscreen: parse_env("DISPLAY_FULLSCREEN", false)?,
            display_font_path: env_or(
                "DISPLAY_FONT_PATH",
                "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            ),
            alert_display_duration: Duration::from_secs_f64(parse_env("ALERT_DISPLAY_DURATION", 60.0)?),
            alert_cooldown: Duration::from_secs_f64(parse_env("ALERT_COOLDOWN_SECONDS", 3.0)?),

            alarm_enabled: parse_env("ALARM_ENABLED", true)?,
            alarm_cooldown: Duration::from_secs_f64(parse_env("ALARM_COOLDOWN_SECONDS", 5.0)?),
            alarm_wanted_frequency: parse_env("ALARM_WANTED_FREQUENCY", 2500)?,
            alarm_wanted_duration_ms: parse_env("ALARM_WANTED_DURATION", 500)?,
            alarm_wanted_beeps: parse_env("ALARM_WANTED_BEEPS", 5)?,
            alarm_wanted_gap_ms: parse_env("ALARM_WANTED_GAP", 100)?,
            alarm_unknown_frequency: parse_env("ALARM_UNKNOWN_FREQUENCY", 1500)?,
            alarm_unknown_duration_ms: parse_env("ALARM_UNKNOWN_DURATION", 300)?,
            alarm_unknown_beeps: parse_env("ALARM_UNKNOWN_BEEPS", 1)?,
            alarm_unknown_gap_ms: parse_env("ALARM_UNKNOWN_GAP", 150)?,

            log_db_path: env_or_path("LOG_DB_PATH", &data_dir, "logs.db"),
            index_path: env_or_path("INDEX_PATH", &data_dir, "faces.index"),
            metadata_path: env_or_path("METADATA_PATH", &data_dir, "faces_metadata.json"),
            version_path: env_or_path("VERSION_PATH", &data_dir, "sync_version.txt"),
            log_retention_days: parse_env("LOG_RETENTION_DAYS", 30)?,
            data_dir,
        };

        Ok(config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_path(key: &str, data_dir: &std::path::Path, file: &str) -> PathBuf {
    match env::var(key) {
        Ok(v) => PathBuf::from(v),
        Err(_) => data_dir.join(file),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value {raw:?} for {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Env-var tests mutate process state; serialise them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock();
        let config = Config::from_env().unwrap();
        assert_eq!(config.gate_id, "gate-001");
        assert_eq!(config.camera_fps, 15);
        assert_eq!(config.tracker.min_hits, 3);
        assert_eq!(config.gate_open_duration, Duration::from_secs(5));
        assert_eq!(config.log_db_path, PathBuf::from("data/logs.db"));
    }

    #[test]
    fn invalid_numbers_are_fatal() {
        env::set_var("CONFIG_TEST_BAD_PORT", "not-a-number");
        let result: Result<u32> = parse_env("CONFIG_TEST_BAD_PORT", 1);
        assert!(result.is_err());
        env::remove_var("CONFIG_TEST_BAD_PORT");
    }

    #[test]
    fn swap_threshold_must_exceed_match_threshold() {
        let _guard = ENV_LOCK.lock();
        env::set_var("SWAP_THRESHOLD", "0.5");
        env::set_var("MAX_EMBEDDING_DISTANCE", "0.6");
        assert!(Config::from_env().is_err());
        env::remove_var("SWAP_THRESHOLD");
        env::remove_var("MAX_EMBEDDING_DISTANCE");
    }

    #[test]
    fn storage_paths_follow_data_dir() {
        let _guard = ENV_LOCK.lock();
        env::set_var("DATA_DIR", "/var/lib/gatewarden");
        let config = Config::from_env().unwrap();
        assert_eq!(config.index_path, PathBuf::from("/var/lib/gatewarden/faces.index"));
        env::remove_var("DATA_DIR");
    }
}
