//! Safe time helpers shared across the node.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};

/// Current Unix timestamp in seconds, clamping to 0 on a clock before the
/// epoch instead of panicking.
pub fn safe_unix_timestamp() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs(),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "System clock is before UNIX epoch (1970-01-01), using timestamp 0"
            );
            0
        }
    }
}

/// Current UTC time as an ISO-8601 string with millisecond precision and a
/// trailing `Z`, matching the backend's timestamp format.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_timestamp_is_recent() {
        // Anything after 2020 proves the clock path works.
        assert!(safe_unix_timestamp() > 1_577_836_800);
    }

    #[test]
    fn utc_timestamp_is_iso8601_zulu() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }
}
