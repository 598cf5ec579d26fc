use chrono::{DateTime, Local, NaiveDateTime};

/// Display format used in the message log.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// ISO 8601 timestamp for the wire, local time without offset
/// (`2024-05-01T12:30:00.123456`).
pub fn to_wire(dt: &DateTime<Local>) -> String {
    dt.naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Unix seconds as a float, used in discovery announcements.
pub fn unix_secs_f64(dt: &DateTime<Local>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

pub fn display(dt: &DateTime<Local>) -> String {
    dt.format(DISPLAY_FORMAT).to_string()
}

/// Reformat a wire timestamp for display. Accepts RFC 3339 (with offset) and
/// naive ISO 8601; anything else falls back to the current time.
pub fn display_from_wire(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(DISPLAY_FORMAT).to_string();
    }
    if let Ok(naive) = raw.parse::<NaiveDateTime>() {
        return naive.format(DISPLAY_FORMAT).to_string();
    }
    display(&now())
}
