//! Shared helpers and constants.

use chrono::{DateTime, Utc};

pub const APP_NAME: &str = "blurblog_backend";

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Human readable age of an RFC 3339 timestamp ("5 minutes", "2 days").
/// Unparseable input is returned unchanged.
pub fn relative_timesince(timestamp: &str) -> String {
    let Ok(then) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let seconds = (Utc::now() - then.with_timezone(&Utc)).num_seconds().max(0);
    relative_from_seconds(seconds)
}

fn relative_from_seconds(seconds: i64) -> String {
    const UNITS: [(i64, &str); 5] = [
        (365 * 24 * 3600, "year"),
        (30 * 24 * 3600, "month"),
        (24 * 3600, "day"),
        (3600, "hour"),
        (60, "minute"),
    ];
    for (size, name) in UNITS {
        let count = seconds / size;
        if count >= 1 {
            let plural = if count == 1 { "" } else { "s" };
            return format!("{count} {name}{plural}");
        }
    }
    "just now".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_relative_ages() {
        assert_eq!(relative_from_seconds(5), "just now");
        assert_eq!(relative_from_seconds(60), "1 minute");
        assert_eq!(relative_from_seconds(3 * 3600 + 10), "3 hours");
        assert_eq!(relative_from_seconds(2 * 24 * 3600), "2 days");
    }

    #[test]
    fn unparseable_timestamp_passes_through() {
        assert_eq!(relative_timesince("yesterday-ish"), "yesterday-ish");
    }
}
