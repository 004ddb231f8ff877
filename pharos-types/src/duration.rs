//! Human phrasing of how long a watcher has held its status.

use core::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

fn plural(count: u64, singular: &'static str, plural: &'static str) -> &'static str {
    if count == 1 {
        singular
    } else {
        plural
    }
}

/// Phrase an elapsed duration at its coarsest whole unit.
///
/// Days, then hours, then minutes; anything under a minute is "a moment".
/// The count is truncated, never rounded.
///
/// ```rust
/// use std::time::Duration;
/// use pharos_types::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_secs(65)), "1 minute");
/// assert_eq!(format_elapsed(Duration::from_secs(7300)), "2 hours");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();

    if secs >= DAY {
        let days = secs / DAY;
        format!("{} {}", days, plural(days, "day", "days"))
    } else if secs >= HOUR {
        let hours = secs / HOUR;
        format!("{} {}", hours, plural(hours, "hour", "hours"))
    } else if secs >= MINUTE {
        let minutes = secs / MINUTE;
        format!("{} {}", minutes, plural(minutes, "minute", "minutes"))
    } else {
        "a moment".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrase(secs: u64) -> String {
        format_elapsed(Duration::from_secs(secs))
    }

    #[test]
    fn test_short() {
        assert_eq!(phrase(1), "a moment");
        assert_eq!(phrase(0), "a moment");
        assert_eq!(phrase(59), "a moment");
    }

    #[test]
    fn test_a_minute() {
        assert_eq!(phrase(65), "1 minute");
    }

    #[test]
    fn test_mid_minutes() {
        assert_eq!(phrase(330), "5 minutes");
    }

    #[test]
    fn test_an_hour() {
        assert_eq!(phrase(3665), "1 hour");
    }

    #[test]
    fn test_mid_hours() {
        assert_eq!(phrase(7300), "2 hours");
    }

    #[test]
    fn test_a_day() {
        assert_eq!(phrase(86_400), "1 day");
    }

    #[test]
    fn test_really_long() {
        assert_eq!(phrase(864_000), "10 days");
    }

    #[test]
    fn sub_second_precision_is_ignored() {
        assert_eq!(
            format_elapsed(Duration::from_millis(60_999)),
            "1 minute"
        );
    }
}
