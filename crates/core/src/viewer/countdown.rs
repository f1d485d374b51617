use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time left until `timer_end`, floored at zero.
pub fn remaining(timer_end: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (timer_end - now).to_std().unwrap_or(Duration::ZERO)
}

/// Render as `MM:SS`, rounding partial seconds up so the display reaches
/// `00:00` exactly at expiry. Hours fold into the minutes.
pub fn format_remaining(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T20:15:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_remaining_counts_down() {
        let end = t0() + TimeDelta::minutes(15);
        assert_eq!(remaining(end, t0()), Duration::from_secs(900));
        assert_eq!(
            remaining(end, t0() + TimeDelta::seconds(899)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_remaining_never_negative() {
        let end = t0();
        assert_eq!(remaining(end, end), Duration::ZERO);
        assert_eq!(remaining(end, end + TimeDelta::hours(2)), Duration::ZERO);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::from_secs(900)), "15:00");
        assert_eq!(format_remaining(Duration::from_millis(59_200)), "01:00");
        assert_eq!(format_remaining(Duration::from_secs(65)), "01:05");
        assert_eq!(format_remaining(Duration::from_secs(2 * 3600 + 5)), "120:05");
        assert_eq!(format_remaining(Duration::ZERO), "00:00");
    }
}
