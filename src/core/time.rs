//! Wall-clock helpers.
//!
//! Game logic never reads the clock itself: every operation takes a
//! `now: Millis` argument so tests can drive time explicitly. Only the
//! network layer calls [`now_ms`].

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Millis {
    let now = Utc::now().timestamp_millis();
    u64::try_from(now).unwrap_or(0)
}

/// Convert epoch milliseconds into a UTC timestamp for persisted records.
pub fn to_datetime(ms: Millis) -> DateTime<Utc> {
    let ms = i64::try_from(ms).unwrap_or(i64::MAX);
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_datetime_roundtrip() {
        let dt = to_datetime(1_700_000_000_123);
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
