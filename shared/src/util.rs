use chrono::{DateTime, Utc};

/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// `yyyymmdd` of a millisecond timestamp (UTC), used in order numbers
pub fn date_stamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y%m%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_stamp_formats_utc_day() {
        // 2026-01-02T03:04:05Z
        assert_eq!(date_stamp(1_767_323_045_000), "20260102");
        assert_eq!(date_stamp(0), "19700101");
    }
}
