//! Time-related utilities

use chrono::{DateTime, Timelike, Utc};

/// Truncate a timestamp to the start of its UTC hour
pub fn truncate_to_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(time)
}

/// `YYYYMM` of the given time, used as the monthly table suffix
pub fn month_suffix(time: DateTime<Utc>) -> String {
    time.format("%Y%m").to_string()
}

/// RFC 1123 date as used in HTTP headers, e.g. `Sun, 31 Jul 2016 18:54:30 GMT`
pub fn rfc1123(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
