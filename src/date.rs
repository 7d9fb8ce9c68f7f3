//! RFC 1123 timestamps for the `Date` header.

use chrono::{DateTime, Utc};

const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a UTC instant as `Mon, 02 Jan 2006 15:04:05 GMT`
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format(RFC1123_FORMAT).to_string()
}

/// The current time as an HTTP date
pub fn http_date_now() -> String {
    http_date(Utc::now())
}
