//! Database repositories for each table.

use chrono::{DateTime, Utc};

pub mod articles;
pub mod profiles;

pub use articles::ArticlesRepo;
pub use profiles::ProfilesRepo;

/// Parse a timestamp column written as RFC 3339 (or SQLite's default format).
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
