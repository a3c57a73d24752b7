use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// A time-boxed entity is expired strictly after its deadline. Every lazy
/// expiry check and the background reaper go through this one predicate so
/// the two paths can never disagree.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > expires_at
}

/// Canonical storage format: fixed-width RFC 3339 UTC with microseconds.
/// Fixed width means lexicographic order on the stored TEXT column is
/// chronological order, which the message pagination queries rely on.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Accepts RFC 3339, falling back to SQLite's
/// naive `datetime('now')` format ("YYYY-MM-DD HH:MM:SS") treated as UTC.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .ok()
}
