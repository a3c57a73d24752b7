use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use kindred_db::models::MessageRow;
use kindred_types::api::MessageResponse;
use kindred_types::time::parse_ts;

/// Stored ids are written by us and should always parse; a row that doesn't
/// is corrupt, so warn and degrade instead of failing the whole response.
pub(crate) fn parse_id(field: &str, raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", field, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_time(field: &str, raw: &str) -> DateTime<Utc> {
    parse_ts(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}'", field, raw);
        DateTime::default()
    })
}

pub(crate) fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_id("message id", &row.id),
        discussion_id: parse_id("discussion_id", &row.discussion_id),
        user_id: parse_id("user_id", &row.user_id),
        content: row.content,
        created_at: parse_time("created_at", &row.created_at),
    }
}
