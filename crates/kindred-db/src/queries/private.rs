use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::warn;

use crate::Database;
use crate::error::StoreError;
use crate::models::{MessageRow, PrivateDiscussionRow, PrivateSummaryRow};
use crate::queries::groups::query_messages;
use kindred_types::time::{format_ts, is_expired, parse_ts};

impl Database {
    /// Fetch a discussion as one of its two participants. Anyone else gets
    /// NotFound; whether the discussion exists is itself private. A
    /// discussion past its window is lazily marked inactive and returned
    /// marked: the API flags expired discussions rather than hiding them.
    pub fn get_private_discussion(
        &self,
        id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PrivateDiscussionRow, StoreError> {
        let mut discussion = self.with_conn(|conn| {
            conn.query_row(
                "SELECT pd.id, pd.user1_id, pd.user2_id, pd.note_id, pd.created_at,
                        pd.expires_at, pd.active, n.emotion, n.situation, n.content
                 FROM private_discussions pd
                 LEFT JOIN notes n ON pd.note_id = n.id
                 WHERE pd.id = ?1 AND (pd.user1_id = ?2 OR pd.user2_id = ?2)",
                (id, user_id),
                private_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound("discussion"))
        })?;

        if discussion.active && parse_ts(&discussion.expires_at).is_some_and(|d| is_expired(d, now))
        {
            match self.mark_private_inactive(id) {
                Ok(_) => discussion.active = false,
                Err(e) => warn!("Lazy expiry of discussion {} failed: {}", id, e),
            }
        }

        Ok(discussion)
    }

    /// Guarded flip; a no-op on discussions already marked inactive.
    pub fn mark_private_inactive(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE private_discussions SET active = 0 WHERE id = ?1 AND active = 1",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// The caller's open discussions, most recently talked-in first.
    pub fn list_private_discussions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PrivateSummaryRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pd.id, pd.user1_id, pd.user2_id, pd.note_id, pd.created_at,
                        pd.expires_at, n.emotion, n.situation, n.content,
                        COUNT(pm.id), MAX(pm.created_at)
                 FROM private_discussions pd
                 LEFT JOIN notes n ON pd.note_id = n.id
                 LEFT JOIN private_messages pm ON pd.id = pm.discussion_id
                 WHERE (pd.user1_id = ?1 OR pd.user2_id = ?1) AND pd.active = 1
                 GROUP BY pd.id
                 ORDER BY MAX(pm.created_at) DESC, pd.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PrivateSummaryRow {
                        id: row.get(0)?,
                        user1_id: row.get(1)?,
                        user2_id: row.get(2)?,
                        note_id: row.get(3)?,
                        created_at: row.get(4)?,
                        expires_at: row.get(5)?,
                        note_emotion: row.get(6)?,
                        note_situation: row.get(7)?,
                        note_content: row.get(8)?,
                        message_count: row.get(9)?,
                        last_message_at: row.get(10)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Append a message as a participant. Rejects Gone off the stored flag
    /// OR the timestamp: an expired discussion refuses messages even
    /// before any sweep or lazy read has flipped it.
    pub fn post_private_message(
        &self,
        id: &str,
        discussion_id: &str,
        user_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let discussion: Option<(bool, String)> = conn
                .query_row(
                    "SELECT active, expires_at FROM private_discussions
                     WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2)",
                    (discussion_id, user_id),
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (active, expires_at) = discussion.ok_or(StoreError::NotFound("discussion"))?;

            if !active {
                return Err(StoreError::Gone);
            }
            if parse_ts(&expires_at).is_some_and(|d| is_expired(d, now)) {
                conn.execute(
                    "UPDATE private_discussions SET active = 0 WHERE id = ?1 AND active = 1",
                    [discussion_id],
                )?;
                return Err(StoreError::Gone);
            }

            conn.execute(
                "INSERT INTO private_messages (id, discussion_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, discussion_id, user_id, content, format_ts(now)),
            )?;
            Ok(())
        })
    }

    /// Messages in creation order, participants only; same `since` contract
    /// as group rooms.
    pub fn list_private_messages(
        &self,
        discussion_id: &str,
        user_id: &str,
        limit: u32,
        offset: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let member: Option<String> = conn
                .query_row(
                    "SELECT id FROM private_discussions
                     WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2)",
                    (discussion_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            if member.is_none() {
                return Err(StoreError::NotFound("discussion"));
            }

            query_messages(conn, "private_messages", discussion_id, limit, offset, since)
        })
    }
}

fn private_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrivateDiscussionRow> {
    Ok(PrivateDiscussionRow {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        note_id: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        active: row.get(6)?,
        note_emotion: row.get(7)?,
        note_situation: row.get(8)?,
        note_content: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use crate::models::PrivateDiscussionRow;
    use crate::{Database, StoreError};
    use kindred_types::time::parse_ts;

    const REQUEST_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    const PRIVATE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

    fn user(db: &Database) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("{}@example.com", id), "hash", Utc::now())
            .unwrap();
        id
    }

    /// Author + sender + a discussion opened by the accept path at
    /// `accepted_at` (the only way discussions come to exist).
    fn discussion_fixture(
        db: &Database,
        accepted_at: chrono::DateTime<Utc>,
    ) -> (String, String, PrivateDiscussionRow) {
        let author = user(db);
        let sender = user(db);
        let note_id = Uuid::new_v4().to_string();
        db.create_note(&note_id, &author, "gratitude", "celebration", "we made it", accepted_at)
            .unwrap();
        let request = db
            .create_match_request(
                &Uuid::new_v4().to_string(),
                &sender,
                &note_id,
                None,
                accepted_at,
                REQUEST_TTL,
            )
            .unwrap();
        let discussion = db
            .accept_match_request(
                &request.id,
                &author,
                &Uuid::new_v4().to_string(),
                accepted_at,
                PRIVATE_TTL,
            )
            .unwrap();
        (author, sender, discussion)
    }

    #[test]
    fn strangers_get_not_found() {
        let db = Database::open_in_memory().unwrap();
        let (_, _, discussion) = discussion_fixture(&db, Utc::now());
        let stranger = user(&db);

        let err = db
            .get_private_discussion(&discussion.id, &stranger, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = db
            .post_private_message(&Uuid::new_v4().to_string(), &discussion.id, &stranger, "hi", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = db
            .list_private_messages(&discussion.id, &stranger, 50, 0, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn both_participants_can_talk() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let (author, sender, discussion) = discussion_fixture(&db, now);

        db.post_private_message(&Uuid::new_v4().to_string(), &discussion.id, &sender, "hello", now)
            .unwrap();
        db.post_private_message(
            &Uuid::new_v4().to_string(),
            &discussion.id,
            &author,
            "hey, thanks for reaching out",
            now + TimeDelta::seconds(1),
        )
        .unwrap();

        let messages = db
            .list_private_messages(&discussion.id, &author, 50, 0, None)
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].user_id, sender);

        // incremental fetch picks up only the reply
        let since = parse_ts(&messages[0].created_at).unwrap();
        let rest = db
            .list_private_messages(&discussion.id, &sender, 50, 0, Some(since))
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].user_id, author);
    }

    #[test]
    fn expired_read_returns_the_marked_record() {
        let db = Database::open_in_memory().unwrap();
        // accepted three hours ago: the 2h window has passed
        let (author, _, discussion) = discussion_fixture(&db, Utc::now() - TimeDelta::hours(3));

        let read = db
            .get_private_discussion(&discussion.id, &author, Utc::now())
            .unwrap();
        assert!(!read.active);
        assert_eq!(read.id, discussion.id);
        // note context still joined for display
        assert_eq!(read.note_emotion.as_deref(), Some("gratitude"));
    }

    #[test]
    fn expired_post_rejected_before_any_flip() {
        let db = Database::open_in_memory().unwrap();
        let (_, sender, discussion) = discussion_fixture(&db, Utc::now() - TimeDelta::hours(3));

        // no sweep and no lazy read has run; the timestamp alone rejects
        let err = db
            .post_private_message(
                &Uuid::new_v4().to_string(),
                &discussion.id,
                &sender,
                "still there?",
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Gone));

        // and the rejection flipped the flag on its way out
        let read = db
            .get_private_discussion(&discussion.id, &sender, Utc::now())
            .unwrap();
        assert!(!read.active);
    }

    #[test]
    fn listing_excludes_closed_discussions() {
        let db = Database::open_in_memory().unwrap();
        let (author, _, discussion) = discussion_fixture(&db, Utc::now());

        assert_eq!(db.list_private_discussions(&author).unwrap().len(), 1);
        db.mark_private_inactive(&discussion.id).unwrap();
        assert!(db.list_private_discussions(&author).unwrap().is_empty());
    }
}
