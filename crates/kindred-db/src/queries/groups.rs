use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::OptionalExtension;
use tracing::warn;

use crate::Database;
use crate::error::StoreError;
use crate::models::{GroupDiscussionRow, GroupSummaryRow, MessageRow};
use kindred_types::time::{format_ts, is_expired, parse_ts};

/// Window for counting a sender as "in the room".
fn participant_window() -> TimeDelta {
    TimeDelta::minutes(5)
}

impl Database {
    /// Find-or-create the shared room for an (emotion, situation) pair:
    /// reuse the newest still-live room if one is visible, otherwise open a
    /// fresh one. Reuse-if-observed only: two processes racing with no
    /// existing room may legitimately open two. Rooms are ephemeral and the
    /// matcher makes no global-uniqueness promise.
    ///
    /// Returns the room and whether it was newly created.
    pub fn join_or_create_group(
        &self,
        new_id: &str,
        emotion: &str,
        situation: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(GroupDiscussionRow, bool), StoreError> {
        self.with_conn_mut(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, emotion, situation, created_at, expires_at, active
                     FROM group_discussions
                     WHERE emotion = ?1 AND situation = ?2 AND active = 1
                     ORDER BY created_at DESC
                     LIMIT 1",
                    (emotion, situation),
                    group_from_row,
                )
                .optional()?;

            if let Some(room) = existing {
                match parse_ts(&room.expires_at) {
                    Some(deadline) if !is_expired(deadline, now) => return Ok((room, false)),
                    Some(_) => {} // stale room; leave the flip to the reaper
                    None => warn!("Corrupt expires_at '{}' on room {}", room.expires_at, room.id),
                }
            }

            let created_at = format_ts(now);
            let expires_at = format_ts(now + ttl);
            conn.execute(
                "INSERT INTO group_discussions (id, emotion, situation, created_at, expires_at, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                (new_id, emotion, situation, &created_at, &expires_at),
            )?;

            Ok((
                GroupDiscussionRow {
                    id: new_id.to_string(),
                    emotion: emotion.to_string(),
                    situation: situation.to_string(),
                    created_at,
                    expires_at,
                    active: true,
                },
                true,
            ))
        })
    }

    /// Fetch a room, lazily marking it inactive when its window has passed.
    /// The returned row reflects the flip; callers decide how to surface an
    /// inactive room. The write-back is best-effort: a failed flip is
    /// logged and the read still answers.
    pub fn get_group_discussion(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<GroupDiscussionRow, StoreError> {
        let mut room = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, emotion, situation, created_at, expires_at, active
                 FROM group_discussions WHERE id = ?1",
                [id],
                group_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound("discussion"))
        })?;

        if room.active && parse_ts(&room.expires_at).is_some_and(|d| is_expired(d, now)) {
            match self.mark_group_inactive(id) {
                Ok(_) => room.active = false,
                Err(e) => warn!("Lazy expiry of room {} failed: {}", id, e),
            }
        }

        Ok(room)
    }

    /// Guarded flip; a no-op on rooms already marked inactive.
    pub fn mark_group_inactive(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE group_discussions SET active = 0 WHERE id = ?1 AND active = 1",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Distinct recent senders, the best approximation of "who is here"
    /// for an anonymous drop-in room.
    pub fn group_participant_count(
        &self,
        discussion_id: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(DISTINCT user_id) FROM group_messages
                 WHERE discussion_id = ?1 AND created_at > ?2",
                (discussion_id, format_ts(now - participant_window())),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Append a message. Rejects rooms that are gone, checking both the
    /// stored flag and the timestamp, and flipping the flag first when the
    /// timestamp alone says so.
    pub fn post_group_message(
        &self,
        id: &str,
        discussion_id: &str,
        user_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let room: Option<(bool, String)> = conn
                .query_row(
                    "SELECT active, expires_at FROM group_discussions WHERE id = ?1",
                    [discussion_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (active, expires_at) = room.ok_or(StoreError::NotFound("discussion"))?;

            if !active {
                return Err(StoreError::Gone);
            }
            if parse_ts(&expires_at).is_some_and(|d| is_expired(d, now)) {
                conn.execute(
                    "UPDATE group_discussions SET active = 0 WHERE id = ?1 AND active = 1",
                    [discussion_id],
                )?;
                return Err(StoreError::Gone);
            }

            conn.execute(
                "INSERT INTO group_messages (id, discussion_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, discussion_id, user_id, content, format_ts(now)),
            )?;
            Ok(())
        })
    }

    /// Messages in creation order. `since` is an exclusive lower bound for
    /// incremental polling.
    pub fn list_group_messages(
        &self,
        discussion_id: &str,
        limit: u32,
        offset: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM group_discussions WHERE id = ?1",
                    [discussion_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound("discussion"));
            }

            query_messages(conn, "group_messages", discussion_id, limit, offset, since)
        })
    }

    /// Live rooms, most recently active first, with message/participant
    /// aggregates for the public feed.
    pub fn list_active_groups(
        &self,
        limit: u32,
        offset: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupSummaryRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.id, d.emotion, d.situation, d.created_at, d.expires_at,
                        COUNT(DISTINCT CASE WHEN m.created_at > ?1 THEN m.user_id END),
                        COUNT(m.id),
                        MAX(m.created_at)
                 FROM group_discussions d
                 LEFT JOIN group_messages m ON d.id = m.discussion_id
                 WHERE d.active = 1
                 GROUP BY d.id
                 ORDER BY MAX(m.created_at) DESC, d.created_at DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![format_ts(now - participant_window()), limit, offset],
                    |row| {
                        Ok(GroupSummaryRow {
                            id: row.get(0)?,
                            emotion: row.get(1)?,
                            situation: row.get(2)?,
                            created_at: row.get(3)?,
                            expires_at: row.get(4)?,
                            participant_count: row.get(5)?,
                            message_count: row.get(6)?,
                            last_message_at: row.get(7)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;

            // The flag can lag the clock between sweeps; the deadline check
            // is authoritative.
            Ok(rows
                .into_iter()
                .filter(|r| parse_ts(&r.expires_at).is_some_and(|d| !is_expired(d, now)))
                .collect())
        })
    }
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupDiscussionRow> {
    Ok(GroupDiscussionRow {
        id: row.get(0)?,
        emotion: row.get(1)?,
        situation: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        active: row.get(5)?,
    })
}

/// Shared by group and private message listings; the two tables have the
/// same shape and the same ordering contract.
pub(crate) fn query_messages(
    conn: &rusqlite::Connection,
    table: &str,
    discussion_id: &str,
    limit: u32,
    offset: u32,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MessageRow>, StoreError> {
    let mut sql = format!(
        "SELECT id, discussion_id, user_id, content, created_at
         FROM {table}
         WHERE discussion_id = ?"
    );
    let since_str = since.map(format_ts);
    let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&discussion_id];
    if let Some(since_str) = &since_str {
        sql.push_str(" AND created_at > ?");
        params.push(since_str);
    }
    sql.push_str(" ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?");
    params.push(&limit);
    params.push(&offset);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                discussion_id: row.get(1)?,
                user_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use crate::{Database, StoreError};
    use kindred_types::time::parse_ts;

    const GROUP_TTL: Duration = Duration::from_secs(30 * 60);

    fn user(db: &Database) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("{}@example.com", id), "hash", Utc::now())
            .unwrap();
        id
    }

    #[test]
    fn second_join_reuses_the_live_room() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let (first, created) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "joy", "work", now, GROUP_TTL)
            .unwrap();
        assert!(created);

        let (second, created) = db
            .join_or_create_group(
                &Uuid::new_v4().to_string(),
                "joy",
                "work",
                now + TimeDelta::minutes(10),
                GROUP_TTL,
            )
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        // a different pair gets its own room
        let (other, created) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "joy", "family", now, GROUP_TTL)
            .unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn expired_room_is_not_reused() {
        let db = Database::open_in_memory().unwrap();
        let opened = Utc::now() - TimeDelta::hours(1);

        let (stale, _) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "anxiety", "studies", opened, GROUP_TTL)
            .unwrap();
        let (fresh, created) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "anxiety", "studies", Utc::now(), GROUP_TTL)
            .unwrap();
        assert!(created);
        assert_ne!(fresh.id, stale.id);
    }

    #[test]
    fn read_lazily_marks_expired_room() {
        let db = Database::open_in_memory().unwrap();
        let opened = Utc::now() - TimeDelta::hours(1);
        let (room, _) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "fear", "conflict", opened, GROUP_TTL)
            .unwrap();

        let read = db.get_group_discussion(&room.id, Utc::now()).unwrap();
        assert!(!read.active);
        // the flip persisted
        let again = db.get_group_discussion(&room.id, Utc::now()).unwrap();
        assert!(!again.active);
    }

    #[test]
    fn posting_to_expired_room_flips_and_rejects() {
        let db = Database::open_in_memory().unwrap();
        let sender = user(&db);
        let opened = Utc::now() - TimeDelta::hours(1);
        let (room, _) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "sadness", "loss", opened, GROUP_TTL)
            .unwrap();

        let err = db
            .post_group_message(&Uuid::new_v4().to_string(), &room.id, &sender, "anyone here?", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Gone));
        assert!(!db.get_group_discussion(&room.id, Utc::now()).unwrap().active);

        // and a second post still answers Gone off the stored flag
        let err = db
            .post_group_message(&Uuid::new_v4().to_string(), &room.id, &sender, "hello?", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Gone));
    }

    #[test]
    fn incremental_polling_sees_every_message_once() {
        let db = Database::open_in_memory().unwrap();
        let sender = user(&db);
        let now = Utc::now();
        let (room, _) = db
            .join_or_create_group(&Uuid::new_v4().to_string(), "hope", "big-decision", now, GROUP_TTL)
            .unwrap();

        for i in 0..5 {
            db.post_group_message(
                &Uuid::new_v4().to_string(),
                &room.id,
                &sender,
                &format!("message {}", i),
                now + TimeDelta::seconds(i),
            )
            .unwrap();
        }

        let full = db.list_group_messages(&room.id, 50, 0, None).unwrap();
        assert_eq!(full.len(), 5);
        let contents: Vec<_> = full.iter().map(|m| m.content.clone()).collect();
        assert!(contents.windows(2).all(|w| w[0] < w[1]));

        // resume strictly after the second message: the rest, no dups, no gaps
        let since = parse_ts(&full[1].created_at).unwrap();
        let rest = db.list_group_messages(&room.id, 50, 0, Some(since)).unwrap();
        let rest_ids: Vec<_> = rest.iter().map(|m| m.id.clone()).collect();
        let tail_ids: Vec<_> = full[2..].iter().map(|m| m.id.clone()).collect();
        assert_eq!(rest_ids, tail_ids);
    }

    #[test]
    fn listing_messages_of_unknown_room_fails() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .list_group_messages(&Uuid::new_v4().to_string(), 50, 0, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn active_feed_skips_expired_rooms() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.join_or_create_group(&Uuid::new_v4().to_string(), "joy", "work", now, GROUP_TTL)
            .unwrap();
        db.join_or_create_group(
            &Uuid::new_v4().to_string(),
            "anger",
            "family",
            now - TimeDelta::hours(2),
            GROUP_TTL,
        )
        .unwrap();

        let feed = db.list_active_groups(20, 0, now).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].emotion, "joy");
    }
}
