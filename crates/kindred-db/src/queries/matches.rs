use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::Database;
use crate::error::StoreError;
use crate::models::{MatchRequestRow, PrivateDiscussionRow};
use kindred_types::models::MatchStatus;
use kindred_types::time::{format_ts, is_expired, parse_ts};

impl Database {
    /// Create a match request against someone else's note. The recipient is
    /// always derived from the note's current author, never supplied by the
    /// caller. At most one request may ever exist per (from, to, note)
    /// triple, whatever its status; the conflict carries the existing status
    /// so the caller can tell "already pending" from "was declined".
    pub fn create_match_request(
        &self,
        id: &str,
        from_user_id: &str,
        note_id: &str,
        message: Option<&str>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<MatchRequestRow, StoreError> {
        self.with_conn_mut(|conn| {
            let to_user_id: Option<String> = conn
                .query_row(
                    "SELECT author_id FROM notes WHERE id = ?1 AND active = 1",
                    [note_id],
                    |row| row.get(0),
                )
                .optional()?;
            let to_user_id = to_user_id.ok_or(StoreError::NotFound("note"))?;

            if from_user_id == to_user_id {
                return Err(StoreError::invalid(
                    "you cannot request a match on your own note",
                ));
            }

            let existing: Option<String> = conn
                .query_row(
                    "SELECT status FROM match_requests
                     WHERE from_user_id = ?1 AND to_user_id = ?2 AND note_id = ?3",
                    (from_user_id, &to_user_id, note_id),
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(status) = existing {
                return Err(StoreError::Conflict {
                    status: parse_status(&status)?,
                });
            }

            let created_at = format_ts(now);
            let expires_at = format_ts(now + ttl);
            conn.execute(
                "INSERT INTO match_requests
                     (id, from_user_id, to_user_id, note_id, status, message, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)",
                (id, from_user_id, &to_user_id, note_id, message, &created_at, &expires_at),
            )?;

            Ok(MatchRequestRow {
                id: id.to_string(),
                from_user_id: from_user_id.to_string(),
                to_user_id,
                note_id: note_id.to_string(),
                status: MatchStatus::Pending.as_str().to_string(),
                message: message.map(str::to_string),
                created_at,
                expires_at,
                note_emotion: None,
                note_situation: None,
                note_content: None,
            })
        })
    }

    /// Accept a pending request and open the private discussion, as one
    /// atomic unit. Holding the writer connection for the whole
    /// load-check-update-insert makes this linearizable against concurrent
    /// accept/decline/expiry on the same row: exactly one transition wins,
    /// the losers observe `status != 'pending'` and get NotFound.
    ///
    /// A stale request is healed on the way out: if the deadline has passed
    /// the row is flipped to `expired` (committed) and the call fails
    /// `Expired`. A stale request is never silently accepted.
    pub fn accept_match_request(
        &self,
        request_id: &str,
        acting_user_id: &str,
        discussion_id: &str,
        now: DateTime<Utc>,
        private_ttl: Duration,
    ) -> Result<PrivateDiscussionRow, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let pending: Option<(String, String, String, String)> = tx
                .query_row(
                    "SELECT from_user_id, to_user_id, note_id, expires_at
                     FROM match_requests
                     WHERE id = ?1 AND to_user_id = ?2 AND status = 'pending'",
                    (request_id, acting_user_id),
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let (from_user_id, to_user_id, note_id, expires_at) =
                pending.ok_or(StoreError::NotFound("request"))?;

            let deadline = parse_ts(&expires_at)
                .ok_or_else(|| anyhow!("corrupt expires_at '{}' on request {}", expires_at, request_id))?;
            if is_expired(deadline, now) {
                tx.execute(
                    "UPDATE match_requests SET status = 'expired'
                     WHERE id = ?1 AND status = 'pending'",
                    [request_id],
                )?;
                tx.commit()?;
                return Err(StoreError::Expired);
            }

            tx.execute(
                "UPDATE match_requests SET status = 'accepted'
                 WHERE id = ?1 AND status = 'pending'",
                [request_id],
            )?;

            let created_at = format_ts(now);
            let discussion_expires_at = format_ts(now + private_ttl);
            tx.execute(
                "INSERT INTO private_discussions
                     (id, user1_id, user2_id, note_id, created_at, expires_at, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                (
                    discussion_id,
                    &from_user_id,
                    &to_user_id,
                    &note_id,
                    &created_at,
                    &discussion_expires_at,
                ),
            )?;

            tx.commit()?;

            Ok(PrivateDiscussionRow {
                id: discussion_id.to_string(),
                user1_id: from_user_id,
                user2_id: to_user_id,
                note_id,
                created_at,
                expires_at: discussion_expires_at,
                active: true,
                note_emotion: None,
                note_situation: None,
                note_content: None,
            })
        })
    }

    /// Decline a pending request. The guarded single-row UPDATE answers
    /// "not yours", "already handled", and "no such request" identically
    /// with NotFound, so a caller probing requests learns nothing.
    pub fn decline_match_request(
        &self,
        request_id: &str,
        acting_user_id: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE match_requests SET status = 'declined'
                 WHERE id = ?1 AND to_user_id = ?2 AND status = 'pending'",
                (request_id, acting_user_id),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("request"));
            }
            Ok(())
        })
    }

    pub fn get_match_request(&self, id: &str) -> Result<Option<MatchRequestRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, from_user_id, to_user_id, note_id, status, message,
                            created_at, expires_at
                     FROM match_requests WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(MatchRequestRow {
                            id: row.get(0)?,
                            from_user_id: row.get(1)?,
                            to_user_id: row.get(2)?,
                            note_id: row.get(3)?,
                            status: row.get(4)?,
                            message: row.get(5)?,
                            created_at: row.get(6)?,
                            expires_at: row.get(7)?,
                            note_emotion: None,
                            note_situation: None,
                            note_content: None,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Requests addressed to a user, joined with the note for display.
    pub fn list_received_requests(
        &self,
        user_id: &str,
        status: Option<MatchStatus>,
    ) -> Result<Vec<MatchRequestRow>, StoreError> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT mr.id, mr.from_user_id, mr.to_user_id, mr.note_id, mr.status,
                        mr.message, mr.created_at, mr.expires_at,
                        n.emotion, n.situation, n.content
                 FROM match_requests mr
                 JOIN notes n ON mr.note_id = n.id
                 WHERE mr.to_user_id = ?1",
            );
            if status.is_some() {
                sql.push_str(" AND mr.status = ?2");
            }
            sql.push_str(" ORDER BY mr.created_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = match status {
                Some(status) => stmt
                    .query_map((user_id, status.as_str()), request_with_note_from_row)?
                    .collect::<Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([user_id], request_with_note_from_row)?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    /// Requests a user has sent, any status, joined with the note.
    pub fn list_sent_requests(&self, user_id: &str) -> Result<Vec<MatchRequestRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT mr.id, mr.from_user_id, mr.to_user_id, mr.note_id, mr.status,
                        mr.message, mr.created_at, mr.expires_at,
                        n.emotion, n.situation, n.content
                 FROM match_requests mr
                 JOIN notes n ON mr.note_id = n.id
                 WHERE mr.from_user_id = ?1
                 ORDER BY mr.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], request_with_note_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn request_with_note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchRequestRow> {
    Ok(MatchRequestRow {
        id: row.get(0)?,
        from_user_id: row.get(1)?,
        to_user_id: row.get(2)?,
        note_id: row.get(3)?,
        status: row.get(4)?,
        message: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        note_emotion: row.get(8)?,
        note_situation: row.get(9)?,
        note_content: row.get(10)?,
    })
}

fn parse_status(raw: &str) -> Result<MatchStatus, StoreError> {
    raw.parse()
        .map_err(|e: String| StoreError::Internal(anyhow!(e)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use crate::{Database, StoreError};
    use kindred_types::models::MatchStatus;
    use kindred_types::time::parse_ts;

    const REQUEST_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    const PRIVATE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

    fn user(db: &Database) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("{}@example.com", id), "hash", Utc::now())
            .unwrap();
        id
    }

    /// Author + sender + one active note by the author.
    fn fixture(db: &Database) -> (String, String, String) {
        let author = user(db);
        let sender = user(db);
        let note_id = Uuid::new_v4().to_string();
        db.create_note(&note_id, &author, "joy", "work", "promotion!", Utc::now())
            .unwrap();
        (author, sender, note_id)
    }

    #[test]
    fn happy_path_accept_opens_discussion() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        let now = Utc::now();

        let request = db
            .create_match_request(
                &Uuid::new_v4().to_string(),
                &sender,
                &note_id,
                Some("felt the same last year"),
                now,
                REQUEST_TTL,
            )
            .unwrap();
        assert_eq!(request.status, "pending");
        assert_eq!(request.to_user_id, author);
        let deadline = parse_ts(&request.expires_at).unwrap();
        assert_eq!((deadline - now).num_hours(), 24);

        let discussion = db
            .accept_match_request(
                &request.id,
                &author,
                &Uuid::new_v4().to_string(),
                now,
                PRIVATE_TTL,
            )
            .unwrap();
        assert_eq!(discussion.user1_id, sender);
        assert_eq!(discussion.user2_id, author);
        assert_eq!(discussion.note_id, note_id);
        assert!(discussion.active);
        let deadline = parse_ts(&discussion.expires_at).unwrap();
        assert_eq!((deadline - now).num_hours(), 2);

        let stored = db.get_match_request(&request.id).unwrap().unwrap();
        assert_eq!(stored.status, "accepted");
    }

    #[test]
    fn accept_is_recipient_only() {
        let db = Database::open_in_memory().unwrap();
        let (_, sender, note_id) = fixture(&db);
        let now = Utc::now();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap();

        // The sender cannot accept their own request
        let err = db
            .accept_match_request(&request.id, &sender, &Uuid::new_v4().to_string(), now, PRIVATE_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(db.get_match_request(&request.id).unwrap().unwrap().status, "pending");
    }

    #[test]
    fn second_accept_loses() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        let now = Utc::now();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap();

        db.accept_match_request(&request.id, &author, &Uuid::new_v4().to_string(), now, PRIVATE_TTL)
            .unwrap();
        let err = db
            .accept_match_request(&request.id, &author, &Uuid::new_v4().to_string(), now, PRIVATE_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        // exactly one discussion came out of it
        assert_eq!(db.list_private_discussions(&author).unwrap().len(), 1);
    }

    #[test]
    fn accept_and_decline_have_a_single_winner() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        let now = Utc::now();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap();

        db.decline_match_request(&request.id, &author).unwrap();
        let err = db
            .accept_match_request(&request.id, &author, &Uuid::new_v4().to_string(), now, PRIVATE_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(db.get_match_request(&request.id).unwrap().unwrap().status, "declined");
        assert!(db.list_private_discussions(&author).unwrap().is_empty());
    }

    #[test]
    fn concurrent_accepts_exactly_one_succeeds() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (author, sender, note_id) = fixture(&db);
        let now = Utc::now();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            let request_id = request.id.clone();
            let author = author.clone();
            handles.push(std::thread::spawn(move || {
                db.accept_match_request(
                    &request_id,
                    &author,
                    &Uuid::new_v4().to_string(),
                    now,
                    PRIVATE_TTL,
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert_eq!(db.list_private_discussions(&author).unwrap().len(), 1);
    }

    #[test]
    fn stale_accept_self_heals_to_expired() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        // created 25 hours ago: the 24h window has passed
        let created = Utc::now() - TimeDelta::hours(25);
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, created, REQUEST_TTL)
            .unwrap();

        let err = db
            .accept_match_request(
                &request.id,
                &author,
                &Uuid::new_v4().to_string(),
                Utc::now(),
                PRIVATE_TTL,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Expired));
        // the failed accept left the row terminal, not pending
        assert_eq!(db.get_match_request(&request.id).unwrap().unwrap().status, "expired");
        assert!(db.list_private_discussions(&author).unwrap().is_empty());
    }

    #[test]
    fn duplicate_request_reports_existing_status() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        let now = Utc::now();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap();

        let err = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { status: MatchStatus::Pending }));

        // declined requests keep blocking; there is no retry path
        db.decline_match_request(&request.id, &author).unwrap();
        let err = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { status: MatchStatus::Declined }));
    }

    #[test]
    fn self_match_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (author, _, note_id) = fixture(&db);

        let err = db
            .create_match_request(&Uuid::new_v4().to_string(), &author, &note_id, None, Utc::now(), REQUEST_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn request_on_deleted_note_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        db.deactivate_note(&note_id, &author).unwrap();

        let err = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, Utc::now(), REQUEST_TTL)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn listings_join_note_context() {
        let db = Database::open_in_memory().unwrap();
        let (author, sender, note_id) = fixture(&db);
        let now = Utc::now();
        db.create_match_request(&Uuid::new_v4().to_string(), &sender, &note_id, None, now, REQUEST_TTL)
            .unwrap();

        let received = db
            .list_received_requests(&author, Some(MatchStatus::Pending))
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].note_emotion.as_deref(), Some("joy"));
        assert_eq!(received[0].note_content.as_deref(), Some("promotion!"));

        assert!(
            db.list_received_requests(&author, Some(MatchStatus::Accepted))
                .unwrap()
                .is_empty()
        );
        assert_eq!(db.list_sent_requests(&sender).unwrap().len(), 1);
        assert!(db.list_sent_requests(&author).unwrap().is_empty());
    }
}
