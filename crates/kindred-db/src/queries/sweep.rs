use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::warn;

use crate::Database;
use crate::error::StoreError;
use kindred_types::api::{ExpirationStats, SweepReport};
use kindred_types::time::{format_ts, is_expired, parse_ts};

impl Database {
    /// Guarded terminal flip; a no-op once the request has left `pending`.
    pub fn expire_match_request(&self, id: &str) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE match_requests SET status = 'expired'
                 WHERE id = ?1 AND status = 'pending'",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// One reaper pass: flip every pending request and active discussion
    /// whose deadline has passed. Row-by-row: one bad row is logged and
    /// skipped, the rest of the sweep continues. Never deletes anything,
    /// and never raises: re-running over already-flipped rows is a no-op,
    /// and racing a lazy expiry check converges on the same terminal state.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for id in self.expiry_candidates(
            "SELECT id, expires_at FROM match_requests WHERE status = 'pending' AND expires_at < ?1",
            now,
        ) {
            match self.expire_match_request(&id) {
                Ok(true) => report.match_requests += 1,
                Ok(false) => {} // a lazy check got there first
                Err(e) => warn!("Sweep: failed to expire request {}: {}", id, e),
            }
        }

        for id in self.expiry_candidates(
            "SELECT id, expires_at FROM group_discussions WHERE active = 1 AND expires_at < ?1",
            now,
        ) {
            match self.mark_group_inactive(&id) {
                Ok(true) => report.group_discussions += 1,
                Ok(false) => {}
                Err(e) => warn!("Sweep: failed to close room {}: {}", id, e),
            }
        }

        for id in self.expiry_candidates(
            "SELECT id, expires_at FROM private_discussions WHERE active = 1 AND expires_at < ?1",
            now,
        ) {
            match self.mark_private_inactive(&id) {
                Ok(true) => report.private_discussions += 1,
                Ok(false) => {}
                Err(e) => warn!("Sweep: failed to close discussion {}: {}", id, e),
            }
        }

        report
    }

    /// Rows past their deadline that nothing has flipped yet. What the
    /// sweep WOULD do, useful for monitoring sweep lag.
    pub fn expiration_stats(&self, now: DateTime<Utc>) -> Result<ExpirationStats, StoreError> {
        Ok(ExpirationStats {
            pending_match_requests: self
                .expiry_candidates(
                    "SELECT id, expires_at FROM match_requests WHERE status = 'pending' AND expires_at < ?1",
                    now,
                )
                .len(),
            active_group_discussions: self
                .expiry_candidates(
                    "SELECT id, expires_at FROM group_discussions WHERE active = 1 AND expires_at < ?1",
                    now,
                )
                .len(),
            active_private_discussions: self
                .expiry_candidates(
                    "SELECT id, expires_at FROM private_discussions WHERE active = 1 AND expires_at < ?1",
                    now,
                )
                .len(),
        })
    }

    /// Ids of rows whose deadline has passed. The SQL comparison is an
    /// index prefilter; the parse-and-check below is the authoritative
    /// test, through the same predicate the lazy paths use.
    fn expiry_candidates(&self, sql: &str, now: DateTime<Utc>) -> Vec<String> {
        let result = self.with_conn(|conn| query_candidates(conn, sql, now));
        match result {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Sweep: candidate query failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn query_candidates(
    conn: &Connection,
    sql: &str,
    now: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([format_ts(now)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, expires_at)| match parse_ts(&expires_at) {
            Some(deadline) if is_expired(deadline, now) => Some(id),
            Some(_) => None,
            None => {
                warn!("Sweep: corrupt expires_at '{}' on row {}", expires_at, id);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use crate::Database;

    const GROUP_TTL: Duration = Duration::from_secs(30 * 60);
    const REQUEST_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    const PRIVATE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

    fn user(db: &Database) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("{}@example.com", id), "hash", Utc::now())
            .unwrap();
        id
    }

    /// One expired entity of each kind, plus one live request that must
    /// survive the sweep.
    fn populate(db: &Database) -> String {
        let author = user(db);
        let sender = user(db);
        let long_ago = Utc::now() - TimeDelta::days(2);

        let stale_note = Uuid::new_v4().to_string();
        db.create_note(&stale_note, &author, "anxiety", "work", "deadline", long_ago)
            .unwrap();
        db.create_match_request(&Uuid::new_v4().to_string(), &sender, &stale_note, None, long_ago, REQUEST_TTL)
            .unwrap();

        db.join_or_create_group(&Uuid::new_v4().to_string(), "anxiety", "work", long_ago, GROUP_TTL)
            .unwrap();

        let other_note = Uuid::new_v4().to_string();
        db.create_note(&other_note, &author, "hope", "health", "recovering", long_ago)
            .unwrap();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &other_note, None, long_ago, REQUEST_TTL)
            .unwrap();
        // accepted long ago too, so the discussion window has passed as well
        db.accept_match_request(&request.id, &author, &Uuid::new_v4().to_string(), long_ago, PRIVATE_TTL)
            .unwrap();

        let fresh_note = Uuid::new_v4().to_string();
        db.create_note(&fresh_note, &author, "joy", "family", "reunion", Utc::now())
            .unwrap();
        let live = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &fresh_note, None, Utc::now(), REQUEST_TTL)
            .unwrap();
        live.id
    }

    #[test]
    fn sweep_flips_everything_expired_and_nothing_else() {
        let db = Database::open_in_memory().unwrap();
        let live_request = populate(&db);
        let now = Utc::now();

        let stats = db.expiration_stats(now).unwrap();
        assert_eq!(stats.pending_match_requests, 1);
        assert_eq!(stats.active_group_discussions, 1);
        assert_eq!(stats.active_private_discussions, 1);

        let report = db.sweep_expired(now);
        assert_eq!(report.match_requests, 1);
        assert_eq!(report.group_discussions, 1);
        assert_eq!(report.private_discussions, 1);
        assert_eq!(report.total(), 3);

        // the live request is untouched
        assert_eq!(db.get_match_request(&live_request).unwrap().unwrap().status, "pending");

        // nothing left to do
        let stats = db.expiration_stats(now).unwrap();
        assert_eq!(stats.pending_match_requests, 0);
        assert_eq!(stats.active_group_discussions, 0);
        assert_eq!(stats.active_private_discussions, 0);
    }

    #[test]
    fn sweep_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        populate(&db);
        let now = Utc::now();

        assert_eq!(db.sweep_expired(now).total(), 3);
        assert_eq!(db.sweep_expired(now).total(), 0);
        assert_eq!(db.sweep_expired(now + TimeDelta::minutes(5)).total(), 0);
    }

    #[test]
    fn terminal_rows_never_transition_again() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db);
        let sender = user(&db);
        let long_ago = Utc::now() - TimeDelta::days(2);
        let note = Uuid::new_v4().to_string();
        db.create_note(&note, &author, "loneliness", "relationships", "...", long_ago)
            .unwrap();
        let request = db
            .create_match_request(&Uuid::new_v4().to_string(), &sender, &note, None, long_ago, REQUEST_TTL)
            .unwrap();
        db.decline_match_request(&request.id, &author).unwrap();

        // a declined request is past its deadline but NOT the sweep's
        // business; only pending rows expire
        assert_eq!(db.sweep_expired(Utc::now()).match_requests, 0);
        assert_eq!(db.get_match_request(&request.id).unwrap().unwrap().status, "declined");

        // and a direct expiry flip on it is a no-op
        assert!(!db.expire_match_request(&request.id).unwrap());
    }
}
