use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::Database;
use crate::error::StoreError;
use crate::models::ReactionCountRow;
use kindred_types::time::format_ts;

impl Database {
    /// Toggle a reaction on a note: removes if present, inserts if not.
    /// Returns true when the reaction was added, false when removed.
    pub fn toggle_note_reaction(
        &self,
        id: &str,
        note_id: &str,
        user_id: &str,
        reaction: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let note_exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM notes WHERE id = ?1 AND active = 1",
                    [note_id],
                    |row| row.get(0),
                )
                .optional()?;
            if note_exists.is_none() {
                return Err(StoreError::NotFound("note"));
            }

            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM note_reactions
                     WHERE note_id = ?1 AND user_id = ?2 AND reaction = ?3",
                    (note_id, user_id, reaction),
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM note_reactions WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO note_reactions (id, note_id, user_id, reaction, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (id, note_id, user_id, reaction, format_ts(now)),
                )?;
                Ok(true)
            }
        })
    }

    /// Per-reaction tallies for one note.
    pub fn reaction_counts(&self, note_id: &str) -> Result<Vec<ReactionCountRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT reaction, COUNT(*) FROM note_reactions
                 WHERE note_id = ?1
                 GROUP BY reaction",
            )?;
            let rows = stmt
                .query_map([note_id], |row| {
                    Ok(ReactionCountRow {
                        reaction: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, StoreError};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn toggle_adds_then_removes() {
        let db = Database::open_in_memory().unwrap();
        let author = Uuid::new_v4().to_string();
        let reader = Uuid::new_v4().to_string();
        db.create_user(&author, "a@example.com", "hash", Utc::now()).unwrap();
        db.create_user(&reader, "b@example.com", "hash", Utc::now()).unwrap();
        let note_id = Uuid::new_v4().to_string();
        db.create_note(&note_id, &author, "loneliness", "loss", "missing them", Utc::now())
            .unwrap();

        let added = db
            .toggle_note_reaction(&Uuid::new_v4().to_string(), &note_id, &reader, "comfort", Utc::now())
            .unwrap();
        assert!(added);
        assert_eq!(db.reaction_counts(&note_id).unwrap().len(), 1);

        let added = db
            .toggle_note_reaction(&Uuid::new_v4().to_string(), &note_id, &reader, "comfort", Utc::now())
            .unwrap();
        assert!(!added);
        assert!(db.reaction_counts(&note_id).unwrap().is_empty());
    }

    #[test]
    fn reacting_to_missing_note_fails() {
        let db = Database::open_in_memory().unwrap();
        let reader = Uuid::new_v4().to_string();
        db.create_user(&reader, "c@example.com", "hash", Utc::now()).unwrap();

        let err = db
            .toggle_note_reaction(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &reader,
                "heart",
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
