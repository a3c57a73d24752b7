use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::Database;
use crate::error::StoreError;
use crate::models::NoteRow;
use kindred_types::time::format_ts;

const NOTE_COLUMNS: &str = "n.id, n.author_id, n.emotion, n.situation, n.content, n.created_at,
         n.active, COUNT(nr.id) as reaction_count";

impl Database {
    pub fn create_note(
        &self,
        id: &str,
        author_id: &str,
        emotion: &str,
        situation: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notes (id, author_id, emotion, situation, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, author_id, emotion, situation, content, format_ts(now)),
            )?;
            Ok(())
        })
    }

    /// Active-notes feed, newest first, with optional emotion/situation
    /// filters.
    pub fn list_notes(
        &self,
        emotion: Option<&str>,
        situation: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NoteRow>, StoreError> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {NOTE_COLUMNS}
                 FROM notes n
                 LEFT JOIN note_reactions nr ON n.id = nr.note_id
                 WHERE n.active = 1"
            );
            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::new();

            if let Some(emotion) = &emotion {
                sql.push_str(" AND n.emotion = ?");
                params.push(emotion);
            }
            if let Some(situation) = &situation {
                sql.push_str(" AND n.situation = ?");
                params.push(situation);
            }

            sql.push_str(
                " GROUP BY n.id
                 ORDER BY n.created_at DESC
                 LIMIT ? OFFSET ?",
            );
            params.push(&limit);
            params.push(&offset);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), note_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fetch one active note.
    pub fn get_note(&self, id: &str) -> Result<Option<NoteRow>, StoreError> {
        self.with_conn(|conn| query_note(conn, id))
    }

    pub fn list_notes_by_author(
        &self,
        author_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NoteRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTE_COLUMNS}
                 FROM notes n
                 LEFT JOIN note_reactions nr ON n.id = nr.note_id
                 WHERE n.author_id = ?1 AND n.active = 1
                 GROUP BY n.id
                 ORDER BY n.created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![author_id, limit, offset], note_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Author-guarded edit. Returns false when the note is missing, inactive,
    /// or belongs to someone else.
    pub fn update_note(
        &self,
        id: &str,
        author_id: &str,
        emotion: &str,
        situation: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE notes SET emotion = ?1, situation = ?2, content = ?3, updated_at = ?4
                 WHERE id = ?5 AND author_id = ?6 AND active = 1",
                (emotion, situation, content, format_ts(now), id, author_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// Soft delete: notes are never removed, only flagged inactive.
    pub fn deactivate_note(&self, id: &str, author_id: &str) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE notes SET active = 0 WHERE id = ?1 AND author_id = ?2 AND active = 1",
                (id, author_id),
            )?;
            Ok(changed > 0)
        })
    }
}

pub(crate) fn query_note(conn: &Connection, id: &str) -> Result<Option<NoteRow>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {NOTE_COLUMNS}
                 FROM notes n
                 LEFT JOIN note_reactions nr ON n.id = nr.note_id
                 WHERE n.id = ?1 AND n.active = 1
                 GROUP BY n.id"
            ),
            [id],
            note_from_row,
        )
        .optional()?;
    Ok(row)
}

fn note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok(NoteRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        emotion: row.get(2)?,
        situation: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        active: row.get(6)?,
        reaction_count: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(db: &Database) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("{}@example.com", id), "hash", Utc::now())
            .unwrap();
        id
    }

    #[test]
    fn soft_delete_hides_from_feed() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db);
        let note_id = Uuid::new_v4().to_string();
        db.create_note(&note_id, &author, "joy", "work", "good day", Utc::now())
            .unwrap();

        assert_eq!(db.list_notes(None, None, 50, 0).unwrap().len(), 1);
        assert!(db.deactivate_note(&note_id, &author).unwrap());
        assert!(db.list_notes(None, None, 50, 0).unwrap().is_empty());
        assert!(db.get_note(&note_id).unwrap().is_none());
        // already gone: second delete is a no-op
        assert!(!db.deactivate_note(&note_id, &author).unwrap());
    }

    #[test]
    fn edit_is_author_guarded() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db);
        let stranger = user(&db);
        let note_id = Uuid::new_v4().to_string();
        db.create_note(&note_id, &author, "fear", "health", "worried", Utc::now())
            .unwrap();

        assert!(
            !db.update_note(&note_id, &stranger, "joy", "health", "fine", Utc::now())
                .unwrap()
        );
        assert!(
            db.update_note(&note_id, &author, "hope", "health", "getting better", Utc::now())
                .unwrap()
        );
        let note = db.get_note(&note_id).unwrap().unwrap();
        assert_eq!(note.emotion, "hope");
        assert_eq!(note.content, "getting better");
    }

    #[test]
    fn feed_filters_by_emotion_and_situation() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db);
        for (emotion, situation) in [("joy", "work"), ("joy", "family"), ("sadness", "work")] {
            db.create_note(
                &Uuid::new_v4().to_string(),
                &author,
                emotion,
                situation,
                "...",
                Utc::now(),
            )
            .unwrap();
        }

        assert_eq!(db.list_notes(Some("joy"), None, 50, 0).unwrap().len(), 2);
        assert_eq!(db.list_notes(None, Some("work"), 50, 0).unwrap().len(), 2);
        assert_eq!(
            db.list_notes(Some("joy"), Some("work"), 50, 0).unwrap().len(),
            1
        );
    }
}
