use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS notes (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            emotion     TEXT NOT NULL,
            situation   TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT,
            active      INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_notes_feed
            ON notes(active, created_at);
        CREATE INDEX IF NOT EXISTS idx_notes_author
            ON notes(author_id, active);

        CREATE TABLE IF NOT EXISTS note_reactions (
            id          TEXT PRIMARY KEY,
            note_id     TEXT NOT NULL REFERENCES notes(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(note_id, user_id, reaction)
        );

        CREATE INDEX IF NOT EXISTS idx_note_reactions_note
            ON note_reactions(note_id);

        -- One request per (sender, recipient, note) regardless of status.
        -- A declined or expired request blocks a new identical one.
        CREATE TABLE IF NOT EXISTS match_requests (
            id            TEXT PRIMARY KEY,
            from_user_id  TEXT NOT NULL REFERENCES users(id),
            to_user_id    TEXT NOT NULL REFERENCES users(id),
            note_id       TEXT NOT NULL REFERENCES notes(id),
            status        TEXT NOT NULL DEFAULT 'pending',
            message       TEXT,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            expires_at    TEXT NOT NULL,
            UNIQUE(from_user_id, to_user_id, note_id)
        );

        CREATE INDEX IF NOT EXISTS idx_match_requests_to
            ON match_requests(to_user_id, status);
        CREATE INDEX IF NOT EXISTS idx_match_requests_from
            ON match_requests(from_user_id);
        CREATE INDEX IF NOT EXISTS idx_match_requests_expiry
            ON match_requests(status, expires_at);

        CREATE TABLE IF NOT EXISTS group_discussions (
            id          TEXT PRIMARY KEY,
            emotion     TEXT NOT NULL,
            situation   TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            expires_at  TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_group_discussions_pair
            ON group_discussions(emotion, situation, active, created_at);
        CREATE INDEX IF NOT EXISTS idx_group_discussions_expiry
            ON group_discussions(active, expires_at);

        CREATE TABLE IF NOT EXISTS group_messages (
            id             TEXT PRIMARY KEY,
            discussion_id  TEXT NOT NULL REFERENCES group_discussions(id),
            user_id        TEXT NOT NULL REFERENCES users(id),
            content        TEXT NOT NULL,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_group_messages_discussion
            ON group_messages(discussion_id, created_at);

        CREATE TABLE IF NOT EXISTS private_discussions (
            id          TEXT PRIMARY KEY,
            user1_id    TEXT NOT NULL REFERENCES users(id),
            user2_id    TEXT NOT NULL REFERENCES users(id),
            note_id     TEXT NOT NULL REFERENCES notes(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            expires_at  TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_private_discussions_user1
            ON private_discussions(user1_id, active);
        CREATE INDEX IF NOT EXISTS idx_private_discussions_user2
            ON private_discussions(user2_id, active);
        CREATE INDEX IF NOT EXISTS idx_private_discussions_expiry
            ON private_discussions(active, expires_at);

        CREATE TABLE IF NOT EXISTS private_messages (
            id             TEXT PRIMARY KEY,
            discussion_id  TEXT NOT NULL REFERENCES private_discussions(id),
            user_id        TEXT NOT NULL REFERENCES users(id),
            content        TEXT NOT NULL,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_private_messages_discussion
            ON private_messages(discussion_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
