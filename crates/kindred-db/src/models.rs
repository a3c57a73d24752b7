/// Database row types, mapping directly to SQLite rows.
/// Distinct from kindred-types API models to keep the DB layer independent.

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct NoteRow {
    pub id: String,
    pub author_id: String,
    pub emotion: String,
    pub situation: String,
    pub content: String,
    pub created_at: String,
    pub active: bool,
    pub reaction_count: i64,
}

#[derive(Debug)]
pub struct ReactionCountRow {
    pub reaction: String,
    pub count: i64,
}

#[derive(Debug)]
pub struct MatchRequestRow {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub note_id: String,
    pub status: String,
    pub message: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    /// Joined note context, present on the listing queries only.
    pub note_emotion: Option<String>,
    pub note_situation: Option<String>,
    pub note_content: Option<String>,
}

#[derive(Debug)]
pub struct GroupDiscussionRow {
    pub id: String,
    pub emotion: String,
    pub situation: String,
    pub created_at: String,
    pub expires_at: String,
    pub active: bool,
}

#[derive(Debug)]
pub struct GroupSummaryRow {
    pub id: String,
    pub emotion: String,
    pub situation: String,
    pub created_at: String,
    pub expires_at: String,
    pub participant_count: i64,
    pub message_count: i64,
    pub last_message_at: Option<String>,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub discussion_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct PrivateDiscussionRow {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub note_id: String,
    pub created_at: String,
    pub expires_at: String,
    pub active: bool,
    pub note_emotion: Option<String>,
    pub note_situation: Option<String>,
    pub note_content: Option<String>,
}

#[derive(Debug)]
pub struct PrivateSummaryRow {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub note_id: String,
    pub created_at: String,
    pub expires_at: String,
    pub note_emotion: Option<String>,
    pub note_situation: Option<String>,
    pub note_content: Option<String>,
    pub message_count: i64,
    pub last_message_at: Option<String>,
}
