use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MatchStatus;

// -- JWT Claims --

/// JWT claims shared across kindred-api (REST middleware) and
/// kindred-gateway (WebSocket authentication). Canonical definition lives
/// here in kindred-types to eliminate duplication. Deliberately carries no
/// profile data beyond the user id; everything downstream is anonymous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

// -- Notes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNoteRequest {
    pub emotion: String,
    pub situation: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateNoteRequest {
    pub emotion: String,
    pub situation: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub emotion: String,
    pub situation: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reaction_count: i64,
    pub reactions: Vec<ReactionCount>,
}

/// Per-reaction tally on a single note.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionCount {
    pub reaction: String,
    pub count: i64,
}

// -- Note reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub reaction: String,
}

// -- Match requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMatchRequest {
    pub note_id: Uuid,
    pub message: Option<String>,
}

/// Emotion/situation/content of the note a request or discussion hangs off,
/// joined in for display.
#[derive(Debug, Clone, Serialize)]
pub struct NoteContext {
    pub emotion: String,
    pub situation: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MatchRequestResponse {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub note_id: Uuid,
    pub status: MatchStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteContext>,
}

// -- Group discussions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinDiscussionRequest {
    pub emotion: String,
    pub situation: String,
}

#[derive(Debug, Serialize)]
pub struct GroupDiscussionResponse {
    pub id: Uuid,
    pub emotion: String,
    pub situation: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub participant_count: i64,
}

/// Listing shape for the public active-rooms feed.
#[derive(Debug, Serialize)]
pub struct GroupDiscussionSummary {
    pub id: Uuid,
    pub emotion: String,
    pub situation: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub participant_count: i64,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

// -- Messages (group and private share the shape) --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Private discussions --

#[derive(Debug, Serialize)]
pub struct PrivateDiscussionResponse {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub note_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteContext>,
}

#[derive(Debug, Serialize)]
pub struct PrivateDiscussionSummary {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub note_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub note: Option<NoteContext>,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

// -- Sweep / admin --

/// Rows flipped by one reaper pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SweepReport {
    pub match_requests: usize,
    pub group_discussions: usize,
    pub private_discussions: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.match_requests + self.group_discussions + self.private_discussions
    }
}

/// Rows past their deadline that no sweep or lazy check has flipped yet.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ExpirationStats {
    pub pending_match_requests: usize,
    pub active_group_discussions: usize,
    pub active_private_discussions: usize,
}
