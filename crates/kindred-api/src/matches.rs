use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use kindred_db::models::{MatchRequestRow, PrivateDiscussionRow, PrivateSummaryRow};
use kindred_types::api::{
    Claims, MatchRequestResponse, MessageResponse, NoteContext, PrivateDiscussionResponse,
    PrivateDiscussionSummary, SendMatchRequest, SendMessageRequest,
};
use kindred_types::events::GatewayEvent;
use kindred_types::models::MatchStatus;

use crate::auth::AppState;
use crate::convert::{message_response, parse_id, parse_time};
use crate::error::ApiError;
use crate::groups::{MessageQuery, parse_since};

#[derive(Debug, Deserialize)]
pub struct ReceivedQuery {
    /// Defaults to pending (the inbox view).
    pub status: Option<String>,
}

/// Send a match request against someone's note. The recipient is resolved
/// from the note server-side; the 409 on a duplicate names the earlier
/// request's status.
pub async fn create_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(message) = &req.message {
        if message.trim().is_empty() {
            return Err(ApiError::bad_request("message cannot be blank; omit it instead"));
        }
    }

    let request_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let ttl = state.ttls.match_request;

    let db = state.clone();
    let id = request_id.to_string();
    let from = claims.sub.to_string();
    let note = req.note_id.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .create_match_request(&id, &from, &note, req.message.as_deref(), now, ttl)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok((StatusCode::CREATED, Json(request_response(row))))
}

/// Accept a pending request addressed to the caller. Returns the private
/// discussion the accept opened.
pub async fn accept_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let discussion_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let ttl = state.ttls.private_discussion;

    let db = state.clone();
    let id = request_id.to_string();
    let acting = claims.sub.to_string();
    let new_discussion = discussion_id.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .accept_match_request(&id, &acting, &new_discussion, now, ttl)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(private_response(row)))
}

pub async fn decline_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let id = request_id.to_string();
    let acting = claims.sub.to_string();
    tokio::task::spawn_blocking(move || db.db.decline_match_request(&id, &acting))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(serde_json::json!({ "declined": true })))
}

pub async fn list_received(
    State(state): State<AppState>,
    Query(query): Query<ReceivedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref() {
        None => Some(MatchStatus::Pending),
        Some("all") => None,
        Some(raw) => Some(
            raw.parse::<MatchStatus>()
                .map_err(ApiError::BadRequest)?,
        ),
    };

    let db = state.clone();
    let user = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.list_received_requests(&user, status))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let requests: Vec<MatchRequestResponse> = rows.into_iter().map(request_response).collect();
    Ok(Json(requests))
}

pub async fn list_sent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.list_sent_requests(&user))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let requests: Vec<MatchRequestResponse> = rows.into_iter().map(request_response).collect();
    Ok(Json(requests))
}

pub async fn list_discussions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.list_private_discussions(&user))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let discussions: Vec<PrivateDiscussionSummary> =
        rows.into_iter().map(private_summary_response).collect();
    Ok(Json(discussions))
}

/// Participants only. An expired discussion comes back marked
/// `active: false` rather than hidden; clients check the flag and the
/// deadline themselves.
pub async fn get_discussion(
    State(state): State<AppState>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();

    let db = state.clone();
    let id = discussion_id.to_string();
    let user = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || db.db.get_private_discussion(&id, &user, now))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(private_response(row)))
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("message content cannot be empty"));
    }

    let message_id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let db = state.clone();
    let id = message_id.to_string();
    let discussion = discussion_id.to_string();
    let user = claims.sub.to_string();
    let body = content.clone();
    tokio::task::spawn_blocking(move || {
        db.db.post_private_message(&id, &discussion, &user, &body, now)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        id: message_id,
        discussion_id,
        user_id: claims.sub,
        content: content.clone(),
        private: true,
        timestamp: now,
    });

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            discussion_id,
            user_id: claims.sub,
            content,
            created_at: now,
        }),
    ))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(discussion_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let since = parse_since(query.since)?;
    let limit = query.limit.min(200);

    let db = state.clone();
    let id = discussion_id.to_string();
    let user = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || {
        db.db
            .list_private_messages(&id, &user, limit, query.offset, since)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let messages: Vec<MessageResponse> = rows.into_iter().map(message_response).collect();
    Ok(Json(messages))
}

fn note_context(
    emotion: Option<String>,
    situation: Option<String>,
    content: Option<String>,
) -> Option<NoteContext> {
    Some(NoteContext {
        emotion: emotion?,
        situation: situation?,
        content: content?,
    })
}

fn request_response(row: MatchRequestRow) -> MatchRequestResponse {
    let status = row.status.parse().unwrap_or_else(|e| {
        tracing::warn!("Corrupt status on request '{}': {}", row.id, e);
        MatchStatus::Expired
    });
    MatchRequestResponse {
        id: parse_id("request id", &row.id),
        from_user_id: parse_id("from_user_id", &row.from_user_id),
        to_user_id: parse_id("to_user_id", &row.to_user_id),
        note_id: parse_id("note_id", &row.note_id),
        status,
        message: row.message,
        created_at: parse_time("created_at", &row.created_at),
        expires_at: parse_time("expires_at", &row.expires_at),
        note: note_context(row.note_emotion, row.note_situation, row.note_content),
    }
}

fn private_response(row: PrivateDiscussionRow) -> PrivateDiscussionResponse {
    PrivateDiscussionResponse {
        id: parse_id("discussion id", &row.id),
        user1_id: parse_id("user1_id", &row.user1_id),
        user2_id: parse_id("user2_id", &row.user2_id),
        note_id: parse_id("note_id", &row.note_id),
        created_at: parse_time("created_at", &row.created_at),
        expires_at: parse_time("expires_at", &row.expires_at),
        active: row.active,
        note: note_context(row.note_emotion, row.note_situation, row.note_content),
    }
}

fn private_summary_response(row: PrivateSummaryRow) -> PrivateDiscussionSummary {
    PrivateDiscussionSummary {
        id: parse_id("discussion id", &row.id),
        user1_id: parse_id("user1_id", &row.user1_id),
        user2_id: parse_id("user2_id", &row.user2_id),
        note_id: parse_id("note_id", &row.note_id),
        created_at: parse_time("created_at", &row.created_at),
        expires_at: parse_time("expires_at", &row.expires_at),
        note: note_context(row.note_emotion, row.note_situation, row.note_content),
        message_count: row.message_count,
        last_message_at: row.last_message_at.map(|ts| parse_time("last_message_at", &ts)),
    }
}
