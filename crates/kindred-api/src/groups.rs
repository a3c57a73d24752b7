use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use kindred_db::StoreError;
use kindred_db::models::{GroupDiscussionRow, GroupSummaryRow};
use kindred_types::api::{
    Claims, GroupDiscussionResponse, GroupDiscussionSummary, JoinDiscussionRequest,
    MessageResponse, SendMessageRequest,
};
use kindred_types::events::GatewayEvent;
use kindred_types::models::{is_valid_emotion, is_valid_situation};
use kindred_types::time::parse_ts;

use crate::auth::AppState;
use crate::convert::{message_response, parse_id, parse_time};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    /// Exclusive lower bound for incremental polling — pass the
    /// `created_at` of the newest message you already have.
    pub since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

fn default_page_limit() -> u32 {
    20
}

pub(crate) fn parse_since(since: Option<String>) -> Result<Option<chrono::DateTime<chrono::Utc>>, ApiError> {
    match since {
        None => Ok(None),
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("unparseable since timestamp: {}", raw))),
    }
}

/// Join the newest live room for this (emotion, situation) pair, or open a
/// fresh one.
pub async fn join_discussion(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<JoinDiscussionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_emotion(&req.emotion) {
        return Err(ApiError::bad_request(format!("unknown emotion: {}", req.emotion)));
    }
    if !is_valid_situation(&req.situation) {
        return Err(ApiError::bad_request(format!("unknown situation: {}", req.situation)));
    }

    let now = chrono::Utc::now();
    let ttl = state.ttls.group_discussion;

    let db = state.clone();
    let new_id = Uuid::new_v4().to_string();
    let (room, participant_count) = tokio::task::spawn_blocking(move || {
        let (room, _created) =
            db.db
                .join_or_create_group(&new_id, &req.emotion, &req.situation, now, ttl)?;
        let participants = db.db.group_participant_count(&room.id, now)?;
        Ok::<_, StoreError>((room, participants))
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(group_response(room, participant_count)))
}

/// Public read; a room past its window is marked inactive on the way
/// through and answered with 410.
pub async fn get_discussion(
    State(state): State<AppState>,
    Path(discussion_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();

    let db = state.clone();
    let id = discussion_id.to_string();
    let (room, participant_count) = tokio::task::spawn_blocking(move || {
        let room = db.db.get_group_discussion(&id, now)?;
        let participants = db.db.group_participant_count(&id, now)?;
        Ok::<_, StoreError>((room, participants))
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    if !room.active {
        return Err(StoreError::Gone.into());
    }

    Ok(Json(group_response(room, participant_count)))
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
        db.db.post_group_message(&id, &discussion, &user, &body, now)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    // Fan out to everyone subscribed to this room
    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        id: message_id,
        discussion_id,
        user_id: claims.sub,
        content: content.clone(),
        private: false,
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
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let since = parse_since(query.since)?;
    let limit = query.limit.min(200);

    let db = state.clone();
    let id = discussion_id.to_string();
    let rows = tokio::task::spawn_blocking(move || {
        db.db.list_group_messages(&id, limit, query.offset, since)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let messages: Vec<MessageResponse> = rows.into_iter().map(message_response).collect();
    Ok(Json(messages))
}

/// Public feed of live rooms.
pub async fn list_discussions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();
    let limit = query.limit.min(100);

    let db = state.clone();
    let rows =
        tokio::task::spawn_blocking(move || db.db.list_active_groups(limit, query.offset, now))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let discussions: Vec<GroupDiscussionSummary> =
        rows.into_iter().map(group_summary_response).collect();
    Ok(Json(discussions))
}

fn group_response(row: GroupDiscussionRow, participant_count: i64) -> GroupDiscussionResponse {
    GroupDiscussionResponse {
        id: parse_id("discussion id", &row.id),
        emotion: row.emotion,
        situation: row.situation,
        created_at: parse_time("created_at", &row.created_at),
        expires_at: parse_time("expires_at", &row.expires_at),
        active: row.active,
        participant_count,
    }
}

fn group_summary_response(row: GroupSummaryRow) -> GroupDiscussionSummary {
    GroupDiscussionSummary {
        id: parse_id("discussion id", &row.id),
        emotion: row.emotion,
        situation: row.situation,
        created_at: parse_time("created_at", &row.created_at),
        expires_at: parse_time("expires_at", &row.expires_at),
        participant_count: row.participant_count,
        message_count: row.message_count,
        last_message_at: row.last_message_at.map(|ts| parse_time("last_message_at", &ts)),
    }
}
