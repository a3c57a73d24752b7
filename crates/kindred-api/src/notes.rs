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
use kindred_db::models::{NoteRow, ReactionCountRow};
use kindred_types::api::{Claims, CreateNoteRequest, NoteResponse, ReactionCount, UpdateNoteRequest};
use kindred_types::models::{is_valid_emotion, is_valid_situation};

use crate::auth::AppState;
use crate::convert::{parse_id, parse_time};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct NoteQuery {
    pub emotion: Option<String>,
    pub situation: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

fn validate_tags(emotion: &str, situation: &str, content: &str) -> Result<(), ApiError> {
    if !is_valid_emotion(emotion) {
        return Err(ApiError::bad_request(format!("unknown emotion: {}", emotion)));
    }
    if !is_valid_situation(situation) {
        return Err(ApiError::bad_request(format!("unknown situation: {}", situation)));
    }
    if content.trim().is_empty() {
        return Err(ApiError::bad_request("content cannot be empty"));
    }
    Ok(())
}

pub async fn create_note(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_tags(&req.emotion, &req.situation, &req.content)?;

    let note_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let content = req.content.trim().to_string();

    // Run blocking DB work off the async runtime
    let db = state.clone();
    let id = note_id.to_string();
    let author = claims.sub.to_string();
    let emotion = req.emotion.clone();
    let situation = req.situation.clone();
    let body = content.clone();
    tokio::task::spawn_blocking(move || {
        db.db.create_note(&id, &author, &emotion, &situation, &body, now)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok((
        StatusCode::CREATED,
        Json(NoteResponse {
            id: note_id,
            author_id: claims.sub,
            emotion: req.emotion,
            situation: req.situation,
            content,
            created_at: now,
            reaction_count: 0,
            reactions: vec![],
        }),
    ))
}

pub async fn list_notes(
    State(state): State<AppState>,
    Query(query): Query<NoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);

    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || {
        db.db.list_notes(
            query.emotion.as_deref(),
            query.situation.as_deref(),
            limit,
            query.offset,
        )
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let notes: Vec<NoteResponse> = rows.into_iter().map(|r| note_response(r, vec![])).collect();
    Ok(Json(notes))
}

pub async fn get_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let id = note_id.to_string();
    let (row, reactions) = tokio::task::spawn_blocking(move || {
        let row = db.db.get_note(&id)?.ok_or(StoreError::NotFound("note"))?;
        let reactions = db.db.reaction_counts(&id)?;
        Ok::<_, StoreError>((row, reactions))
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(note_response(row, reactions)))
}

pub async fn my_notes(
    State(state): State<AppState>,
    Query(query): Query<NoteQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);

    let db = state.clone();
    let author = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || {
        db.db.list_notes_by_author(&author, limit, query.offset)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let notes: Vec<NoteResponse> = rows.into_iter().map(|r| note_response(r, vec![])).collect();
    Ok(Json(notes))
}

pub async fn update_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_tags(&req.emotion, &req.situation, &req.content)?;

    let db = state.clone();
    let id = note_id.to_string();
    let author = claims.sub.to_string();
    let content = req.content.trim().to_string();
    let row = tokio::task::spawn_blocking(move || {
        let changed = db.db.update_note(
            &id,
            &author,
            &req.emotion,
            &req.situation,
            &content,
            chrono::Utc::now(),
        )?;
        if !changed {
            return Err(StoreError::NotFound("note"));
        }
        db.db.get_note(&id)?.ok_or(StoreError::NotFound("note"))
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(note_response(row, vec![])))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let id = note_id.to_string();
    let author = claims.sub.to_string();
    let deleted = tokio::task::spawn_blocking(move || db.db.deactivate_note(&id, &author))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    if !deleted {
        return Err(StoreError::NotFound("note").into());
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

fn note_response(row: NoteRow, reactions: Vec<ReactionCountRow>) -> NoteResponse {
    NoteResponse {
        id: parse_id("note id", &row.id),
        author_id: parse_id("author_id", &row.author_id),
        emotion: row.emotion,
        situation: row.situation,
        content: row.content,
        created_at: parse_time("created_at", &row.created_at),
        reaction_count: row.reaction_count,
        reactions: reactions
            .into_iter()
            .map(|r| ReactionCount {
                reaction: r.reaction,
                count: r.count,
            })
            .collect(),
    }
}
