use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use kindred_types::api::{Claims, ToggleReactionRequest};
use kindred_types::models::{REACTIONS, is_valid_reaction};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_reaction(&req.reaction) {
        return Err(ApiError::bad_request(format!(
            "invalid reaction; valid reactions: {}",
            REACTIONS.join(", ")
        )));
    }

    let reaction_id = Uuid::new_v4();

    let db = state.clone();
    let id = reaction_id.to_string();
    let note = note_id.to_string();
    let user = claims.sub.to_string();
    let reaction = req.reaction.clone();
    let added = tokio::task::spawn_blocking(move || {
        db.db
            .toggle_note_reaction(&id, &note, &user, &reaction, chrono::Utc::now())
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(serde_json::json!({
        "added": added,
        "reaction": req.reaction,
    })))
}
