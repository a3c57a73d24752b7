use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use kindred_db::StoreError;
use kindred_types::models::MatchStatus;

/// HTTP-facing error type. Domain errors from the store map onto status
/// codes and render a JSON body with enough information to show the user a
/// message, and nothing about anyone else's data. Internal detail is
/// logged, never sent.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Store(StoreError::NotFound(what)) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{} not found", what) }),
            ),
            Self::Store(StoreError::Forbidden) => {
                (StatusCode::FORBIDDEN, json!({ "error": "forbidden" }))
            }
            Self::Store(StoreError::Conflict { status }) => (
                StatusCode::CONFLICT,
                json!({ "error": conflict_message(status), "status": status }),
            ),
            Self::Store(StoreError::Expired) => (
                StatusCode::GONE,
                json!({ "error": "this request has expired" }),
            ),
            Self::Store(StoreError::Gone) => (
                StatusCode::GONE,
                json!({ "error": "this discussion has expired" }),
            ),
            Self::Store(StoreError::InvalidArgument(msg)) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            Self::Store(StoreError::Db(e)) => {
                error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
            Self::Store(StoreError::Internal(e)) | Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" })),
            Self::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}

/// The duplicate-request response tells the sender what became of their
/// earlier request so the client can render something useful.
fn conflict_message(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Pending => "a request is already waiting on this note",
        MatchStatus::Accepted => "you already have a discussion for this note",
        MatchStatus::Declined => "your request on this note was declined",
        MatchStatus::Expired => "your request on this note has expired",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_discloses_the_existing_status() {
        let response = ApiError::from(StoreError::Conflict {
            status: MatchStatus::Declined,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn expired_and_gone_are_410() {
        assert_eq!(
            ApiError::from(StoreError::Expired).into_response().status(),
            StatusCode::GONE
        );
        assert_eq!(
            ApiError::from(StoreError::Gone).into_response().status(),
            StatusCode::GONE
        );
    }

    #[test]
    fn internal_detail_is_not_in_the_body() {
        let response =
            ApiError::Internal(anyhow::anyhow!("secret connection string")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
