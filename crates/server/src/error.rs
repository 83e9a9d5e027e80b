use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use tally_storage::StorageError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ServerError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ServerError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ServerError::Storage(StorageError::ClassificationConflict(id)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("transaction {id} is a transfer leg and cannot take bucket tags"),
            ),
            ServerError::Storage(err) => {
                tracing::error!("storage error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}
