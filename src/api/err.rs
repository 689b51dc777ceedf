use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced by the store and the HTTP handlers.
#[derive(thiserror::Error, Debug)]
pub enum CustomError {
    /// malformed, out of range or duplicated input
    #[error("{0}")]
    InvalidArgument(String),
    /// the referenced student or mark set does not exist
    #[error("{0}")]
    NotFound(String),
    /// a subject already has a mark for this student
    #[error("{0}")]
    Conflict(String),
    /// unexpected failure, message is passed through to the caller
    #[error("{0}")]
    Internal(String),
    /// storage failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// filesystem failure while preparing the database
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustomError {
    /// Attach the failed operation to storage errors, e.g. `Failed to create marks: ...`.
    /// Classified errors are returned untouched.
    pub fn during(self, operation: &str) -> Self {
        match self {
            CustomError::Database(err) => {
                CustomError::Internal(format!("Failed to {}: {}", operation, err))
            }
            CustomError::Migrate(err) => {
                CustomError::Internal(format!("Failed to {}: {}", operation, err))
            }
            CustomError::Io(err) => {
                CustomError::Internal(format!("Failed to {}: {}", operation, err))
            }
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // conflicts are reported as 400 like the rest of the validation failures
            CustomError::InvalidArgument(_) | CustomError::Conflict(_) => StatusCode::BAD_REQUEST,
            CustomError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// true when the database rejected a write because of a UNIQUE constraint
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}

impl IntoResponse for CustomError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
