//! Error type shared by every layer of the application.
//!
//! Handlers never let an error escape as a panic: each variant maps onto an
//! HTTP status and a JSON body `{"error": .., "kind": ..}` at the request
//! boundary (see the `IntoResponse` impl, compiled with the `web` feature).

use thiserror::Error;

/// Errors raised by the table store, loaders, analysis and authentication.
#[derive(Debug, Error)]
pub enum AppError {
    /// A table, row, column or user does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A table with this name already exists.
    #[error("table `{0}` already exists")]
    DuplicateName(String),

    /// Malformed input: bad filter, bad credentials, password mismatch.
    #[error("{0}")]
    Validation(String),

    /// Missing, unknown or expired session.
    #[error("{0}")]
    Unauthorized(String),

    /// No file, empty file, or an empty table where data is required.
    #[error("{0}")]
    EmptyInput(String),

    /// Uploaded content could not be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NotFound",
            AppError::DuplicateName(_) => "DuplicateName",
            AppError::Validation(_) => "ValidationError",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::EmptyInput(_) => "EmptyInput",
            AppError::Parse { .. } => "ParseError",
            AppError::Io(_) => "IoError",
            AppError::Internal(_) => "InternalError",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Parse {
            what: "CSV".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<calamine::XlsxError> for AppError {
    fn from(err: calamine::XlsxError) -> Self {
        AppError::Parse {
            what: "XLSX".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Internal(format!("snapshot encoding failed: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON encoding failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(feature = "web")]
mod response {
    use super::AppError;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};

    impl AppError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                AppError::NotFound(_) => StatusCode::NOT_FOUND,
                AppError::DuplicateName(_) => StatusCode::CONFLICT,
                AppError::Validation(_) | AppError::EmptyInput(_) | AppError::Parse { .. } => {
                    StatusCode::BAD_REQUEST
                }
                AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            if status.is_server_error() {
                tracing::error!(kind = self.kind(), "request failed: {}", self);
            } else {
                tracing::warn!(kind = self.kind(), "request rejected: {}", self);
            }
            let body = serde_json::json!({
                "error": self.to_string(),
                "kind": self.kind(),
            });
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(AppError::not_found("table `ghost`").kind(), "NotFound");
        assert_eq!(AppError::DuplicateName("sales".into()).kind(), "DuplicateName");
        assert_eq!(AppError::validation("bad").kind(), "ValidationError");
        assert_eq!(AppError::EmptyInput("no file".into()).kind(), "EmptyInput");
    }

    #[test]
    fn test_messages_are_readable() {
        assert_eq!(
            AppError::not_found("table `ghost`").to_string(),
            "table `ghost` not found"
        );
        assert_eq!(
            AppError::DuplicateName("sales".into()).to_string(),
            "table `sales` already exists"
        );
    }

    #[cfg(feature = "web")]
    #[test]
    fn test_status_codes() {
        use axum::http::StatusCode;
        assert_eq!(AppError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::DuplicateName("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
