//! Error handler for greeneye.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again later.";

/// Enum representing server-side errors.
///
/// `Business` is the only user-facing kind: it carries the original message
/// and an HTTP status hint. Everything else is logged at the boundary and
/// rendered as a generic 500.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{message}")]
    Business { message: String, status: StatusCode },

    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("error parsing form data")]
    Multipart(#[from] MultipartError),

    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("jwt operation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("invalid mail address: {0}")]
    MailAddress(#[from] lettre::address::AddressError),

    #[error("failed to build mail: {0}")]
    Mail(#[from] lettre::error::Error),

    #[error("mail transport failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("file storage failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal server error, {details}")]
    Internal { details: String },

    #[error("invalid 'Authorization' header")]
    Unauthorized,
}

impl ServerError {
    /// Domain-rule violation rendered as a 400 with the given message.
    pub fn business(message: impl Into<String>) -> Self {
        Self::Business {
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// Domain-rule violation with an explicit status hint.
    pub fn business_with_status(
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self::Business {
            message: message.into(),
            status,
        }
    }

    /// Missing record, rendered as a 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::business_with_status(message, StatusCode::NOT_FOUND)
    }

    /// Upstream collaborator failure, rendered as a 503.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::business_with_status(message, StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

fn envelope(
    status: StatusCode,
    message: &str,
    data: Option<serde_json::Value>,
) -> Response {
    let body = serde_json::json!({
        "isSuccess": false,
        "message": message,
        "data": data,
    });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.to_string().into())
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_owned())
                .into_response()
        })
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match &self {
            ServerError::Business { message, status } => {
                envelope(*status, message, None)
            },

            ServerError::Validation(errors) => envelope(
                StatusCode::BAD_REQUEST,
                "Validation error",
                serde_json::to_value(parse_validation_errors(errors)).ok(),
            ),

            ServerError::Axum(rejection) => {
                envelope(StatusCode::BAD_REQUEST, &rejection.body_text(), None)
            },

            ServerError::Multipart(_) => envelope(
                StatusCode::BAD_REQUEST,
                "Error parsing form data",
                None,
            ),

            ServerError::Unauthorized => envelope(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid 'Authorization' header",
                None,
            ),

            _ => {
                tracing::error!(err = %self, "server returned 500 status");
                envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    GENERIC_FAILURE,
                    None,
                )
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_status_hint() {
        let err = ServerError::unavailable("model down");
        assert_eq!(
            err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_infrastructure_is_hidden() {
        let err = ServerError::Internal {
            details: "pool exhausted".into(),
        };
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
