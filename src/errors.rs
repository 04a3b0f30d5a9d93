use std::fmt;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Authentication errors
    AuthFailure(String),
    ArgonError(argon2::Error),

    // Session errors
    SessionInvalid(String),
    SessionExpired(String),

    // Authorization errors
    Forbidden,

    // Storage errors
    StorageFault(String),

    // Crypto errors
    CryptoError(String),

    // Validation and configuration errors
    ValidationError(String),
    ConfigurationError(String),
    SerializationError(serde_json::Error),

    // General errors
    BadRequest(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::AuthFailure(reason) => write!(f, "Authentication failed: {}", reason),
            AppError::ArgonError(e) => write!(f, "Argon2 error: {}", e),

            AppError::SessionInvalid(_) => write!(f, "Invalid session"),
            AppError::SessionExpired(_) => write!(f, "Session expired"),

            AppError::Forbidden => write!(f, "Forbidden access"),

            AppError::StorageFault(msg) => write!(f, "Storage fault: {}", msg),

            AppError::CryptoError(msg) => write!(f, "Crypto error: {}", msg),

            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SerializationError(e) => write!(f, "Serialization error: {}", e),

            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::SerializationError(e) => Some(e),
            _ => None,
        }
    }
}

// Secure HTTP response implementation
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, user_message) = match &self {
            // Never tell the caller which check rejected the credential
            AppError::AuthFailure(reason) => {
                tracing::debug!("Authentication failure: {}", reason);
                (StatusCode::UNAUTHORIZED, "Authentication failed".to_string())
            }
            AppError::ArgonError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),

            // Session ids are bearer secrets, keep them out of the body
            AppError::SessionInvalid(_) => (
                StatusCode::UNAUTHORIZED,
                "Invalid session".to_string(),
            ),
            AppError::SessionExpired(_) => (
                StatusCode::UNAUTHORIZED,
                "Session expired".to_string(),
            ),

            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Access denied".to_string(),
            ),

            AppError::StorageFault(msg) => {
                tracing::error!("Storage fault: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }

            AppError::CryptoError(msg) => {
                tracing::warn!("Crypto error: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    "Unable to process encrypted data".to_string(),
                )
            }

            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ConfigurationError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::SerializationError(e) => {
                tracing::error!("Serialization error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        tracing::warn!(
            status = %status,
            error = %user_message,
            "API error occurred"
        );

        let body = Json(json!({
            "error": {
                "message": user_message,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

impl AppError {
    /// Create an authentication failure
    pub fn auth_failure(reason: impl Into<String>) -> Self {
        Self::AuthFailure(reason.into())
    }

    /// Create a storage fault
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFault(msg.into())
    }

    /// Create a crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::CryptoError(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Whether this error means the caller presented a dead or unknown session
    pub fn is_session_error(&self) -> bool {
        matches!(self, AppError::SessionInvalid(_) | AppError::SessionExpired(_))
    }
}

impl From<argon2::Error> for AppError {
    fn from(err: argon2::Error) -> Self {
        Self::ArgonError(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_do_not_echo_ids() {
        let err = AppError::SessionInvalid("deadbeef".to_string());
        assert!(!err.to_string().contains("deadbeef"));
        assert!(err.is_session_error());
        assert!(AppError::SessionExpired("x".into()).is_session_error());
        assert!(!AppError::Forbidden.is_session_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::auth_failure("weak_password").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::storage("disk gone").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::bad_request("missing field").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
