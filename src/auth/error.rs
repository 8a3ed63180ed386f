//! Authentication Errors
//! Mission: One typed failure per rejection reason, one stable status code per failure

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::token_store::StoreError;
use crate::auth::user_store::UserStoreError;

/// Failure kinds surfaced by the identity core.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed token, bad signature, unexpected algorithm or wrong kind.
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    ExpiredToken,
    /// Missing credential, or a credential that was rejected.
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("permission denied")]
    PermissionDenied,
    #[error("rate limit exceeded")]
    ResourceExhausted,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already exists")]
    EmailExists,
    #[error("invalid role")]
    RoleInvalid,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Infrastructure failure (store I/O, deadline, hashing). Never a security decision.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Transport-level status codes. The mapping from `AuthError` is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Unauthenticated,
    PermissionDenied,
    ResourceExhausted,
    InvalidArgument,
    AlreadyExists,
    Internal,
}

impl Code {
    /// Connect protocol name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Unauthenticated => "unauthenticated",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::InvalidArgument => "invalid_argument",
            Code::AlreadyExists => "already_exists",
            Code::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AuthError {
    pub fn code(&self) -> Code {
        match self {
            AuthError::InvalidToken
            | AuthError::ExpiredToken
            | AuthError::Unauthenticated
            | AuthError::InvalidCredentials => Code::Unauthenticated,
            AuthError::PermissionDenied => Code::PermissionDenied,
            AuthError::ResourceExhausted => Code::ResourceExhausted,
            AuthError::RoleInvalid | AuthError::InvalidArgument(_) => Code::InvalidArgument,
            AuthError::EmailExists => Code::AlreadyExists,
            AuthError::Internal(_) => Code::Internal,
        }
    }

    /// Message shown to the caller. Token paths share one message so the
    /// response never tells which check failed.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidToken | AuthError::ExpiredToken | AuthError::Unauthenticated => {
                "Authentication required"
            }
            AuthError::InvalidCredentials => "Invalid email or password",
            AuthError::PermissionDenied => "Insufficient permissions",
            AuthError::ResourceExhausted => "Too many requests. Please slow down.",
            AuthError::EmailExists => "Email already exists",
            AuthError::RoleInvalid => "Invalid role",
            AuthError::InvalidArgument(reason) => reason,
            AuthError::Internal(_) => "Internal error",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<UserStoreError> for AuthError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::EmailTaken => AuthError::EmailExists,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(detail) = &self {
            error!(detail = %detail, "Internal identity error");
        }

        let code = self.code();
        let body = json!({
            "code": code.as_str(),
            "message": self.public_message(),
        });

        (code.http_status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_is_stable() {
        assert_eq!(AuthError::InvalidToken.code(), Code::Unauthenticated);
        assert_eq!(AuthError::ExpiredToken.code(), Code::Unauthenticated);
        assert_eq!(AuthError::Unauthenticated.code(), Code::Unauthenticated);
        assert_eq!(AuthError::InvalidCredentials.code(), Code::Unauthenticated);
        assert_eq!(AuthError::PermissionDenied.code(), Code::PermissionDenied);
        assert_eq!(AuthError::ResourceExhausted.code(), Code::ResourceExhausted);
        assert_eq!(AuthError::RoleInvalid.code(), Code::InvalidArgument);
        assert_eq!(AuthError::EmailExists.code(), Code::AlreadyExists);
        assert_eq!(
            AuthError::Internal("redis down".to_string()).code(),
            Code::Internal
        );
    }

    #[test]
    fn test_http_statuses() {
        let cases = [
            (AuthError::InvalidToken, StatusCode::UNAUTHORIZED),
            (AuthError::PermissionDenied, StatusCode::FORBIDDEN),
            (AuthError::ResourceExhausted, StatusCode::TOO_MANY_REQUESTS),
            (AuthError::RoleInvalid, StatusCode::BAD_REQUEST),
            (AuthError::EmailExists, StatusCode::CONFLICT),
            (
                AuthError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_token_failures_share_message() {
        assert_eq!(
            AuthError::InvalidToken.public_message(),
            AuthError::ExpiredToken.public_message()
        );
        assert_eq!(
            AuthError::InvalidToken.public_message(),
            AuthError::Unauthenticated.public_message()
        );
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = AuthError::Internal("redis://secret-host refused".to_string());
        assert_eq!(err.public_message(), "Internal error");
    }

    #[test]
    fn test_store_errors_are_internal() {
        let err: AuthError = StoreError::Timeout.into();
        assert_eq!(err.code(), Code::Internal);

        let err: AuthError = UserStoreError::EmailTaken.into();
        assert!(matches!(err, AuthError::EmailExists));
    }
}
