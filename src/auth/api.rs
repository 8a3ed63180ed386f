//! Authentication API Endpoints
//! Mission: Expose the session lifecycle as AuthService RPCs

use crate::auth::{
    error::AuthError,
    models::{
        LoginRequest, LogoutRequest, LogoutResponse, RefreshTokenRequest, RefreshTokenResponse,
        RegisterRequest, SessionResponse,
    },
    session::{LoginInput, RegisterInput, SessionManager},
};
use axum::{extract::State, Json};
use std::sync::Arc;

pub type AuthState = Arc<SessionManager>;

/// POST /identity.v1.AuthService/Register
pub async fn register(
    State(sessions): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<SessionResponse>, AuthError> {
    let session = sessions
        .register(RegisterInput {
            email: payload.email,
            password: payload.password,
            role: payload.role,
        })
        .await?;

    Ok(Json(SessionResponse::from_session(session)))
}

/// POST /identity.v1.AuthService/Login
pub async fn login(
    State(sessions): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AuthError> {
    let session = sessions
        .login(LoginInput {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok(Json(SessionResponse::from_session(session)))
}

/// POST /identity.v1.AuthService/RefreshToken
pub async fn refresh_token(
    State(sessions): State<AuthState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, AuthError> {
    let tokens = sessions.refresh(&payload.refresh_token).await?;

    Ok(Json(RefreshTokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

/// POST /identity.v1.AuthService/Logout
pub async fn logout(
    State(sessions): State<AuthState>,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AuthError> {
    sessions.logout(&payload.refresh_token).await?;

    Ok(Json(LogoutResponse { success: true }))
}
