//! Authentication Models
//! Mission: Define identity, claims and account data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Marketplace roles. The set is closed: every account is exactly one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "CHEF")]
    Chef,
    #[serde(rename = "RESTAURANT")]
    Restaurant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Chef => "CHEF",
            Role::Restaurant => "RESTAURANT",
        }
    }

    /// Name used by the RPC schema (`USER_ROLE_*`).
    pub fn as_proto(&self) -> &'static str {
        match self {
            Role::Chef => "USER_ROLE_CHEF",
            Role::Restaurant => "USER_ROLE_RESTAURANT",
        }
    }

    /// Accepts both the stored form (`CHEF`) and the RPC enum form (`USER_ROLE_CHEF`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "CHEF" | "USER_ROLE_CHEF" => Some(Role::Chef),
            "RESTAURANT" | "USER_ROLE_RESTAURANT" => Some(Role::Restaurant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of a token pair a token is. Fixed at issuance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    /// Random token id; keeps tokens issued in the same second distinct.
    pub jti: Uuid,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// Authenticated caller, as recovered from a verified access token.
///
/// Immutable once built; handed from the interceptor chain to handlers by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Access + refresh token pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: Role,
    pub created_at: String,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// Account to be inserted into the user directory
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Result of register/login: the account identity plus a fresh token pair
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub tokens: TokenPair,
}

/// Register request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub role: String,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Register/login response
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl SessionResponse {
    pub fn from_session(session: Session) -> Self {
        Self {
            user_id: session.identity.user_id.to_string(),
            email: session.identity.email,
            role: session.identity.role.as_proto().to_string(),
            access_token: session.tokens.access_token,
            refresh_token: session.tokens.refresh_token,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::Chef).unwrap();
        assert_eq!(json, r#""CHEF""#);

        let restaurant: Role = serde_json::from_str(r#""RESTAURANT""#).unwrap();
        assert_eq!(restaurant, Role::Restaurant);
    }

    #[test]
    fn test_role_parse_accepts_proto_names() {
        assert_eq!(Role::parse("CHEF"), Some(Role::Chef));
        assert_eq!(Role::parse("USER_ROLE_RESTAURANT"), Some(Role::Restaurant));
        assert_eq!(Role::parse("chef"), None);
        assert_eq!(Role::parse("ADMIN"), None);
        assert_eq!(Role::parse("USER_ROLE_UNSPECIFIED"), None);
    }

    #[test]
    fn test_token_kind_wire_name() {
        let json = serde_json::to_string(&TokenKind::Refresh).unwrap();
        assert_eq!(json, r#""refresh""#);
    }

    #[test]
    fn test_user_password_hash_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "$2b$04$secret".to_string(),
            role: Role::Chef,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("secret"));
    }
}
