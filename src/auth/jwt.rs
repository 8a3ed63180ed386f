//! JWT Token Codec
//! Mission: Issue and verify signed access/refresh tokens
//!
//! Verification is a pure function of (token, secret, now). It never touches
//! the session store; callers that need revocation checks do that themselves.

use crate::auth::error::AuthError;
use crate::auth::models::{Claims, Identity, TokenKind, TokenPair};
use crate::config::AuthConfig;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Token codec for HS256 signed tokens
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Self {
        // Time-based checks are done in `verify_at` against an explicit clock.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue a token of the given kind valid for `ttl` from now
    pub fn issue(
        &self,
        kind: TokenKind,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        self.issue_at(kind, identity, ttl, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        kind: TokenKind,
        identity: &Identity,
        ttl: Duration,
        now: i64,
    ) -> Result<String, AuthError> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| AuthError::Internal(format!("invalid token ttl: {:?}", ttl)))?;

        let claims = Claims {
            user_id: identity.user_id,
            email: identity.email.clone(),
            role: identity.role,
            kind,
            iat: now,
            nbf: now,
            exp: now + ttl_secs,
            iss: self.issuer.clone(),
            jti: Uuid::new_v4(),
        };

        debug!(
            user_id = %identity.user_id,
            kind = kind.as_str(),
            ttl_secs,
            "Issuing token"
        );

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {}", e)))
    }

    /// Issue a fresh access + refresh pair with the configured lifetimes
    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue(TokenKind::Access, identity, self.access_ttl)?,
            refresh_token: self.issue(TokenKind::Refresh, identity, self.refresh_ttl)?,
        })
    }

    /// Verify signature, algorithm, issuer and lifetime
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        // Signature and algorithm are checked before the payload is decoded.
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        if claims.iss != self.issuer || claims.exp <= claims.iat || now < claims.nbf {
            return Err(AuthError::InvalidToken);
        }

        if now > claims.exp {
            return Err(AuthError::ExpiredToken);
        }

        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        Self::expect_kind(self.verify(token)?, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        Self::expect_kind(self.verify(token)?, TokenKind::Refresh)
    }

    pub fn verify_access_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        Self::expect_kind(self.verify_at(token, now)?, TokenKind::Access)
    }

    pub fn verify_refresh_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        Self::expect_kind(self.verify_at(token, now)?, TokenKind::Refresh)
    }

    fn expect_kind(claims: Claims, kind: TokenKind) -> Result<Claims, AuthError> {
        if claims.kind != kind {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}
