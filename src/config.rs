//! Runtime configuration.
//!
//! `AuthConfig` is the only configuration the identity core sees. It is built
//! once at startup (see `ServerArgs` in the binary) and passed by reference to
//! each constructor.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

pub const ISSUER: &str = "chefnext";

pub const REGISTER_PROCEDURE: &str = "/identity.v1.AuthService/Register";
pub const LOGIN_PROCEDURE: &str = "/identity.v1.AuthService/Login";
pub const REFRESH_TOKEN_PROCEDURE: &str = "/identity.v1.AuthService/RefreshToken";
pub const LOGOUT_PROCEDURE: &str = "/identity.v1.AuthService/Logout";

/// Shortest signing secret accepted without a warning.
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Cost range accepted by bcrypt.
const BCRYPT_MIN_COST: u32 = 4;
const BCRYPT_MAX_COST: u32 = 31;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC signing secret for all tokens.
    pub jwt_secret: String,
    pub issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Sustained rate in tokens per second.
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,
    /// Maximum number of identities tracked by the rate limiter.
    pub rate_limit_capacity: usize,
    /// Procedures that skip authentication.
    pub public_procedures: HashSet<String>,
    /// Deadline applied to every session-store and user-directory call.
    pub store_timeout: Duration,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-in-production-minimum-32-characters".to_string(),
            issuer: ISSUER.to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
            rate_limit_per_second: 100.0,
            rate_limit_burst: 200,
            rate_limit_capacity: 10_000,
            public_procedures: default_public_procedures(),
            store_timeout: Duration::from_secs(2),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

pub fn default_public_procedures() -> HashSet<String> {
    [
        REGISTER_PROCEDURE,
        LOGIN_PROCEDURE,
        REFRESH_TOKEN_PROCEDURE,
        LOGOUT_PROCEDURE,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl AuthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            bail!("JWT secret must not be empty");
        }
        if self.jwt_secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                len = self.jwt_secret.len(),
                "⚠️  JWT secret is shorter than {} bytes", RECOMMENDED_SECRET_LEN
            );
        }
        if self.access_token_ttl.as_secs() == 0 || self.refresh_token_ttl.as_secs() == 0 {
            bail!("token lifetimes must be at least one second");
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            bail!("refresh token lifetime must not be shorter than access token lifetime");
        }
        if !(self.rate_limit_per_second.is_finite() && self.rate_limit_per_second > 0.0) {
            bail!("rate limit must be a positive number of requests per second");
        }
        if self.rate_limit_burst == 0 {
            bail!("rate limit burst must be at least 1");
        }
        if self.rate_limit_capacity == 0 {
            bail!("rate limit capacity must be at least 1");
        }
        if self.store_timeout.is_zero() {
            bail!("store timeout must be positive");
        }
        if !(BCRYPT_MIN_COST..=BCRYPT_MAX_COST).contains(&self.bcrypt_cost) {
            bail!(
                "bcrypt cost must be between {} and {}",
                BCRYPT_MIN_COST,
                BCRYPT_MAX_COST
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AuthConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_public_procedures() {
        let public = default_public_procedures();
        assert!(public.contains(REGISTER_PROCEDURE));
        assert!(public.contains(LOGIN_PROCEDURE));
        assert_eq!(public.len(), 4);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let empty_secret = AuthConfig {
            jwt_secret: "   ".to_string(),
            ..AuthConfig::default()
        };
        assert!(empty_secret.validate().is_err());

        let zero_burst = AuthConfig {
            rate_limit_burst: 0,
            ..AuthConfig::default()
        };
        assert!(zero_burst.validate().is_err());

        let bad_rate = AuthConfig {
            rate_limit_per_second: f64::NAN,
            ..AuthConfig::default()
        };
        assert!(bad_rate.validate().is_err());

        let inverted_ttls = AuthConfig {
            access_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(60),
            ..AuthConfig::default()
        };
        assert!(inverted_ttls.validate().is_err());

        let bad_cost = AuthConfig {
            bcrypt_cost: 2,
            ..AuthConfig::default()
        };
        assert!(bad_cost.validate().is_err());
    }
}
