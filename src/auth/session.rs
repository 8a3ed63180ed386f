//! Session Lifecycle
//! Mission: Register, login, rotate and revoke token pairs
//!
//! The only code that writes to the session store or reads the user
//! directory. Every external call carries the configured deadline; on expiry
//! the operation fails as `Internal`, never as an authentication verdict.

use crate::auth::error::AuthError;
use crate::auth::jwt::TokenCodec;
use crate::auth::models::{Identity, NewUser, Role, Session, TokenPair};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::token_store::{SessionStore, StoreError};
use crate::auth::user_store::UserDirectory;
use crate::config::AuthConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;

/// Input to `SessionManager::register`
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    /// Either `CHEF`/`RESTAURANT` or the `USER_ROLE_*` form.
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

pub struct SessionManager {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    store_timeout: Duration,
    bcrypt_cost: u32,
    /// Compared against when the email is unknown, so both login failures cost one bcrypt run.
    dummy_hash: String,
}

impl SessionManager {
    pub async fn new(
        config: &AuthConfig,
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hash_password(&Uuid::new_v4().to_string(), config.bcrypt_cost).await?;

        Ok(Self {
            codec,
            sessions,
            users,
            store_timeout: config.store_timeout,
            bcrypt_cost: config.bcrypt_cost,
            dummy_hash,
        })
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Create an account and open its first session
    pub async fn register(&self, input: RegisterInput) -> Result<Session, AuthError> {
        let role = Role::parse(&input.role).ok_or(AuthError::RoleInvalid)?;
        let email = normalize_email(&input.email);

        if !email.contains('@') {
            return Err(AuthError::InvalidArgument("A valid email is required"));
        }
        if input.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidArgument(
                "Password must be at least 8 characters",
            ));
        }

        if self
            .with_deadline(self.users.find_by_email(&email))
            .await??
            .is_some()
        {
            return Err(AuthError::EmailExists);
        }

        let password_hash = hash_password(&input.password, self.bcrypt_cost).await?;

        // A concurrent registration that slipped past the lookup is caught by the
        // directory's unique constraint and surfaces as EmailExists.
        let user = self
            .with_deadline(self.users.create(NewUser {
                email,
                password_hash,
                role,
            }))
            .await??;

        let identity = user.identity();
        let tokens = self.open_session(&identity).await?;

        info!(user_id = %identity.user_id, role = %identity.role, "📝 Registered account");
        Ok(Session { identity, tokens })
    }

    /// Exchange credentials for a token pair
    pub async fn login(&self, input: LoginInput) -> Result<Session, AuthError> {
        let email = normalize_email(&input.email);

        let Some(user) = self.with_deadline(self.users.find_by_email(&email)).await?? else {
            // Burn the same bcrypt time as a real check before answering.
            let _ = verify_password(&input.password, &self.dummy_hash).await?;
            warn!(email = %email, "❌ Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(&input.password, &user.password_hash).await? {
            warn!(email = %email, "❌ Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        let identity = user.identity();
        let tokens = self.open_session(&identity).await?;

        info!(user_id = %identity.user_id, role = %identity.role, "✅ Login successful");
        Ok(Session { identity, tokens })
    }

    /// Rotate a refresh token. The swap is a single compare-and-set in the
    /// store, so of two concurrent refreshes with one token only one wins.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.codec.verify_refresh(refresh_token)?;

        // Re-read the account so deleted users cannot keep rotating.
        let user = self
            .with_deadline(self.users.find_by_id(claims.user_id))
            .await??
            .ok_or(AuthError::Unauthenticated)?;

        let identity = user.identity();
        let tokens = self.codec.issue_pair(&identity)?;

        let rotated = self
            .with_deadline(self.sessions.rotate(
                identity.user_id,
                refresh_token,
                &tokens.refresh_token,
                self.codec.refresh_ttl(),
            ))
            .await??;
        if !rotated {
            debug!(user_id = %claims.user_id, "Refresh token no longer current");
            return Err(AuthError::InvalidToken);
        }

        info!(user_id = %identity.user_id, "🔄 Rotated refresh token");
        Ok(tokens)
    }

    /// Best-effort logout. Reports success for any token string; only store
    /// failures are errors.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let Ok(claims) = self.codec.verify_refresh(refresh_token) else {
            return Ok(());
        };

        self.with_deadline(self.sessions.revoke(claims.user_id))
            .await??;

        info!(user_id = %claims.user_id, "👋 Logged out");
        Ok(())
    }

    /// Drop every session of a user (account deletion, forced sign-out)
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.with_deadline(self.sessions.revoke_all(user_id))
            .await??;

        info!(user_id = %user_id, "🔒 Revoked all sessions");
        Ok(())
    }

    async fn open_session(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        let tokens = self.codec.issue_pair(identity)?;

        self.with_deadline(self.sessions.put(
            identity.user_id,
            &tokens.refresh_token,
            self.codec.refresh_ttl(),
        ))
        .await??;

        Ok(tokens)
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| AuthError::from(StoreError::Timeout))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::Code;
    use crate::auth::token_store::MemorySessionStore;
    use crate::auth::user_store::SqliteUserStore;
    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "session-test-secret-with-enough-bytes".to_string(),
            bcrypt_cost: 4,
            store_timeout: Duration::from_millis(200),
            ..AuthConfig::default()
        }
    }

    async fn manager_with(
        sessions: Arc<dyn SessionStore>,
    ) -> (SessionManager, Arc<SqliteUserStore>, NamedTempFile) {
        let config = test_config();
        let temp_file = NamedTempFile::new().unwrap();
        let users = Arc::new(SqliteUserStore::open(temp_file.path().to_str().unwrap()).unwrap());
        let manager = SessionManager::new(
            &config,
            Arc::new(TokenCodec::new(&config)),
            sessions,
            users.clone(),
        )
        .await
        .unwrap();
        (manager, users, temp_file)
    }

    fn chef(email: &str) -> RegisterInput {
        RegisterInput {
            email: email.to_string(),
            password: "password123".to_string(),
            role: "CHEF".to_string(),
        }
    }

    /// Store whose every call fails, as if the backend were unreachable.
    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn put(&self, _: Uuid, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn validate(&self, _: Uuid, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn rotate(&self, _: Uuid, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn revoke(&self, _: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn revoke_all(&self, _: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    /// Store that never answers.
    struct HangingStore;

    #[async_trait]
    impl SessionStore for HangingStore {
        async fn put(&self, _: Uuid, _: &str, _: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn validate(&self, _: Uuid, _: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn rotate(&self, _: Uuid, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn revoke(&self, _: Uuid) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn revoke_all(&self, _: Uuid) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_register_issues_stored_pair() {
        let store = Arc::new(MemorySessionStore::new());
        let (manager, _users, _temp) = manager_with(store.clone()).await;

        let session = manager.register(chef("a@x.com")).await.unwrap();

        assert_eq!(session.identity.email, "a@x.com");
        assert_eq!(session.identity.role, Role::Chef);
        assert!(store
            .validate(session.identity.user_id, &session.tokens.refresh_token)
            .await
            .unwrap());

        let claims = manager
            .codec()
            .verify_access(&session.tokens.access_token)
            .unwrap();
        assert_eq!(claims.identity(), session.identity);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;

        let bad_role = RegisterInput {
            role: "ADMIN".to_string(),
            ..chef("a@x.com")
        };
        assert!(matches!(
            manager.register(bad_role).await,
            Err(AuthError::RoleInvalid)
        ));

        let short_password = RegisterInput {
            password: "short".to_string(),
            ..chef("a@x.com")
        };
        let err = manager.register(short_password).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let bad_email = chef("not-an-email");
        let err = manager.register(bad_email).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;

        manager.register(chef("a@x.com")).await.unwrap();
        let err = manager.register(chef(" A@X.com ")).await.unwrap_err();

        assert!(matches!(err, AuthError::EmailExists));
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn test_concurrent_register_creates_one_account() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;

        let (first, second) = tokio::join!(
            manager.register(chef("race@x.com")),
            manager.register(chef("race@x.com"))
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AuthError::EmailExists))));
    }

    #[tokio::test]
    async fn test_login_does_not_distinguish_unknown_email() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;
        manager.register(chef("a@x.com")).await.unwrap();

        let wrong_password = manager
            .login(LoginInput {
                email: "a@x.com".to_string(),
                password: "not-the-password".to_string(),
            })
            .await
            .unwrap_err();
        let unknown_email = manager
            .login(LoginInput {
                email: "nobody@x.com".to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.public_message(), unknown_email.public_message());
    }

    #[tokio::test]
    async fn test_login_replaces_previous_session() {
        let store = Arc::new(MemorySessionStore::new());
        let (manager, _users, _temp) = manager_with(store.clone()).await;

        let registered = manager.register(chef("a@x.com")).await.unwrap();
        let logged_in = manager
            .login(LoginInput {
                email: "a@x.com".to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap();

        assert_ne!(registered.tokens, logged_in.tokens);
        assert!(matches!(
            manager.refresh(&registered.tokens.refresh_token).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(manager.refresh(&logged_in.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotation() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;
        let session = manager.register(chef("a@x.com")).await.unwrap();

        let rotated = manager.refresh(&session.tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, session.tokens.refresh_token);

        let reuse = manager
            .refresh(&session.tokens.refresh_token)
            .await
            .unwrap_err();
        assert_eq!(reuse.code(), Code::Unauthenticated);

        assert!(manager.refresh(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_has_single_winner() {
        let store = Arc::new(MemorySessionStore::new());
        let (manager, _users, _temp) = manager_with(store.clone()).await;
        let manager = Arc::new(manager);
        let session = manager.register(chef("a@x.com")).await.unwrap();
        let user_id = session.identity.user_id;
        let mut current = session.tokens.refresh_token;

        for _ in 0..20 {
            let first = {
                let manager = manager.clone();
                let token = current.clone();
                tokio::spawn(async move { manager.refresh(&token).await })
            };
            let second = {
                let manager = manager.clone();
                let token = current.clone();
                tokio::spawn(async move { manager.refresh(&token).await })
            };

            let results = [first.await.unwrap(), second.await.unwrap()];
            let winners: Vec<&TokenPair> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(AuthError::InvalidToken))));

            current = winners[0].refresh_token.clone();
            assert!(store.validate(user_id, &current).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;
        let session = manager.register(chef("a@x.com")).await.unwrap();

        assert!(matches!(
            manager.refresh(&session.tokens.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_deleted_account_cannot_refresh() {
        let (manager, users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;
        let session = manager.register(chef("a@x.com")).await.unwrap();

        assert!(users.delete(session.identity.user_id).await.unwrap());

        assert!(matches!(
            manager.refresh(&session.tokens.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_silent() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;
        let session = manager.register(chef("a@x.com")).await.unwrap();

        manager.logout(&session.tokens.refresh_token).await.unwrap();
        manager.logout(&session.tokens.refresh_token).await.unwrap();
        manager.logout("garbage").await.unwrap();
        manager.logout(&session.tokens.access_token).await.unwrap();

        assert_eq!(
            manager
                .refresh(&session.tokens.refresh_token)
                .await
                .unwrap_err()
                .code(),
            Code::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_revoke_all_ends_session() {
        let (manager, _users, _temp) = manager_with(Arc::new(MemorySessionStore::new())).await;
        let session = manager.register(chef("a@x.com")).await.unwrap();

        manager.revoke_all(session.identity.user_id).await.unwrap();

        assert!(manager.refresh(&session.tokens.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_not_revocation() {
        let healthy = Arc::new(MemorySessionStore::new());
        let (good, _users, temp) = manager_with(healthy).await;
        let session = good.register(chef("a@x.com")).await.unwrap();

        let config = test_config();
        let users = Arc::new(SqliteUserStore::open(temp.path().to_str().unwrap()).unwrap());
        let broken = SessionManager::new(
            &config,
            Arc::new(TokenCodec::new(&config)),
            Arc::new(BrokenStore),
            users,
        )
        .await
        .unwrap();

        let refresh = broken
            .refresh(&session.tokens.refresh_token)
            .await
            .unwrap_err();
        assert_eq!(refresh.code(), Code::Internal);

        let logout = broken
            .logout(&session.tokens.refresh_token)
            .await
            .unwrap_err();
        assert_eq!(logout.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_store_deadline() {
        let (manager, _users, _temp) = manager_with(Arc::new(HangingStore)).await;

        let err = manager.register(chef("a@x.com")).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }
}
