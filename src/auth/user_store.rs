//! User Directory
//! Mission: Look up accounts by id/email for the session lifecycle
//!
//! The identity core only needs four operations from the account store, so
//! it talks to it through `UserDirectory`. `SqliteUserStore` is the bundled
//! implementation.

use crate::auth::models::{NewUser, Role, User};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("user store error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("corrupt user record: {0}")]
    Corrupt(String),
    #[error("user store task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError>;

    /// Insert a new account. A duplicate email is `UserStoreError::EmailTaken`.
    async fn create(&self, new_user: NewUser) -> Result<User, UserStoreError>;

    /// Returns false when no account had that id.
    async fn delete(&self, id: Uuid) -> Result<bool, UserStoreError>;
}

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// (id, email, password_hash, role, created_at) as stored
type RawUser = (String, String, String, String, String);

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

/// Async handle over `UserStore`; every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteUserStore {
    inner: Arc<UserStore>,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self, UserStoreError> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, UserStoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<(), UserStoreError> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RawUser> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn decode_user(
        (id, email, password_hash, role, created_at): RawUser,
    ) -> Result<User, UserStoreError> {
        let id = Uuid::parse_str(&id)
            .map_err(|e| UserStoreError::Corrupt(format!("bad user id {}: {}", id, e)))?;
        let role = Role::parse(&role)
            .ok_or_else(|| UserStoreError::Corrupt(format!("unknown role {} for {}", role, id)))?;

        Ok(User {
            id,
            email,
            password_hash,
            role,
            created_at,
        })
    }

    /// Get user by email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        let conn = self.connect()?;

        let raw = conn
            .query_row(
                "SELECT id, email, password_hash, role, created_at
                 FROM users WHERE email = ?1",
                params![email],
                Self::read_row,
            )
            .optional()?;

        raw.map(Self::decode_user).transpose()
    }

    /// Get user by id
    pub fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>, UserStoreError> {
        let conn = self.connect()?;

        let raw = conn
            .query_row(
                "SELECT id, email, password_hash, role, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                Self::read_row,
            )
            .optional()?;

        raw.map(Self::decode_user).transpose()
    }

    /// Create a new user
    pub fn create_user(&self, new_user: NewUser) -> Result<User, UserStoreError> {
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT INTO users (id, email, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                warn!("Duplicate registration rejected by unique constraint");
                return Err(UserStoreError::EmailTaken);
            }
            Err(e) => return Err(e.into()),
        }

        info!("✅ Created user: {} ({})", user.id, user.role.as_str());

        Ok(user)
    }

    /// Delete a user by ID
    pub fn delete_user(&self, user_id: &Uuid) -> Result<bool, UserStoreError> {
        let conn = self.connect()?;

        let rows_affected = conn.execute(
            "DELETE FROM users WHERE id = ?1",
            params![user_id.to_string()],
        )?;

        if rows_affected > 0 {
            info!("🗑️  Deleted user: {}", user_id);
        }
        Ok(rows_affected > 0)
    }
}

impl SqliteUserStore {
    pub fn open(db_path: &str) -> Result<Self, UserStoreError> {
        Ok(Self {
            inner: Arc::new(UserStore::new(db_path)?),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, UserStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&UserStore) -> Result<T, UserStoreError> + Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| UserStoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl UserDirectory for SqliteUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        let email = email.to_string();
        self.run(move |store| store.get_user_by_email(&email)).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        self.run(move |store| store.get_user_by_id(&id)).await
    }

    async fn create(&self, new_user: NewUser) -> Result<User, UserStoreError> {
        self.run(move |store| store.create_user(new_user)).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, UserStoreError> {
        self.run(move |store| store.delete_user(&id)).await
    }
}
