//! Authentication Module
//! Mission: Issue, verify, rotate and revoke bearer tokens, and gate calls by identity

pub mod api;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod session;
pub mod token_store;
pub mod user_store;

pub use api::AuthState;
pub use error::{AuthError, Code};
pub use jwt::TokenCodec;
pub use middleware::{AuthInterceptor, RoleInterceptor};
pub use models::{Claims, Identity, Role, TokenKind, TokenPair};
pub use session::SessionManager;
pub use token_store::{MemorySessionStore, RedisSessionStore, SessionStore, StoreError};
pub use user_store::{SqliteUserStore, UserDirectory, UserStoreError};
