//! ChefNext API Server
//! Mission: Serve AuthService behind authentication, rate limiting and role checks
//!
//! Environment:
//!   JWT_SECRET - HMAC signing secret (required)
//!   DATABASE_PATH - SQLite user database (default: chefnext.db)
//!   REDIS_URL - Session store; in-memory sessions when unset
//!   CORS_ORIGINS - Comma-separated allowed origins (default: *)

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chefnext_api::{
    auth::{
        MemorySessionStore, RedisSessionStore, RoleInterceptor, SessionManager, SessionStore,
        SqliteUserStore, TokenCodec,
    },
    config::{default_public_procedures, AuthConfig, ISSUER},
    middleware::{RateLimitConfig, RateLimiter},
    server,
};

#[derive(Parser, Debug)]
#[command(name = "chefnext-api")]
#[command(about = "ChefNext identity service - token issuance, sessions and access control")]
struct ServerArgs {
    /// Listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,

    /// SQLite database holding user accounts
    #[arg(long, env = "DATABASE_PATH", default_value = "chefnext.db")]
    database_path: String,

    /// Redis URL for refresh sessions (in-memory store when unset)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// HMAC secret used to sign every token
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL_SECS", default_value = "900")]
    access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL_SECS", default_value = "2592000")]
    refresh_token_ttl_secs: u64,

    /// Sustained requests per second per caller
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "100")]
    rate_limit_per_second: f64,

    /// Burst size per caller
    #[arg(long, env = "RATE_LIMIT_BURST", default_value = "200")]
    rate_limit_burst: u32,

    /// Maximum callers tracked by the rate limiter
    #[arg(long, env = "RATE_LIMIT_CAPACITY", default_value = "10000")]
    rate_limit_capacity: usize,

    /// Procedures callable without an access token (comma-separated; defaults to AuthService)
    #[arg(long, env = "PUBLIC_PROCEDURES", value_delimiter = ',')]
    public_procedures: Vec<String>,

    /// Deadline for session store and user database calls, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "2000")]
    store_timeout_ms: u64,

    /// bcrypt work factor
    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    bcrypt_cost: u32,

    /// Allowed CORS origins (comma-separated, `*` for any)
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,
}

impl ServerArgs {
    fn auth_config(&self) -> AuthConfig {
        let public_procedures = if self.public_procedures.is_empty() {
            default_public_procedures()
        } else {
            self.public_procedures
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };

        AuthConfig {
            jwt_secret: self.jwt_secret.clone(),
            issuer: ISSUER.to_string(),
            access_token_ttl: Duration::from_secs(self.access_token_ttl_secs),
            refresh_token_ttl: Duration::from_secs(self.refresh_token_ttl_secs),
            rate_limit_per_second: self.rate_limit_per_second,
            rate_limit_burst: self.rate_limit_burst,
            rate_limit_capacity: self.rate_limit_capacity,
            public_procedures,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            bcrypt_cost: self.bcrypt_cost,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = ServerArgs::parse();
    let config = args.auth_config();
    config.validate().context("Invalid configuration")?;

    info!("🚀 ChefNext API starting");
    info!("  Database: {}", args.database_path);
    info!("  Public procedures: {}", config.public_procedures.len());

    let users = Arc::new(
        SqliteUserStore::open(&args.database_path).context("Failed to open user database")?,
    );

    let sessions: Arc<dyn SessionStore> = match &args.redis_url {
        Some(url) => Arc::new(
            RedisSessionStore::connect(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            warn!("⚠️  REDIS_URL not set - sessions are kept in memory and lost on restart");
            Arc::new(MemorySessionStore::new())
        }
    };

    let codec = Arc::new(TokenCodec::new(&config));
    let manager = Arc::new(
        SessionManager::new(&config, codec.clone(), sessions, users)
            .await
            .context("Failed to initialize session manager")?,
    );

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&config)));
    let chain = Arc::new(server::interceptor_chain(
        &config,
        codec,
        limiter,
        RoleInterceptor::new(),
    ));

    let app = server::build_app(server::identity_router(manager), chain, &args.cors_origins);

    let listener = TcpListener::bind(&args.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind_addr))?;
    info!("🎯 API server listening on {}", args.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chefnext_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when started from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
