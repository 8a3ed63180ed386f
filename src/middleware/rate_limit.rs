//! Rate limiting interceptor.
//!
//! Token bucket per caller identity (user id, or one shared bucket for
//! anonymous calls). Buckets live in a bounded moka cache; once full, the
//! least recently used bucket is dropped.

use crate::auth::error::AuthError;
use crate::config::AuthConfig;
use crate::middleware::{Call, Caller, Interceptor};
use moka::{policy::EvictionPolicy, sync::Cache};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained refill rate, tokens per second.
    pub rate_per_second: f64,
    /// Bucket size; also the number of calls a fresh identity may make at once.
    pub burst: u32,
    /// Maximum number of buckets kept in memory.
    pub capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 100.0,
            burst: 200,
            capacity: 10_000,
        }
    }
}

impl From<&AuthConfig> for RateLimitConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            rate_per_second: config.rate_limit_per_second,
            burst: config.rate_limit_burst,
            capacity: config.rate_limit_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(burst: u32, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: now,
            }),
        }
    }

    fn take(&self, config: &RateLimitConfig, now: Instant) -> RateLimitResult {
        let mut state = self.state.lock();

        // A caller holding an older `now` must not move the refill clock backwards.
        if now > state.last_refill {
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * config.rate_per_second)
                .min(f64::from(config.burst));
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            RateLimitResult::Allowed {
                remaining: state.tokens.floor() as u32,
            }
        } else {
            let missing = 1.0 - state.tokens;
            // Very small rates overflow Duration; saturate instead.
            let retry_after = Duration::try_from_secs_f64(missing / config.rate_per_second)
                .unwrap_or(Duration::MAX);
            RateLimitResult::Exceeded { retry_after }
        }
    }
}

/// Bounded set of token buckets.
///
/// Consuming a token locks only that caller's bucket. Concurrent first
/// calls for one key share a single freshly created bucket.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Cache<String, Arc<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let buckets = Cache::builder()
            .max_capacity(config.capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self { config, buckets }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    /// Consume one token from `key`'s bucket as of `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        self.bucket(key, now).take(&self.config, now)
    }

    /// Number of buckets currently held, after pending evictions are applied
    pub fn bucket_count(&self) -> usize {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count() as usize
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets.run_pending_tasks();
        self.buckets.contains_key(key)
    }

    fn bucket(&self, key: &str, now: Instant) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket;
        }

        let burst = self.config.burst;
        self.buckets
            .get_with(key.to_string(), || Arc::new(Bucket::new(burst, now)))
    }
}

/// Applies the limiter to every call, keyed by the caller bound so far
pub struct RateLimitInterceptor {
    limiter: Arc<RateLimiter>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn intercept(&self, call: &Call<'_>, caller: Caller) -> Result<Caller, AuthError> {
        let key = caller.rate_limit_key();

        match self.limiter.check(&key) {
            RateLimitResult::Allowed { .. } => Ok(caller),
            RateLimitResult::Exceeded { retry_after } => {
                warn!(
                    key = %key,
                    procedure = %call.procedure,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "Rate limit exceeded"
                );
                Err(AuthError::ResourceExhausted)
            }
        }
    }
}
