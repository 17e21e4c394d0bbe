//! Per-client token bucket rate limiting.
//!
//! Features:
//! - One bucket per client key (remote IP), created lazily on first sight
//! - Whole-second refill, capped at the burst capacity
//! - Refill-and-decide serialized per bucket, never across the registry
//! - Optional idle eviction with a background sweeper
//!
//! # Example
//!
//! ```rust,ignore
//! use edge_gateway::middleware::rate_limit::{BucketRegistry, RateLimitConfig};
//!
//! let config = RateLimitConfig::builder()
//!     .requests_per_second(10)
//!     .burst_capacity(20)
//!     .build();
//!
//! let registry = Arc::new(BucketRegistry::new(config)?);
//! ```

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pipeline::{Filter, Next};
use crate::{
    clock::{Clock, SystemClock},
    config::ConfigError,
    error::{FilterError, Result},
};

/// Runs after authentication, before routing.
pub const RATE_LIMIT_PRIORITY: i32 = -40;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate limiting configuration. Immutable once the registry is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per elapsed whole second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Bucket capacity
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,

    /// Evict buckets idle for this long. `None` keeps every bucket.
    #[serde(default)]
    pub idle_ttl_secs: Option<u64>,

    /// Sweep interval for idle eviction
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_requests_per_second() -> u32 { 10 }
fn default_burst_capacity() -> u32 { 20 }
fn default_eviction_interval_secs() -> u64 { 60 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_capacity: default_burst_capacity(),
            idle_ttl_secs: None,
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Both limits must be positive.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.requests_per_second == 0 {
            return Err(ConfigError::NonPositive { field: "rate_limit.requests_per_second" });
        }
        if self.burst_capacity == 0 {
            return Err(ConfigError::NonPositive { field: "rate_limit.burst_capacity" });
        }
        if self.idle_ttl_secs == Some(0) {
            return Err(ConfigError::NonPositive { field: "rate_limit.idle_ttl_secs" });
        }
        if self.eviction_interval_secs == 0 {
            return Err(ConfigError::NonPositive { field: "rate_limit.eviction_interval_secs" });
        }
        Ok(())
    }
}

/// Builder for rate limit configuration.
#[derive(Debug, Default)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn requests_per_second(mut self, rps: u32) -> Self {
        self.config.requests_per_second = rps;
        self
    }

    pub fn burst_capacity(mut self, capacity: u32) -> Self {
        self.config.burst_capacity = capacity;
        self
    }

    pub fn idle_ttl_secs(mut self, secs: u64) -> Self {
        self.config.idle_ttl_secs = Some(secs);
        self
    }

    pub fn eviction_interval_secs(mut self, secs: u64) -> Self {
        self.config.eviction_interval_secs = secs;
        self
    }

    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Token Bucket Algorithm
// ═══════════════════════════════════════════════════════════════════════════════

/// Admission counter for one client.
///
/// `0 <= tokens <= capacity` always holds and `last_refill` never moves
/// backwards.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate_per_second: u32,
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate_per_second: u32, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Refill, then take one token if any is left.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_seen = self.last_seen.max(now);

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, after refill.
    pub fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    /// Sub-second remainders are dropped: `last_refill` jumps to `now`.
    fn refill(&mut self, now: Instant) {
        let elapsed_secs = now.saturating_duration_since(self.last_refill).as_secs();
        if elapsed_secs == 0 {
            return;
        }

        let added = elapsed_secs.saturating_mul(u64::from(self.refill_rate_per_second));
        let refilled = u64::from(self.tokens).saturating_add(added);
        self.tokens = refilled.min(u64::from(self.capacity)) as u32;
        self.last_refill = now;
    }

    fn idle_since(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Whether a refill at `now` would bring the bucket back to capacity.
    /// Does not touch `last_refill`.
    fn is_replenished(&self, now: Instant) -> bool {
        let elapsed_secs = now.saturating_duration_since(self.last_refill).as_secs();
        let added = elapsed_secs.saturating_mul(u64::from(self.refill_rate_per_second));
        u64::from(self.tokens).saturating_add(added) >= u64::from(self.capacity)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client Key
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate-limit subject, derived from the remote address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// `None` for an empty key.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (!value.is_empty()).then_some(Self(value))
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }

    /// Client key of the connection that sent `request`.
    pub fn from_request(request: &Request<Body>) -> Option<Self> {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self::from_ip(addr.ip()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bucket Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Concurrent map from client key to bucket.
pub struct BucketRegistry {
    buckets: DashMap<ClientKey, Arc<Mutex<TokenBucket>>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketRegistry")
            .field("buckets", &self.buckets.len())
            .field("config", &self.config)
            .finish()
    }
}

impl BucketRegistry {
    pub fn new(config: RateLimitConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            buckets: DashMap::new(),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit one request for `key`, creating its bucket if needed.
    pub fn try_acquire(&self, key: &ClientKey) -> bool {
        let bucket = self.bucket(key);
        let allowed = bucket.lock().try_consume(self.clock.now());

        counter!(
            "gateway_rate_limit_checks_total",
            "allowed" => if allowed { "true" } else { "false" }
        )
        .increment(1);

        allowed
    }

    /// Tokens currently available for `key`, if it has a bucket.
    pub fn available(&self, key: &ClientKey) -> Option<u32> {
        let bucket = self.buckets.get(key)?.clone();
        let tokens = bucket.lock().available(self.clock.now());
        Some(tokens)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop buckets idle for longer than the configured TTL.
    ///
    /// A bucket is only dropped once it would have refilled to capacity, so
    /// eviction never hands a client a fresher bucket than waiting would.
    /// Returns the number of evicted buckets; always zero without a TTL.
    pub fn evict_idle(&self) -> usize {
        let Some(ttl) = self.config.idle_ttl_secs.map(Duration::from_secs) else {
            return 0;
        };

        let now = self.clock.now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.lock();
            bucket.idle_since(now) < ttl || !bucket.is_replenished(now)
        });
        before.saturating_sub(self.buckets.len())
    }

    /// The shard guard is released before the bucket lock is taken.
    fn bucket(&self, key: &ClientKey) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.clone();
        }

        self.buckets
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(client = %key, "Creating token bucket");
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config.burst_capacity,
                    self.config.requests_per_second,
                    self.clock.now(),
                )))
            })
            .clone()
    }
}

/// Start the idle-eviction sweeper. Returns `None` when no TTL is configured.
pub fn spawn_eviction_task(registry: Arc<BucketRegistry>) -> Option<JoinHandle<()>> {
    if registry.config.idle_ttl_secs.is_none() {
        return None;
    }
    let period = Duration::from_secs(registry.config.eviction_interval_secs);

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = registry.evict_idle();
            if evicted > 0 {
                debug!(evicted, remaining = registry.len(), "Evicted idle token buckets");
            }
        }
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Filter
// ═══════════════════════════════════════════════════════════════════════════════

/// Admission control per remote address.
#[derive(Debug, Clone)]
pub struct RateLimitFilter {
    registry: Arc<BucketRegistry>,
}

impl RateLimitFilter {
    pub fn new(registry: Arc<BucketRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn priority(&self) -> i32 {
        RATE_LIMIT_PRIORITY
    }

    async fn apply(&self, request: Request<Body>, next: Next) -> Result<Response> {
        let client_key = ClientKey::from_request(&request)
            .ok_or_else(|| FilterError::internal("remote address unavailable"))?;

        if !self.registry.try_acquire(&client_key) {
            warn!(client = %client_key, "Rate limit exceeded");
            return Err(FilterError::RateLimitExceeded {
                client_key: client_key.to_string(),
            });
        }

        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn registry(capacity: u32, rate: u32, clock: &MockClock) -> BucketRegistry {
        let config = RateLimitConfig::builder()
            .burst_capacity(capacity)
            .requests_per_second(rate)
            .build();
        BucketRegistry::with_clock(config, Arc::new(clock.clone())).unwrap()
    }

    fn key(value: &str) -> ClientKey {
        ClientKey::new(value).unwrap()
    }

    #[test]
    fn test_token_bucket() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(3, 1, now);

        assert!(bucket.try_consume(now));
        assert_eq!(bucket.tokens(), 2);
        assert!(bucket.try_consume(now));
        assert!(bucket.try_consume(now));
        assert!(!bucket.try_consume(now));
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn test_sub_second_elapsed_does_not_refill() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(2, 5, now);
        bucket.try_consume(now);
        bucket.try_consume(now);

        let later = now + Duration::from_millis(999);
        assert!(!bucket.try_consume(later));
        assert_eq!(bucket.last_refill(), now);
    }

    #[test]
    fn test_refill_by_whole_seconds() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(10, 2, now);
        for _ in 0..10 {
            assert!(bucket.try_consume(now));
        }

        let later = now + Duration::from_millis(1_700);
        assert_eq!(bucket.available(later), 2);
        assert_eq!(bucket.last_refill(), later);
    }

    #[test]
    fn test_refill_capped_after_long_idle() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(5, 1, now);
        bucket.try_consume(now);

        assert_eq!(bucket.available(now + Duration::from_secs(3_600)), 5);
    }

    #[test]
    fn test_last_refill_never_moves_backwards() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(5, 1, now + Duration::from_secs(2));
        bucket.try_consume(now);
        assert_eq!(bucket.last_refill(), now + Duration::from_secs(2));
    }

    #[test]
    fn test_rejection_leaves_tokens_unchanged() {
        let clock = MockClock::default();
        let registry = registry(1, 1, &clock);
        let client = key("10.0.0.1");

        assert!(registry.try_acquire(&client));
        assert!(!registry.try_acquire(&client));
        assert_eq!(registry.available(&client), Some(0));
    }

    #[test]
    fn test_capacity_then_reject_within_same_second() {
        let clock = MockClock::default();
        let registry = registry(5, 1, &clock);
        let client = key("10.0.0.1");

        for _ in 0..5 {
            assert!(registry.try_acquire(&client));
        }
        clock.advance(Duration::from_millis(100));
        assert!(!registry.try_acquire(&client));
    }

    #[test]
    fn test_full_after_ceil_capacity_over_rate() {
        let clock = MockClock::default();
        let registry = registry(5, 2, &clock);
        let client = key("10.0.0.1");
        for _ in 0..5 {
            registry.try_acquire(&client);
        }

        // ceil(5 / 2) = 3 seconds
        clock.advance(Duration::from_secs(3));
        assert_eq!(registry.available(&client), Some(5));
        assert!(registry.try_acquire(&client));
    }

    #[test]
    fn test_clients_have_independent_buckets() {
        let clock = MockClock::default();
        let registry = registry(1, 1, &clock);

        assert!(registry.try_acquire(&key("10.0.0.1")));
        assert!(registry.try_acquire(&key("10.0.0.2")));
        assert!(!registry.try_acquire(&key("10.0.0.1")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_no_eviction_without_ttl() {
        let clock = MockClock::default();
        let registry = registry(1, 1, &clock);
        registry.try_acquire(&key("10.0.0.1"));

        clock.advance(Duration::from_secs(86_400));
        assert_eq!(registry.evict_idle(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_idle_eviction_with_ttl() {
        let clock = MockClock::default();
        let config = RateLimitConfig::builder()
            .burst_capacity(2)
            .requests_per_second(1)
            .idle_ttl_secs(60)
            .build();
        let registry = BucketRegistry::with_clock(config, Arc::new(clock.clone())).unwrap();

        registry.try_acquire(&key("idle"));
        clock.advance(Duration::from_secs(30));
        registry.try_acquire(&key("active"));
        clock.advance(Duration::from_secs(31));

        assert_eq!(registry.evict_idle(), 1);
        assert_eq!(registry.available(&key("idle")), None);
        assert!(registry.available(&key("active")).is_some());
    }

    #[test]
    fn test_drained_bucket_survives_ttl_until_refilled() {
        let clock = MockClock::default();
        let config = RateLimitConfig::builder()
            .burst_capacity(100)
            .requests_per_second(1)
            .idle_ttl_secs(10)
            .build();
        let registry = BucketRegistry::with_clock(config, Arc::new(clock.clone())).unwrap();
        let client = key("10.0.0.1");

        for _ in 0..100 {
            assert!(registry.try_acquire(&client));
        }

        clock.advance(Duration::from_secs(10));
        assert_eq!(registry.evict_idle(), 0);

        let admitted = (0..200).filter(|_| registry.try_acquire(&client)).count();
        assert_eq!(admitted, 10);

        // Idle past the TTL and refilled to capacity: now evictable.
        clock.advance(Duration::from_secs(100));
        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let zero_rate = RateLimitConfig::builder().requests_per_second(0).build();
        assert!(BucketRegistry::new(zero_rate).is_err());

        let zero_capacity = RateLimitConfig::builder().burst_capacity(0).build();
        assert!(zero_capacity.validate().is_err());

        assert!(RateLimitConfig::default().validate().is_ok());
    }

    #[test]
    fn test_client_key() {
        assert!(ClientKey::new("").is_none());
        let ip: IpAddr = "192.168.1.7".parse().unwrap();
        assert_eq!(ClientKey::from_ip(ip).as_str(), "192.168.1.7");

        let mut request = Request::new(Body::empty());
        assert!(ClientKey::from_request(&request).is_none());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));
        assert_eq!(ClientKey::from_request(&request), ClientKey::new("127.0.0.1"));
    }
}
