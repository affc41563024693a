//! Cache & rate governor protecting external registry calls
//!
//! Every registry metadata lookup goes through the [`Governor`]: a cache hit
//! short-circuits the network entirely, otherwise the caller waits for the
//! registry's rate limiter before fetching and records the outcome afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   get/set   ┌──────────────┐  miss  ┌──────────────────┐
//! │    Caller    │────────────▶│ ResultCache  │───────▶│ <eco>_cache.json │
//! │ (metadata)   │             │   (memory)   │◀───────│     (disk)       │
//! └──────────────┘             └──────────────┘ promote└──────────────────┘
//!        │ wait / record
//!        ▼
//! ┌──────────────┐
//! │ RateLimiter  │  fixed 60s window + exponential backoff per registry
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: two-tier write-through cache
//! - [`rate_limit`]: per-registry request quotas and backoff
//! - [`error`]: error types for cache operations

pub mod cache;
pub mod error;
pub mod rate_limit;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::CacheConfig;
use crate::ecosystem::Ecosystem;
use crate::governor::cache::ResultCache;
use crate::governor::error::CacheError;
use crate::governor::rate_limit::{RateLimiter, RegistryStats};

/// Cache statistics reported by `cache stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorStats {
    pub memory_entries: usize,
    pub disk_documents: usize,
    pub registries: BTreeMap<String, RegistryStats>,
}

/// Shared cache + rate limiting service. Safe to share through `Arc`.
pub struct Governor {
    cache: ResultCache,
    limiter: RateLimiter,
}

impl Governor {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: ResultCache::new(
                &config.resolved_cache_dir(),
                config.max_age_days,
                config.enabled,
            ),
            limiter: RateLimiter::new(config.rate_limits.clone(), config.rate_limiting),
        }
    }

    pub fn get_cached(
        &self,
        ecosystem: Ecosystem,
        package: &str,
        version: Option<&str>,
    ) -> Option<serde_json::Value> {
        self.cache.get(ecosystem, package, version)
    }

    pub fn set_cached(
        &self,
        ecosystem: Ecosystem,
        package: &str,
        data: serde_json::Value,
        version: Option<&str>,
        ttl_hours: Option<i64>,
    ) {
        self.cache.set(ecosystem, package, data, version, ttl_hours)
    }

    pub fn can_make_request(&self, ecosystem: Ecosystem) -> bool {
        self.limiter.can_make_request(ecosystem)
    }

    pub fn record_request(&self, ecosystem: Ecosystem, success: bool) {
        self.limiter.record_request(ecosystem, success)
    }

    pub async fn wait_for_rate_limit(&self, ecosystem: Ecosystem) -> Duration {
        self.limiter.wait_for_rate_limit(ecosystem).await
    }

    pub fn get_batch_candidates(&self, ecosystem: Ecosystem, packages: &[String]) -> Vec<String> {
        self.cache.batch_candidates(ecosystem, packages)
    }

    pub fn clear(&self, ecosystem: Option<Ecosystem>) -> Result<usize, CacheError> {
        self.cache.clear(ecosystem)
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            memory_entries: self.cache.memory_entries(),
            disk_documents: self.cache.disk_documents(),
            registries: self.limiter.stats().into_iter().collect(),
        }
    }
}
