//! Per-registry fixed-window rate limiting with exponential backoff

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};

use crate::config::{BASE_BACKOFF_SECS, MAX_BACKOFF_SECS, RATE_WINDOW_SECS, RateLimitConfig};
use crate::ecosystem::Ecosystem;
use crate::governor::error::CacheError;

const WINDOW: Duration = Duration::from_secs(RATE_WINDOW_SECS);

/// Backoff after `failures` consecutive failed requests:
/// `min(30s, 0.1s * 2^failures)`
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.min(64) as i32;
    let secs = (BASE_BACKOFF_SECS * 2f64.powi(exponent)).min(MAX_BACKOFF_SECS);
    Duration::from_secs_f64(secs)
}

#[derive(Debug, Clone)]
struct RateState {
    requests_made: u32,
    /// Slots handed out by `wait_for_rate_limit` but not yet recorded
    in_flight: u32,
    window_start: Instant,
    backoff_until: Option<Instant>,
    consecutive_failures: u32,
}

impl RateState {
    fn new(now: Instant) -> Self {
        Self {
            requests_made: 0,
            in_flight: 0,
            window_start: now,
            backoff_until: None,
            consecutive_failures: 0,
        }
    }

    fn reset_window(&mut self, now: Instant) {
        self.requests_made = 0;
        self.window_start = now;
    }

    fn roll_window(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= WINDOW {
            self.reset_window(now);
        }
    }

    fn has_capacity(&self, limit: &RateLimitConfig) -> bool {
        self.requests_made + self.in_flight < limit.requests_per_minute.max(1)
    }

    fn backoff_remaining(&self, now: Instant) -> Duration {
        self.backoff_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

/// Snapshot of one registry's limiter state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub requests_made: u32,
    pub consecutive_failures: u32,
    pub backoff_active: bool,
}

pub struct RateLimiter {
    limits: HashMap<String, RateLimitConfig>,
    enabled: bool,
    states: Mutex<HashMap<String, RateState>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, RateLimitConfig>, enabled: bool) -> Self {
        Self {
            limits,
            enabled,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn lock_states(&self) -> Result<MutexGuard<'_, HashMap<String, RateState>>, CacheError> {
        self.states.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Limit for the ecosystem's registry, or `None` when requests are unlimited
    fn limit_for(&self, ecosystem: Ecosystem) -> Option<RateLimitConfig> {
        if !self.enabled {
            return None;
        }
        self.limits.get(ecosystem.registry_name()).copied()
    }

    /// Runs `f` on the registry state under the lock
    fn with_state<R>(
        &self,
        ecosystem: Ecosystem,
        f: impl FnOnce(&mut RateState, Instant) -> R,
    ) -> Result<R, CacheError> {
        let now = Instant::now();
        let mut states = self.lock_states()?;
        let state = states
            .entry(ecosystem.registry_name().to_string())
            .or_insert_with(|| RateState::new(now));
        Ok(f(state, now))
    }

    pub fn can_make_request(&self, ecosystem: Ecosystem) -> bool {
        let Some(limit) = self.limit_for(ecosystem) else {
            return true;
        };

        self.with_state(ecosystem, |state, now| {
            if state.backoff_remaining(now) > Duration::ZERO {
                return false;
            }
            state.roll_window(now);
            state.has_capacity(&limit)
        })
        .inspect_err(|e| error!("Rate limiter unavailable for {}: {}", ecosystem, e))
        .unwrap_or(true)
    }

    pub fn record_request(&self, ecosystem: Ecosystem, success: bool) {
        if self.limit_for(ecosystem).is_none() {
            return;
        }

        let _ = self
            .with_state(ecosystem, |state, now| {
                state.requests_made += 1;
                state.in_flight = state.in_flight.saturating_sub(1);
                if success {
                    state.consecutive_failures = 0;
                } else {
                    state.consecutive_failures += 1;
                    let delay = backoff_delay(state.consecutive_failures);
                    state.backoff_until = Some(now + delay);
                    debug!(
                        "{} request failed ({} in a row), backing off {:?}",
                        ecosystem.registry_name(),
                        state.consecutive_failures,
                        delay
                    );
                }
            })
            .inspect_err(|e| error!("Failed to record request for {}: {}", ecosystem, e));
    }

    /// Sleeps out any active backoff, then the rest of the window while the
    /// quota is exhausted, and reserves a slot in the current window. Every
    /// reservation must be followed by `record_request`. Returns the total
    /// time slept.
    pub async fn wait_for_rate_limit(&self, ecosystem: Ecosystem) -> Duration {
        let Some(limit) = self.limit_for(ecosystem) else {
            return Duration::ZERO;
        };
        let mut waited = Duration::ZERO;

        loop {
            let pause = self.with_state(ecosystem, |state, now| {
                let backoff = state.backoff_remaining(now);
                if !backoff.is_zero() {
                    return Some((backoff, "backoff"));
                }
                state.roll_window(now);
                if state.has_capacity(&limit) {
                    state.in_flight += 1;
                    None
                } else {
                    Some((
                        (state.window_start + WINDOW).saturating_duration_since(now),
                        "rate limit",
                    ))
                }
            });
            let (delay, reason) = match pause {
                Ok(Some(pause)) => pause,
                Ok(None) => return waited,
                Err(e) => {
                    error!("Rate limiter unavailable for {}: {}", ecosystem, e);
                    return waited;
                }
            };

            info!(
                "Waiting {:?} for {} {}",
                delay,
                ecosystem.registry_name(),
                reason
            );
            sleep(delay).await;
            waited += delay;
        }
    }

    pub fn stats(&self) -> HashMap<String, RegistryStats> {
        let now = Instant::now();
        self.lock_states()
            .map(|states| {
                states
                    .iter()
                    .map(|(registry, state)| {
                        (
                            registry.clone(),
                            RegistryStats {
                                requests_made: state.requests_made,
                                consecutive_failures: state.consecutive_failures,
                                backoff_active: !state.backoff_remaining(now).is_zero(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
