//! Rate governor for outbound calls.
//!
//! Every call to the transport, the AI extractor and the record store goes
//! through [`RateGovernor::guard`]. Each [`CallKind`] has its own lane: a
//! `governor` quota (burst of `max_requests`, replenished over the window), a
//! minimum spacing between calls and a retry budget for throttle signals.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use rand::Rng;
use std::num::NonZeroU32;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{GovernorError, UpstreamError};
use crate::types::config::{CallKind, CallPolicy, GovernorConfig};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Quota and pacing state for one call kind.
struct Lane {
    policy: CallPolicy,
    limiter: DirectRateLimiter,
    last_call: Mutex<Option<Instant>>,
    calls: AtomicU64,
    throttles: AtomicU64,
}

impl Lane {
    fn new(policy: CallPolicy) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_for(&policy)),
            policy,
            last_call: Mutex::new(None),
            calls: AtomicU64::new(0),
            throttles: AtomicU64::new(0),
        }
    }

    /// Wait for a quota cell, then for the minimum spacing.
    async fn acquire(&self) {
        self.limiter.until_ready().await;

        let spacing = self.policy.min_spacing();
        if !spacing.is_zero() {
            let mut last = self.last_call.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < spacing {
                    tokio::time::sleep(spacing - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn jitter(&self) -> Duration {
        match self.policy.jitter_ms {
            0 => Duration::ZERO,
            max => Duration::from_millis(rand::rng().random_range(0..=max)),
        }
    }
}

/// Build a quota allowing `max_requests` per window with the full burst
/// available up front.
fn quota_for(policy: &CallPolicy) -> Quota {
    let burst = NonZeroU32::new(policy.max_requests).unwrap_or(nonzero!(1u32));
    Quota::with_period(policy.window() / burst.get())
        .map(|quota| quota.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(nonzero!(1_000_000u32)))
}

/// Backoff before retry number `attempt` (1-based), without jitter.
///
/// `min(max_backoff, max(retry_after, base_backoff) * attempt)`
pub fn backoff_delay(policy: &CallPolicy, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let step = retry_after
        .unwrap_or(Duration::ZERO)
        .max(policy.base_backoff());
    step.saturating_mul(attempt.max(1)).min(policy.max_backoff())
}

/// Enforces per-kind quotas and retries throttled operations.
pub struct RateGovernor {
    lanes: HashMap<CallKind, Lane>,
}

impl RateGovernor {
    pub fn new(config: &GovernorConfig) -> Self {
        let lanes = CallKind::ALL
            .into_iter()
            .map(|kind| (kind, Lane::new(config.policy(kind).clone())))
            .collect();
        Self { lanes }
    }

    /// Governor with [`CallPolicy::unthrottled`] for every kind.
    pub fn unthrottled() -> Self {
        Self::new(&GovernorConfig::uniform(CallPolicy::unthrottled()))
    }

    fn lane(&self, kind: CallKind) -> &Lane {
        // Every kind gets a lane in `new`.
        &self.lanes[&kind]
    }

    pub fn policy(&self, kind: CallKind) -> &CallPolicy {
        &self.lane(kind).policy
    }

    /// Run `op` under the quota for `kind`.
    ///
    /// A throttle signal makes the governor sleep and invoke `op` again, at
    /// most `max_retries` times. Any other error is returned straight away.
    pub async fn guard<T, F, Fut>(&self, kind: CallKind, mut op: F) -> Result<T, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let lane = self.lane(kind);
        let mut retries = 0u32;

        loop {
            lane.acquire().await;

            let retry_after = match op().await {
                Ok(value) => return Ok(value),
                Err(UpstreamError::Throttled { retry_after }) => retry_after,
                Err(e) => return Err(GovernorError::Upstream(e)),
            };

            lane.throttles.fetch_add(1, Ordering::Relaxed);

            if retries >= lane.policy.max_retries {
                warn!(
                    "{} call still throttled after {} attempts, giving up",
                    kind,
                    retries + 1
                );
                return Err(GovernorError::RetriesExhausted {
                    kind,
                    attempts: retries + 1,
                });
            }

            retries += 1;
            let wait = backoff_delay(&lane.policy, retries, retry_after) + lane.jitter();
            debug!(
                "{} throttled (retry_after={:?}), retry {}/{} in {:?}",
                kind, retry_after, retries, lane.policy.max_retries, wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls issued for `kind` so far, retries included.
    pub fn calls(&self, kind: CallKind) -> u64 {
        self.lane(kind).calls.load(Ordering::Relaxed)
    }

    /// Throttle signals received for `kind` so far.
    pub fn throttles(&self, kind: CallKind) -> u64 {
        self.lane(kind).throttles.load(Ordering::Relaxed)
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(&GovernorConfig::default())
    }
}
