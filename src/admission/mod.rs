//! Export admission
//!
//! Decides whether an export request may start at all. Two independent
//! limits apply: a per-client request quota over a sliding window and a
//! global cap on concurrently streaming exports. A rejected request leaves
//! no trace in either limit.
//!
//! The export engine itself knows nothing about admission; the transport
//! calls [`ExportAdmission::admit`] and moves the permit into the export
//! task so it is released when the stream ends.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::AdmissionError;

type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Tracked client keys above which stale entries are pruned
const PRUNE_THRESHOLD: usize = 10_000;

/// Rate and concurrency admission for exports
#[derive(Clone)]
pub struct ExportAdmission {
    limiter: Arc<KeyedRateLimiter>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

/// Proof of admission; frees the concurrency slot on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    client: String,
    _slot: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn client(&self) -> &str {
        &self.client
    }
}

impl ExportAdmission {
    /// Build the admission policy
    ///
    /// # Arguments
    /// * `config` - Window, permits per window and concurrency cap
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = quota_from_window(Duration::from_secs(config.window_secs), config.permits);
        let max_concurrent = config.max_concurrent_exports.max(1);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Admit one export for `client`
    ///
    /// # Arguments
    /// * `client` - Client key, usually the peer address
    ///
    /// # Returns
    /// * `Result<AdmissionPermit, AdmissionError>` - Permit to hold for the
    ///   lifetime of the export, or the rejection reason
    pub fn admit(&self, client: &str) -> Result<AdmissionPermit, AdmissionError> {
        // Take the slot first: a failed try_acquire changes nothing, and the
        // slot goes back if the quota check rejects.
        let slot = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| AdmissionError::TooManyConcurrent {
                limit: self.max_concurrent,
            })?;

        let key = client.to_string();
        if let Err(not_until) = self.limiter.check_key(&key) {
            let retry_after = not_until.wait_time_from(DefaultClock::default().now());
            debug!(client, "Export rate limited for {:?}", retry_after);
            return Err(AdmissionError::RateLimited {
                client: key,
                retry_after,
            });
        }

        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
        }

        Ok(AdmissionPermit {
            client: key,
            _slot: slot,
        })
    }

    /// Concurrency slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

fn quota_from_window(window: Duration, permits: u32) -> Quota {
    let permits = permits.max(1);
    let burst = NonZeroU32::new(permits).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs_f64((window.as_secs_f64() / f64::from(permits)).max(0.001));

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
