//! Rate-limited fetching with failure classification (made by FontLab https://www.fontlab.com/)
//!
//! Transient failures are retried with capped, jittered exponential backoff.
//! Block signals and not-found answers are surfaced immediately so callers can
//! fall back instead of hammering a source that is refusing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SourcePolicies;
use crate::error::{FetchError, TransportError};
use crate::rate_limit::{Admission, RateLimiter, ResourceClass};
use crate::transport::{RawResponse, Request, Transport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts for one request, first try included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay that may be randomly shaved off (0.0..=1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: 0.25,
        }
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(RawResponse),
    Transient(String),
    Fail(FetchError),
}

/// What the fetcher does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Success(RawResponse),
    Retry(Duration),
    Fail(FetchError),
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped, then jittered down.
    pub fn backoff(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let raw = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_delay_ms);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 - jitter * rng.gen::<f64>()
        } else {
            1.0
        };
        Duration::from_millis((raw as f64 * factor).round() as u64)
    }

    /// Decide the next step after `attempts` attempts ended in `outcome`.
    pub fn step(&self, attempts: u32, outcome: Outcome, rng: &mut impl Rng) -> Step {
        match outcome {
            Outcome::Success(response) => Step::Success(response),
            Outcome::Fail(err) => Step::Fail(err),
            Outcome::Transient(last) if attempts >= self.max_attempts => {
                Step::Fail(FetchError::Exhausted { attempts, last })
            }
            Outcome::Transient(_) => Step::Retry(self.backoff(attempts.saturating_sub(1), rng)),
        }
    }
}

/// Map an HTTP status to an attempt outcome for a source with the given block statuses.
pub fn classify(response: RawResponse, block_statuses: &[u16]) -> Outcome {
    match response.status {
        200..=299 => Outcome::Success(response),
        404 | 410 => Outcome::Fail(FetchError::NotFound),
        status if status == 429 || block_statuses.contains(&status) => {
            Outcome::Fail(FetchError::Blocked { status })
        }
        408 | 500..=599 => Outcome::Transient(format!("HTTP {}", response.status)),
        status => Outcome::Fail(FetchError::Rejected { status }),
    }
}

impl From<TransportError> for Outcome {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) | TransportError::Connection(_) => {
                Outcome::Transient(err.to_string())
            }
            TransportError::Invalid(msg) => Outcome::Fail(FetchError::Request(msg)),
        }
    }
}

/// Requests issued per source, every attempt counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCounts {
    #[serde(alias = "github")]
    pub directory: u64,
    pub metadata: u64,
    #[serde(alias = "css2")]
    pub variants: u64,
}

#[derive(Debug, Default)]
struct RequestCounters {
    counts: [AtomicU64; 3],
}

impl RequestCounters {
    fn record(&self, class: ResourceClass) {
        let slot = match class {
            ResourceClass::Directory => 0,
            ResourceClass::Metadata => 1,
            ResourceClass::Variants => 2,
        };
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RequestCounts {
        RequestCounts {
            directory: self.counts[0].load(Ordering::Relaxed),
            metadata: self.counts[1].load(Ordering::Relaxed),
            variants: self.counts[2].load(Ordering::Relaxed),
        }
    }
}

/// The single path every upstream request takes.
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    sources: SourcePolicies,
    policy: RetryPolicy,
    counters: RequestCounters,
    rng: Mutex<StdRng>,
}

impl RetryingFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: RateLimiter,
        sources: SourcePolicies,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            sources,
            policy,
            counters: RequestCounters::default(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fix the jitter source, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub async fn fetch(
        &self,
        class: ResourceClass,
        request: &Request,
    ) -> Result<RawResponse, FetchError> {
        let block_statuses = &self.sources.get(class).block_statuses;
        let mut attempts = 0u32;

        loop {
            if self.limiter.acquire(class).await == Admission::Abandoned {
                return Err(FetchError::Abandoned);
            }

            attempts += 1;
            self.counters.record(class);
            let outcome = match self.transport.get(request).await {
                Ok(response) => classify(response, block_statuses),
                Err(err) => Outcome::from(err),
            };

            let step = {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.policy.step(attempts, outcome, &mut *rng)
            };

            match step {
                Step::Success(response) => return Ok(response),
                Step::Fail(err) => {
                    debug!(source = %class, url = %request.url, attempts, error = %err, "fetch failed");
                    return Err(err);
                }
                Step::Retry(delay) => {
                    debug!(
                        source = %class,
                        url = %request.url,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn request_counts(&self) -> RequestCounts {
        self.counters.snapshot()
    }
}
