//! Per-source request throttling (made by FontLab https://www.fontlab.com/)
//!
//! Every upstream call passes through [`RateLimiter::acquire`]. Each resource
//! class owns an independent bucket: a GCRA schedule (sustained rate plus a burst
//! tolerance) capped by a one-second sliding window, so no class is ever admitted
//! more often than its configured rate within any second.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};

use crate::config::{SourcePolicies, SourcePolicy};

const WINDOW: Duration = Duration::from_secs(1);

/// Accepted range for `SourcePolicy::per_second`.
pub const MIN_RATE_PER_SECOND: f64 = 0.001;
pub const MAX_RATE_PER_SECOND: f64 = 10_000.0;

/// The three upstream sources the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    Directory,
    Metadata,
    Variants,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::Directory,
        ResourceClass::Metadata,
        ResourceClass::Variants,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Directory => "directory",
            ResourceClass::Metadata => "metadata",
            ResourceClass::Variants => "variants",
        }
    }

    fn index(self) -> usize {
        match self {
            ResourceClass::Directory => 0,
            ResourceClass::Metadata => 1,
            ResourceClass::Variants => 2,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of waiting for a token.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// No token could be reserved within the limiter's maximum wait.
    Abandoned,
}

#[derive(Debug)]
struct Bucket {
    /// `None` means the class is unlimited.
    interval: Option<Duration>,
    tolerance: Duration,
    window_cap: usize,
    tat: Option<Instant>,
    recent: VecDeque<Instant>,
}

impl Bucket {
    fn new(policy: &SourcePolicy) -> Self {
        let rate = policy
            .per_second
            .filter(|rate| rate.is_finite() && *rate > 0.0);

        match rate {
            None => Self {
                interval: None,
                tolerance: Duration::ZERO,
                window_cap: usize::MAX,
                tat: None,
                recent: VecDeque::new(),
            },
            Some(rate) => {
                let rate = rate.clamp(MIN_RATE_PER_SECOND, MAX_RATE_PER_SECOND);
                let interval = Duration::from_secs_f64(1.0 / rate);
                let window_cap = (rate.floor() as usize).max(1);
                let burst = (policy.burst.max(1) as usize).min(window_cap);
                Self {
                    interval: Some(interval),
                    tolerance: interval * (burst as u32 - 1),
                    window_cap,
                    tat: None,
                    recent: VecDeque::with_capacity(window_cap),
                }
            }
        }
    }

    /// Reserve the earliest admissible instant at or after `now`.
    ///
    /// Returns `None` without consuming anything when that instant lies past `latest`.
    fn reserve(&mut self, now: Instant, latest: Instant) -> Option<Instant> {
        let Some(interval) = self.interval else {
            return Some(now);
        };

        let mut slot = match self.tat {
            Some(tat) => tat
                .checked_sub(self.tolerance)
                .map_or(now, |earliest| earliest.max(now)),
            None => now,
        };

        while let Some(front) = self.recent.front() {
            if *front + WINDOW <= slot {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.window_cap {
            let pivot = self.recent[self.recent.len() - self.window_cap];
            slot = slot.max(pivot + WINDOW);
        }

        if slot > latest {
            return None;
        }

        self.recent.push_back(slot);
        while self.recent.len() > self.window_cap {
            self.recent.pop_front();
        }
        let base = self.tat.map_or(slot, |tat| tat.max(slot));
        self.tat = Some(base + interval);
        Some(slot)
    }
}

/// Token-bucket throttle shared by every worker in a run.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: [Mutex<Bucket>; 3],
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(policies: &SourcePolicies, max_wait: Duration) -> Self {
        Self {
            buckets: ResourceClass::ALL.map(|class| Mutex::new(Bucket::new(policies.get(class)))),
            max_wait,
        }
    }

    /// Suspend until a token for `class` is available.
    ///
    /// Never fails; gives up with [`Admission::Abandoned`] when the reserved slot
    /// would exceed the configured maximum wait.
    pub async fn acquire(&self, class: ResourceClass) -> Admission {
        let now = Instant::now();
        let latest = now + self.max_wait;
        let slot = {
            let mut bucket = self.buckets[class.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            bucket.reserve(now, latest)
        };

        match slot {
            Some(at) => {
                if at > now {
                    tracing::trace!(source = %class, wait_ms = (at - now).as_millis() as u64, "throttled");
                    sleep_until(at).await;
                }
                Admission::Granted
            }
            None => {
                tracing::debug!(source = %class, "rate-limit wait exceeds maximum; abandoning");
                Admission::Abandoned
            }
        }
    }
}
