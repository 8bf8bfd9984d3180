//! Per-host request pacing.
//!
//! Every request to a host waits until `base_delay + jitter` has passed since
//! the previous request to the same host returned from [`RateLimiter::acquire`].
//! Hosts are tracked independently so unrelated hosts never wait on each
//! other, and each host has its own async mutex so two tasks can never read
//! and advance the same host's schedule at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

type HostSlot = Arc<tokio::sync::Mutex<Option<Instant>>>;

pub struct RateLimiter {
    base_delay: Duration,
    jitter: Duration,
    hosts: Mutex<HashMap<String, HostSlot>>,
}

impl RateLimiter {
    pub fn new(base_delay: Duration, jitter: Duration) -> Self {
        Self {
            base_delay,
            jitter,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Waits until a request to `host` is allowed and records it as sent.
    pub async fn acquire(&self, host: &str) {
        let slot = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(hosts.entry(host.to_string()).or_default())
        };

        // Held across the sleep: the next task for this host queues here.
        let mut last_request = slot.lock().await;
        if let Some(previous) = *last_request {
            let ready_at = previous + self.base_delay + self.sample_jitter();
            if ready_at > Instant::now() {
                tracing::debug!(
                    host,
                    wait_ms = u64::try_from((ready_at - Instant::now()).as_millis()).unwrap_or(u64::MAX),
                    "pacing request"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_host_requests_respect_base_delay() {
        let limiter = RateLimiter::new(Duration::from_millis(40), Duration::from_millis(10));
        let mut stamps = Vec::new();
        for _ in 0..4 {
            limiter.acquire("ereklamblad.se").await;
            stamps.push(Instant::now());
        }
        let min_gap = stamps
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .min()
            .unwrap();
        assert!(
            min_gap >= Duration::from_millis(40),
            "observed gap {min_gap:?} below base delay"
        );
    }

    #[tokio::test]
    async fn concurrent_tasks_on_one_host_are_serialised() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(30), Duration::ZERO));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire("coop.se").await;
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(30));
        }
    }

    #[tokio::test]
    async fn different_hosts_do_not_wait_on_each_other() {
        let limiter = RateLimiter::new(Duration::from_millis(500), Duration::ZERO);
        limiter.acquire("a.example").await;
        let start = Instant::now();
        limiter.acquire("b.example").await;
        assert!(start.elapsed() < Duration::from_millis(250));
    }
}
