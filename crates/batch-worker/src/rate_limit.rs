use batch_worker_core::{Result, WorkerError};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use prometheus::Histogram;
use std::num::NonZeroU32;
use std::time::Instant;

/// Process-wide admission gate for execution starts.
///
/// A token bucket refilled continuously at the configured rate with room for
/// a single token: callers beyond the budget wait, nobody is turned away.
pub struct ExecutionRateLimiter {
    limiter: DefaultDirectRateLimiter,
    per_second: NonZeroU32,
    wait: Option<Histogram>,
}

impl ExecutionRateLimiter {
    pub fn per_second(rate: u32) -> Result<Self> {
        let per_second = NonZeroU32::new(rate).ok_or_else(|| {
            WorkerError::configuration("max_activities_per_second must be greater than zero")
        })?;

        let quota = Quota::per_second(per_second).allow_burst(NonZeroU32::MIN);
        Ok(ExecutionRateLimiter {
            limiter: RateLimiter::direct(quota),
            per_second,
            wait: None,
        })
    }

    /// Record admission waits into `histogram`.
    pub fn with_wait_histogram(mut self, histogram: Histogram) -> Self {
        self.wait = Some(histogram);
        self
    }

    /// Wait until one execution may start.
    pub async fn admit(&self) {
        let started = Instant::now();
        self.limiter.until_ready().await;
        if let Some(wait) = &self.wait {
            wait.observe(started.elapsed().as_secs_f64());
        }
    }

    pub fn rate(&self) -> u32 {
        self.per_second.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            ExecutionRateLimiter::per_second(0),
            Err(WorkerError::Configuration(_))
        ));
    }

    #[test]
    fn test_burst_of_one() {
        let limiter = ExecutionRateLimiter::per_second(10).unwrap();
        assert!(limiter.limiter.check().is_ok());
        assert!(limiter.limiter.check().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_budget_across_tasks() {
        let limiter = Arc::new(ExecutionRateLimiter::per_second(50).unwrap());
        let started = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        limiter.admit().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // 40 admissions at 50/s: the first is free, the other 39 are spaced 20ms apart.
        assert!(started.elapsed() >= Duration::from_millis(740));
    }
}
