use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces calls to one source at least `interval` apart, across all tasks
/// sharing the limiter.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for the next free slot and claims it.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        // Holding the lock while sleeping queues waiters in arrival order.
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        if let Some(slot) = *next {
            if slot > now {
                tokio::time::sleep_until(slot).await;
            }
        }
        *next = Some(Instant::now() + self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_by_interval() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();
        assert!(stamps[0] - start < Duration::from_millis(500));
        assert!(stamps[2] - start >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = std::time::Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
