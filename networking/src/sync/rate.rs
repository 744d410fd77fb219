use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::sync::config::DEFAULT_BLOCKS_PER_REQUEST;

/// Sliding-window event counter for observed block throughput.
pub struct RateCounter {
    window: Duration,
    samples: VecDeque<Instant>,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn incr(&mut self) {
        self.evict(Instant::now());
        self.samples.push_back(Instant::now());
    }

    /// Events per second over the window.
    pub fn rate(&mut self) -> f64 {
        self.evict(Instant::now());
        self.samples.len() as f64 / self.window.as_secs_f64()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.samples.front() {
            if now.duration_since(oldest) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Decides how many blocks to ask a peer for, given observed throughput.
/// Injected so the sizing policy can be replaced without touching the
/// fetcher.
pub trait ThroughputStrategy: Send + Sync {
    fn blocks_per_request(&self, observed_rate: f64, half_rtt: Duration) -> u64;
}

/// Sizes requests to roughly one half-round-trip of blocks at the observed
/// processing rate, clamped to a fixed band.
pub struct DefaultThroughput {
    pub min: u64,
    pub max: u64,
}

impl Default for DefaultThroughput {
    fn default() -> Self {
        Self {
            min: 8,
            max: DEFAULT_BLOCKS_PER_REQUEST,
        }
    }
}

impl ThroughputStrategy for DefaultThroughput {
    fn blocks_per_request(&self, observed_rate: f64, half_rtt: Duration) -> u64 {
        let wanted = (observed_rate * half_rtt.as_secs_f64()).ceil() as u64;
        wanted.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counter_window_evicts_old_samples() {
        let mut counter = RateCounter::new(Duration::from_secs(20));
        for _ in 0..40 {
            counter.incr();
        }
        assert_eq!(counter.rate(), 2.0);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(counter.rate(), 0.0);
    }

    #[test]
    fn test_default_throughput_clamps() {
        let strategy = DefaultThroughput::default();
        let half_rtt = Duration::from_millis(500);
        // Slow chain: floor applies.
        assert_eq!(strategy.blocks_per_request(1.0, half_rtt), 8);
        // Mid range scales with rate.
        assert_eq!(strategy.blocks_per_request(40.0, half_rtt), 20);
        // Fast chain: ceiling applies.
        assert_eq!(strategy.blocks_per_request(1000.0, half_rtt), 64);
    }
}
