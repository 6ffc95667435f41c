//! Reconnect policy with normally-jittered exponential back-off.

use std::time::Duration;

use lu_domain::config::ReconnectConfig;
use rand_distr::{Distribution, Normal};
use tokio_util::sync::CancellationToken;

/// Tracks the back-off state between connection attempts.
///
/// Each retry grows the delay by `factor` (capped at `max_delay`) and then
/// draws the actual wait from a normal distribution centred on it with a
/// standard deviation of `delay * jitter`.
#[derive(Debug)]
pub struct Reconnector {
    config: ReconnectConfig,
    delay: f64,
    retries: u32,
    stopped: CancellationToken,
}

impl Reconnector {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay_ms as f64 / 1000.0;
        Self {
            config,
            delay,
            retries: 0,
            stopped: CancellationToken::new(),
        }
    }

    /// Consecutive retries since the last [`reset_delay`](Self::reset_delay).
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Forget previous failures, typically after a successful registration.
    pub fn reset_delay(&mut self) {
        self.delay = self.config.initial_delay_ms as f64 / 1000.0;
        self.retries = 0;
    }

    /// Cancel a pending retry and refuse further ones.
    pub fn stop_trying(&self) {
        self.stopped.cancel();
    }

    /// Token cancelled by [`stop_trying`](Self::stop_trying); can be handed
    /// to other tasks.
    pub fn stop_token(&self) -> CancellationToken {
        self.stopped.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Advance the policy and return the next wait, or `None` once stopped
    /// or past `max_retries`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_stopped() {
            return None;
        }
        self.retries += 1;
        if let Some(max) = self.config.max_retries {
            if self.retries > max {
                tracing::warn!(retries = max, "abandoning reconnection");
                return None;
            }
        }
        self.delay = (self.delay * self.config.factor).min(self.config.max_delay_secs as f64);
        let jittered = if self.config.jitter > 0.0 {
            normal(self.delay, self.delay * self.config.jitter)
        } else {
            self.delay
        };
        Some(Duration::from_secs_f64(jittered.max(0.0)))
    }

    /// Sleep for the next delay.  Returns `false` if reconnection was
    /// abandoned or stopped while waiting.
    pub async fn wait(&mut self) -> bool {
        let Some(delay) = self.next_delay() else {
            return false;
        };
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.retries,
            "reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.stopped.cancelled() => false,
        }
    }
}

/// One sample from N(mean, stdev); `mean` itself if `stdev` is not a valid
/// deviation.
fn normal(mean: f64, stdev: f64) -> f64 {
    Normal::new(mean, stdev)
        .map(|n| n.sample(&mut rand::thread_rng()))
        .unwrap_or(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_secs: 10,
            factor: 2.0,
            jitter: 0.0,
            max_retries: None,
        }
    }

    #[test]
    fn delay_grows_then_caps() {
        let mut r = Reconnector::new(no_jitter());
        let delays: Vec<u64> = (0..5)
            .map(|_| r.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
        assert_eq!(r.retries(), 5);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut r = Reconnector::new(no_jitter());
        r.next_delay();
        r.next_delay();
        r.reset_delay();
        assert_eq!(r.retries(), 0);
        assert_eq!(r.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn max_retries_abandons() {
        let mut r = Reconnector::new(ReconnectConfig {
            max_retries: Some(2),
            ..no_jitter()
        });
        assert!(r.next_delay().is_some());
        assert!(r.next_delay().is_some());
        assert!(r.next_delay().is_none());
    }

    #[test]
    fn stop_trying_refuses_retries() {
        let mut r = Reconnector::new(no_jitter());
        r.stop_trying();
        assert!(r.is_stopped());
        assert!(r.next_delay().is_none());
    }

    #[tokio::test]
    async fn stop_interrupts_a_pending_wait() {
        let mut r = Reconnector::new(ReconnectConfig {
            initial_delay_ms: 60_000,
            ..no_jitter()
        });
        let token = r.stop_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        assert!(!r.wait().await);
    }

    #[test]
    fn jitter_stays_near_the_mean() {
        let mut r = Reconnector::new(ReconnectConfig::default());
        // e * 1s with ~12% stdev; 10 sigma either side is still positive
        let d = r.next_delay().unwrap().as_secs_f64();
        assert!(d > 0.0 && d < 6.0, "delay {d}");
    }

    #[test]
    fn samples_centre_on_the_mean() {
        let n = 4000;
        let mean = (0..n).map(|_| normal(5.0, 1.0)).sum::<f64>() / n as f64;
        assert!((mean - 5.0).abs() < 0.2, "sample mean {mean}");
        assert_eq!(normal(3.0, 0.0), 3.0);
        assert_eq!(normal(3.0, f64::NAN), 3.0);
    }

    #[test]
    fn node_defaults_cap_at_ten_seconds() {
        let mut r = Reconnector::new(ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::for_nodes()
        });
        let last = (0..20).filter_map(|_| r.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_secs(10));
    }
}
