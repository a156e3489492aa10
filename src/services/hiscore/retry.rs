use rand::Rng;
use std::time::Duration;

/// Retry configuration for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows failed attempt number `attempt` (0-based).
    /// Formula: delay = min(base_delay × multiplier^attempt × (1 ± jitter), max_delay)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponential = base * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);

        let jitter = if self.jitter_factor > 0.0 {
            let mut rng = rand::rng();
            1.0 + (rng.random::<f64>() * 2.0 - 1.0) * self.jitter_factor
        } else {
            1.0
        };

        let capped = (exponential * jitter).min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}

/// Backoff delays between consecutive attempts, for logging and tests
pub fn calculate_retry_schedule(config: &RetryConfig) -> Vec<Duration> {
    (0..config.max_attempts.saturating_sub(1))
        .map(|attempt| config.calculate_delay(attempt))
        .collect()
}
