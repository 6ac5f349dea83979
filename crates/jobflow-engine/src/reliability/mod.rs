//! Retry policy for the orchestrator's `on_error = retry` step policy
//! (§4.8 Error policy).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with jitter, capped at `max_interval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Jitter fraction applied to each computed delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before `attempt` (1-based). `delay_for_attempt(1)` is the
    /// delay before the *second* try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_coefficient
            .powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_interval.as_secs_f64() * exp;
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
            (capped * factor).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));

        let capped = RetryPolicy {
            jitter: 0.0,
            max_interval: Duration::from_millis(1200),
            ..RetryPolicy::exponential()
        };
        assert_eq!(capped.delay_for_attempt(3), Duration::from_millis(1200));
    }

    #[test]
    fn no_retry_has_one_attempt() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(0));
    }

    #[test]
    fn fixed_interval_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 5);
        assert_eq!(policy.delay_for_attempt(1), policy.delay_for_attempt(4));
    }
}
