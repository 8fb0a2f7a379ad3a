use std::time::Duration;

use crate::config::TransportConfig;

/// Share of the delay added as random jitter.
const JITTER_RATIO: f64 = 0.2;

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failures before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            base: Duration::from_millis(config.reconnect_base_ms),
            max: Duration::from_millis(config.reconnect_max_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base.as_millis() as f64;
        let exp = 2.0_f64.powi(attempt.saturating_sub(1).min(10) as i32);
        let delay = (base * exp) as u64;

        let jitter = (delay as f64 * JITTER_RATIO * rand::random::<f64>()) as u64;

        Duration::from_millis(delay.saturating_add(jitter)).min(self.max)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(500),
            max: Duration::from_millis(30_000),
            max_attempts: 3,
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = policy();
        let first = policy.delay(1);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(600));

        let third = policy.delay(3);
        assert!(third >= Duration::from_millis(2000) && third <= Duration::from_millis(2400));

        assert_eq!(policy.delay(20), Duration::from_millis(30_000));
    }

    #[test]
    fn oversized_base_saturates_to_max() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(u64::MAX),
            max: Duration::from_secs(60),
            max_attempts: 0,
        };
        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(11), Duration::from_secs(60));
    }

    #[test]
    fn attempts_are_bounded_unless_unlimited() {
        let policy = policy();
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));

        let unlimited = ReconnectPolicy {
            max_attempts: 0,
            ..policy
        };
        assert!(!unlimited.exhausted(u32::MAX));
    }
}
