//! Reconnect policy for the signaling transport.
//!
//! A message that cannot be sent because the transport is down triggers a connect
//! attempt and is retried once after the delay chosen here. The signaling client only
//! sees the [`ReconnectPolicy`] trait, so the fixed one-second retry can be swapped for
//! capped exponential backoff without touching the negotiation logic.

use rand::Rng;
use std::time::Duration;

use crate::signaling::ConnectionState;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay for every attempt.
    #[default]
    Fixed,
    /// Doubling delay capped at `max_delay`, with up to 20% random jitter.
    Exponential,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub retry_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl ReconnectConfig {
    pub fn build_policy(&self) -> Box<dyn ReconnectPolicy> {
        match self.strategy {
            BackoffStrategy::Fixed => Box::new(FixedRetry::new(self.retry_delay)),
            BackoffStrategy::Exponential => {
                Box::new(ExponentialBackoff::new(self.retry_delay, self.max_delay))
            }
        }
    }
}

/// Bookkeeping for connect attempts made on behalf of pending sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    /// Connect attempts since the last successful open.
    pub attempt: u32,
    pub next_delay: Duration,
    pub last_transport_state: ConnectionState,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self {
            attempt: 0,
            next_delay: DEFAULT_RETRY_DELAY,
            last_transport_state: ConnectionState::Disconnected,
        }
    }
}

impl ReconnectState {
    pub(crate) fn record_attempt(&mut self, delay: Duration) {
        self.attempt += 1;
        self.next_delay = delay;
    }

    pub(crate) fn observe(&mut self, state: ConnectionState) {
        self.last_transport_state = state;
        if state == ConnectionState::Connected {
            self.attempt = 0;
        }
    }
}

pub trait ReconnectPolicy: Send {
    /// Delay before the single deferred retry of a send, given the attempts made so far.
    fn retry_delay(&mut self, state: &ReconnectState) -> Duration;
}

#[derive(Debug, Clone)]
pub struct FixedRetry {
    delay: Duration,
}

impl FixedRetry {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl ReconnectPolicy for FixedRetry {
    fn retry_delay(&mut self, _state: &ReconnectState) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    const JITTER_FRACTION: f64 = 0.2;

    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    fn capped(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn retry_delay(&mut self, state: &ReconnectState) -> Duration {
        let delay = self.capped(state.attempt);
        let jitter_ms = (delay.as_millis() as f64 * Self::JITTER_FRACTION) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        (delay + jitter).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(attempt: u32) -> ReconnectState {
        ReconnectState {
            attempt,
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_retry_ignores_attempts() {
        let mut policy = FixedRetry::default();
        assert_eq!(policy.retry_delay(&state_at(0)), Duration::from_secs(1));
        assert_eq!(policy.retry_delay(&state_at(7)), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(10));

        let first = policy.retry_delay(&state_at(0));
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(600));

        let third = policy.retry_delay(&state_at(2));
        assert!(third >= Duration::from_secs(2) && third <= Duration::from_millis(2400));

        for attempt in [5, 10, 40, u32::MAX] {
            assert!(policy.retry_delay(&state_at(attempt)) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_state_resets_on_connect() {
        let mut state = ReconnectState::default();
        state.record_attempt(Duration::from_secs(1));
        state.record_attempt(Duration::from_secs(2));
        assert_eq!(state.attempt, 2);
        assert_eq!(state.next_delay, Duration::from_secs(2));

        state.observe(ConnectionState::Connecting);
        assert_eq!(state.attempt, 2);

        state.observe(ConnectionState::Connected);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.last_transport_state, ConnectionState::Connected);
    }

    #[test]
    fn test_config_builds_matching_policy() {
        let config = ReconnectConfig {
            retry_delay: Duration::from_millis(250),
            ..Default::default()
        };
        let mut policy = config.build_policy();
        assert_eq!(policy.retry_delay(&state_at(3)), Duration::from_millis(250));
    }
}
