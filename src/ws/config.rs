#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_MISSED_HEARTBEATS: u32 = 2;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a feed connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between `ping` probes while connected
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered probes that force a reconnect
    pub missed_heartbeats: u32,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Snapshot request types (e.g. `get_status`) sent after every successful open
    pub snapshot_requests: Vec<String>,
    /// Capacity of the connection event broadcast channel
    pub event_capacity: usize,
    /// After an `auto` connection fell back to the mock path, try the live path again
    /// on each reconnect
    pub reprobe_live_on_reconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            missed_heartbeats: DEFAULT_MISSED_HEARTBEATS,
            reconnect: ReconnectConfig::default(),
            snapshot_requests: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reprobe_live_on_reconnect: false,
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failures before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Ceiling for any single delay
    pub max_backoff: Duration,
    /// Growth factor applied per attempt. Values below `1.0` are treated as `1.0`.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before retry number `attempt` (zero-based):
    /// `min(initial_backoff * multiplier^attempt, max_backoff)`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether another attempt is allowed after `attempt` consecutive failures.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Attempt counter over a [`ReconnectConfig`].
///
/// The connection loop owns one policy per `connect` lifetime. Failures advance the
/// counter; a successful open resets it.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failures recorded since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failed open or an abnormal closure.
    ///
    /// Returns the delay before the next attempt, or `None` once the policy is exhausted.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        self.config
            .should_retry(self.attempt)
            .then(|| self.config.next_delay(self.attempt - 1))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
