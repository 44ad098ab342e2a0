//! Connection state and reconnect policy.

use std::fmt;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Lower bound for the interval between reconnect attempts.
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(10);

/// Lower bound for the per-attempt connection timeout.
pub const MIN_CONNECTION_TIMEOUT: Duration = Duration::from_millis(10);

/// Default health monitor period.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// First connection in progress.
    Connecting,
    Connected,
    /// Recovering from a lost connection.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Wait strategy between failed attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backoff {
    /// Wait the policy interval every time.
    #[default]
    Fixed,
    /// Start at the policy interval and double up to `max_interval`, with
    /// jitter.
    Exponential { max_interval: Duration },
}

/// Reconnect configuration.
///
/// Interval and timeout are clamped to positive floors on assignment, so a
/// policy value can never produce a busy loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    enabled: bool,
    max_attempts: u32,
    interval: Duration,
    timeout: Duration,
    backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(enabled: bool, max_attempts: u32, interval: Duration, timeout: Duration) -> Self {
        let mut policy = Self {
            enabled,
            max_attempts,
            ..Self::default()
        };
        policy.set_interval(interval);
        policy.set_timeout(timeout);
        policy
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.set_backoff(backoff);
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Attempts per cycle; 0 retries forever.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(MIN_RECONNECT_INTERVAL);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout.max(MIN_CONNECTION_TIMEOUT);
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn set_backoff(&mut self, backoff: Backoff) {
        self.backoff = match backoff {
            Backoff::Fixed => Backoff::Fixed,
            Backoff::Exponential { max_interval } => Backoff::Exponential {
                max_interval: max_interval.max(MIN_RECONNECT_INTERVAL),
            },
        };
    }

    /// Whether another attempt may follow attempt number `attempt`.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Delay schedule for one reconnect cycle.
    pub fn delays(&self) -> RetryDelays {
        match self.backoff {
            Backoff::Fixed => RetryDelays::Fixed(self.interval),
            Backoff::Exponential { max_interval } => {
                let max_interval = max_interval.max(self.interval);
                let schedule = ExponentialBuilder::default()
                    .with_min_delay(self.interval)
                    .with_max_delay(max_interval)
                    .with_jitter()
                    .build();
                RetryDelays::Exponential {
                    schedule,
                    max_interval,
                }
            }
        }
    }
}

/// Per-cycle iterator over waits between attempts.
pub enum RetryDelays {
    Fixed(Duration),
    Exponential {
        schedule: backon::ExponentialBackoff,
        max_interval: Duration,
    },
}

impl RetryDelays {
    pub fn next_delay(&mut self) -> Duration {
        match self {
            RetryDelays::Fixed(interval) => *interval,
            // Builder stops yielding after its retry cap; hold at the ceiling
            RetryDelays::Exponential {
                schedule,
                max_interval,
            } => schedule.next().unwrap_or(*max_interval),
        }
    }
}
