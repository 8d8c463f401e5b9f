//! Process-wide configuration consumed by the trigger coordinator.

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of time for throttle windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Used to drive throttle windows in tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Compares two built states; `true` means equal.
pub type EqualityComparator = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Coordinator configuration.
#[derive(Clone)]
pub struct Options {
    /// Throttle applied to stores that don't set their own.
    /// Default: 0 (flush immediately)
    pub default_throttle_ms: u64,

    /// Enables the extra development-time checks and warnings.
    /// Default: on in debug builds
    pub development_mode: bool,

    /// Decides whether a rebuilt observer state differs from the previous one.
    pub equality_comparator: EqualityComparator,

    /// Time source for throttle deadlines.
    pub clock: Arc<dyn Clock>,
}

impl Options {
    pub fn with_default_throttle_ms(mut self, ms: u64) -> Self {
        self.default_throttle_ms = ms;
        self
    }

    pub fn with_development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    pub fn with_equality_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.equality_comparator = Arc::new(comparator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_throttle_ms: 0,
            development_mode: cfg!(debug_assertions),
            equality_comparator: Arc::new(|a: &Value, b: &Value| a == b),
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("default_throttle_ms", &self.default_throttle_ms)
            .field("development_mode", &self.development_mode)
            .finish_non_exhaustive()
    }
}
