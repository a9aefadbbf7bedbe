use std::time::Duration;

/// Default time a stream outlives its last subscriber.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Configuration for stream lifecycles.
#[derive(Debug, Clone)]
pub struct StreamsConfig {
    /// How long a stream with no subscribers is kept before teardown.
    ///
    /// Resubscribing within this window reuses the cached value without a
    /// new fetch.
    pub grace_period: Duration,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl StreamsConfig {
    /// Read `CIVIC_STREAM_GRACE_MS`, falling back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("CIVIC_STREAM_GRACE_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(|ms| Self::default().with_grace_period(Duration::from_millis(ms)))
            .unwrap_or_default()
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}
