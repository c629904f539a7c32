use std::time::Duration;

/// Stream and buffering configuration.
///
/// Defaults to a 30 second keepalive and unbounded pending buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Idle time after which the consumer emits a keepalive frame.
    pub keepalive_interval: Duration,
    /// Cap on events held for a run nobody has subscribed to yet.
    ///
    /// `None` keeps every event. When set, the oldest buffered event is
    /// dropped to make room.
    pub max_buffered_events: Option<usize>,
}

impl StreamConfig {
    pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

    pub fn new(keepalive_interval: Duration, max_buffered_events: Option<usize>) -> Self {
        Self {
            keepalive_interval,
            max_buffered_events,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(Self::DEFAULT_KEEPALIVE_SECS), None)
    }
}
