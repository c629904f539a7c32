//! Stream consumer: drains one subscription into wire frames.
//!
//! The consumer waits for the next delivery with a bounded wait. Events
//! become [`Frame::Event`]; an idle wait becomes [`Frame::Keepalive`]. The
//! stream ends after a `workflow_complete` frame, on the termination marker,
//! or when the caller drops it. The subscription is released on every one of
//! those paths.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, trace};

use crate::channel::{Delivery, Subscription};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::event::Event;
use crate::registry::ChannelRegistry;

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

/// One unit of the text stream sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A domain event: `event: <type>` / `data: <json>`.
    Event { event_type: String, data: String },
    /// Idle comment frame keeping intermediaries from closing the transport.
    Keepalive,
}

impl Frame {
    pub const KEEPALIVE_COMMENT: &str = "keepalive";

    pub fn from_event(event: &Event) -> Self {
        Self::Event {
            event_type: event.event_type.as_str().to_string(),
            data: event.payload_json(),
        }
    }

    /// Render the frame as event-stream text, including the blank line that
    /// terminates it.
    pub fn render(&self) -> String {
        match self {
            Self::Event { event_type, data } => format!("event: {event_type}\ndata: {data}\n\n"),
            Self::Keepalive => format!(": {}\n\n", Self::KEEPALIVE_COMMENT),
        }
    }

    pub fn is_keepalive(&self) -> bool {
        matches!(self, Self::Keepalive)
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Drives one subscription end-to-end.
#[derive(Debug)]
pub struct StreamConsumer {
    subscription: Subscription,
    keepalive_interval: Duration,
}

impl StreamConsumer {
    pub fn new(subscription: Subscription, config: &StreamConfig) -> Self {
        Self {
            subscription,
            keepalive_interval: config.keepalive_interval,
        }
    }

    /// Subscribe to `run_id` and wrap the subscription in a consumer.
    pub fn open(registry: &Arc<ChannelRegistry>, run_id: &str, config: &StreamConfig) -> Result<Self> {
        let subscription = registry.subscribe(run_id)?;
        Ok(Self::new(subscription, config))
    }

    pub fn run_id(&self) -> &str {
        self.subscription.run_id()
    }

    /// Turn the consumer into a stream of frames.
    ///
    /// Dropping the stream early (client disconnect) releases the
    /// subscription just like a graceful end.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        let Self {
            mut subscription,
            keepalive_interval,
        } = self;

        async_stream::stream! {
            loop {
                match subscription.recv_timeout(keepalive_interval).await {
                    Ok(Some(Delivery::Event(event))) => {
                        let terminal = event.is_terminal();
                        yield Frame::from_event(&event);
                        if terminal {
                            info!(run_id = %subscription.run_id(), "workflow complete, ending stream");
                            break;
                        }
                    }
                    Ok(Some(Delivery::Close)) => {
                        info!(run_id = %subscription.run_id(), "close requested, ending stream");
                        break;
                    }
                    Ok(None) => {
                        debug!(run_id = %subscription.run_id(), "channel dropped by registry");
                        break;
                    }
                    Err(_) => {
                        trace!(run_id = %subscription.run_id(), "idle, sending keepalive");
                        yield Frame::Keepalive;
                    }
                }
            }
            subscription.terminate();
        }
    }
}
