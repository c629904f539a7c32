//! Per-run delivery channel and the subscriber-side handle.
//!
//! A run's queue starts life as a pending buffer inside the
//! [`ChannelRegistry`](crate::registry::ChannelRegistry). Subscribing turns it
//! into an active channel whose receiving end is a [`Subscription`]. Dropping
//! or terminating the subscription releases the registry entry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use uuid::Uuid;

use crate::event::Event;
use crate::registry::ChannelRegistry;

/// One item queued for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A domain event to forward to the subscriber.
    Event(Event),
    /// Termination marker: the stream ends without emitting a frame.
    Close,
}

/// Lifecycle state of a run's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Events are accumulating with no subscriber attached.
    Pending,
    /// A subscriber is attached and receives events as they arrive.
    Active,
    /// The subscriber has detached; the registry entry is gone.
    Terminated,
}

/// Receiving end of an active channel.
///
/// Exactly one exists per run at a time. The registry entry is released
/// once, either by [`Subscription::terminate`] or on drop.
pub struct Subscription {
    run_id: String,
    id: Uuid,
    rx: mpsc::UnboundedReceiver<Delivery>,
    registry: Arc<ChannelRegistry>,
    terminated: bool,
}

impl Subscription {
    pub(crate) fn new(
        run_id: String,
        id: Uuid,
        rx: mpsc::UnboundedReceiver<Delivery>,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            run_id,
            id,
            rx,
            registry,
            terminated: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Unique id of this subscription, distinct across resubscriptions.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        if self.terminated {
            ChannelState::Terminated
        } else {
            ChannelState::Active
        }
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once terminated or if the registry dropped the channel.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.terminated {
            return None;
        }
        self.rx.recv().await
    }

    /// Wait for the next delivery for at most `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<Delivery>, Elapsed> {
        tokio::time::timeout(wait, self.recv()).await
    }

    /// Release the registry entry for this run. Idempotent.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.registry.release(&self.run_id, self.id);
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("run_id", &self.run_id)
            .field("id", &self.id)
            .field("terminated", &self.terminated)
            .finish()
    }
}
