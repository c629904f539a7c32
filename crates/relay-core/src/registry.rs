//! Channel registry -- per-run routing of events to a buffer or a live channel.
//!
//! Every run id maps to at most one [`Slot`]: either a pending buffer
//! (events pushed before anyone subscribed) or an active channel. All state
//! transitions happen under a single mutex, so `push` and `subscribe` always
//! observe a consistent snapshot:
//!
//! ```text
//!   (none) --push--> Pending(buf) --subscribe--> Active(tx) --release--> (none)
//!      \___________________subscribe_____________/
//! ```
//!
//! `subscribe` installs the channel and moves the buffer into it inside the
//! same critical section, so no concurrent `push` can land between the two
//! steps and be lost or reordered.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelState, Delivery, Subscription};
use crate::config::StreamConfig;
use crate::error::{RelayError, Result};
use crate::event::{Event, EventType, Payload};

/// Registry entry for one run.
enum Slot {
    Pending(VecDeque<Delivery>),
    Active(ActiveChannel),
}

struct ActiveChannel {
    id: Uuid,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Slot {
    fn state(&self) -> ChannelState {
        match self {
            Self::Pending(_) => ChannelState::Pending,
            Self::Active(_) => ChannelState::Active,
        }
    }
}

/// Counts of registry entries by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending_runs: usize,
    pub active_runs: usize,
}

/// Process-wide map of run id to pending buffer or active channel.
///
/// Construct once and share via `Arc` with every producer and consumer.
pub struct ChannelRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    max_buffered_events: Option<usize>,
}

impl ChannelRegistry {
    /// Create a registry with unbounded pending buffers.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_buffered_events: None,
        }
    }

    pub fn with_config(config: &StreamConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_buffered_events: config.max_buffered_events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // A panic while holding the lock cannot leave a slot half-updated,
        // so a poisoned map is still usable.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept an event for `run_id`. Never blocks and never fails.
    ///
    /// The event goes to the active channel if a subscriber is attached,
    /// otherwise to the run's pending buffer (created on first push).
    pub fn push(&self, run_id: &str, event_type: impl Into<EventType>, payload: Payload) {
        let event = Event::new(event_type, payload);
        debug!(run_id = %run_id, event_type = %event.event_type, "push");
        self.deliver(run_id, Delivery::Event(event));
    }

    /// Queue the termination marker for `run_id`.
    ///
    /// The subscriber's stream ends without a frame once it reaches the
    /// marker. With no subscriber attached the marker is buffered in order.
    pub fn close(&self, run_id: &str) {
        debug!(run_id = %run_id, "close");
        self.deliver(run_id, Delivery::Close);
    }

    fn deliver(&self, run_id: &str, delivery: Delivery) {
        let mut slots = self.lock();
        match slots.get_mut(run_id) {
            Some(Slot::Active(channel)) => {
                if let Err(mpsc::error::SendError(delivery)) = channel.tx.send(delivery) {
                    // Receiver closed without releasing; the run is effectively
                    // unsubscribed, so start over with a fresh buffer.
                    debug!(run_id = %run_id, "active channel closed, buffering");
                    slots.insert(run_id.to_string(), Slot::Pending(VecDeque::from([delivery])));
                }
            }
            Some(Slot::Pending(buffer)) => {
                if let Some(max) = self.max_buffered_events {
                    let max = max.max(1);
                    while buffer.len() >= max {
                        buffer.pop_front();
                        warn!(run_id = %run_id, max, "pending buffer full, dropped oldest event");
                    }
                }
                buffer.push_back(delivery);
            }
            None => {
                slots.insert(run_id.to_string(), Slot::Pending(VecDeque::from([delivery])));
            }
        }
    }

    /// Attach the single subscriber for `run_id`.
    ///
    /// Any pending buffer is moved, in order, to the front of the new
    /// channel. Fails with [`RelayError::AlreadySubscribed`] if the run
    /// already has an active subscriber.
    pub fn subscribe(self: &Arc<Self>, run_id: &str) -> Result<Subscription> {
        let mut slots = self.lock();

        if let Some(Slot::Active(_)) = slots.get(run_id) {
            warn!(run_id = %run_id, "rejecting second subscriber");
            return Err(RelayError::AlreadySubscribed {
                run_id: run_id.to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let buffered = match slots.remove(run_id) {
            Some(Slot::Pending(buffer)) => buffer,
            _ => VecDeque::new(),
        };
        let drained = buffered.len();
        for delivery in buffered {
            // `rx` is alive in this scope, so the send cannot fail.
            let _ = tx.send(delivery);
        }

        let id = Uuid::new_v4();
        slots.insert(run_id.to_string(), Slot::Active(ActiveChannel { id, tx }));
        drop(slots);

        info!(run_id = %run_id, subscription_id = %id, drained, "subscriber attached");
        Ok(Subscription::new(run_id.to_string(), id, rx, Arc::clone(self)))
    }

    /// Remove whatever the registry holds for `run_id`.
    ///
    /// Returns `true` if an entry existed.
    pub fn unsubscribe(&self, run_id: &str) -> bool {
        let removed = self.lock().remove(run_id).is_some();
        if removed {
            info!(run_id = %run_id, "run unsubscribed");
        }
        removed
    }

    /// Release the channel owned by subscription `id`.
    ///
    /// A stale subscription never removes a newer subscriber's channel or a
    /// buffer started after it ended.
    pub(crate) fn release(&self, run_id: &str, id: Uuid) {
        let mut slots = self.lock();
        let owned = matches!(slots.get(run_id), Some(Slot::Active(ch)) if ch.id == id);
        if owned {
            slots.remove(run_id);
            drop(slots);
            info!(run_id = %run_id, subscription_id = %id, "subscriber released");
        }
    }

    /// Current state of `run_id`, or `None` if the registry holds nothing.
    pub fn state(&self, run_id: &str) -> Option<ChannelState> {
        self.lock().get(run_id).map(Slot::state)
    }

    /// Number of deliveries waiting in the pending buffer for `run_id`.
    ///
    /// Zero when the run is active or unknown.
    pub fn buffered_len(&self, run_id: &str) -> usize {
        match self.lock().get(run_id) {
            Some(Slot::Pending(buffer)) => buffer.len(),
            _ => 0,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let slots = self.lock();
        let mut stats = RegistryStats::default();
        for slot in slots.values() {
            match slot {
                Slot::Pending(_) => stats.pending_runs += 1,
                Slot::Active(_) => stats.active_runs += 1,
            }
        }
        stats
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("stats", &self.stats())
            .field("max_buffered_events", &self.max_buffered_events)
            .finish()
    }
}
