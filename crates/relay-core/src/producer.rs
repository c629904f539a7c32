//! The `EventProducer` trait -- the contract upstream sources use to emit
//! events for a run.
//!
//! Both the internal HTTP push boundary and the [`LifecycleTracer`] hold an
//! `Arc<dyn EventProducer>`. Alternate sources (a queue consumer, say) only
//! need to call through this trait; delivery logic stays in the registry.
//!
//! [`LifecycleTracer`]: crate::tracer::LifecycleTracer

use std::sync::Arc;

use crate::event::{EventType, Payload};
use crate::registry::ChannelRegistry;

/// Non-blocking, infallible sink for run events.
///
/// # Object Safety
///
/// This trait is object-safe so producers can be shared as
/// `Arc<dyn EventProducer>`.
pub trait EventProducer: Send + Sync {
    /// Emit an event for `run_id`. Always succeeds and never blocks.
    fn push(&self, run_id: &str, event_type: EventType, payload: Payload);

    /// Signal that the stream for `run_id` should end without a frame.
    fn close(&self, run_id: &str);

    /// Emit the terminal `workflow_complete` event for `run_id`.
    fn complete(&self, run_id: &str) {
        self.push(run_id, EventType::WorkflowComplete, Payload::new());
    }
}

// Compile-time assertion: EventProducer must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn EventProducer) {}
};

/// Producer that forwards straight into a [`ChannelRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryProducer {
    registry: Arc<ChannelRegistry>,
}

impl RegistryProducer {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }
}

impl EventProducer for RegistryProducer {
    fn push(&self, run_id: &str, event_type: EventType, payload: Payload) {
        self.registry.push(run_id, event_type, payload);
    }

    fn close(&self, run_id: &str) {
        self.registry.close(run_id);
    }
}
