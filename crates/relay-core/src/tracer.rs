//! Lifecycle tracer: turns node start / end / error notifications from the
//! execution engine into `node_update` events.
//!
//! One tracer instance tracks one run and a single "current node" slot, so it
//! assumes nodes run one after another. Nested or overlapping nodes need one
//! tracer per node.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::event::{EventType, NodeStatus, NodeUpdate, Payload};
use crate::producer::EventProducer;

/// Identity and metadata of a node as reported by the execution engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub metadata: Payload,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: Payload::new(),
        }
    }

    pub fn with_metadata(name: impl Into<String>, metadata: Payload) -> Self {
        Self {
            name: name.into(),
            metadata,
        }
    }
}

/// Hooks the execution engine calls around each node.
pub trait NodeLifecycle: Send + Sync {
    fn on_start(&self, node: &NodeInfo);

    /// `output` is the node's result; only its `Display` rendering is used.
    fn on_end(&self, node: &NodeInfo, output: &dyn fmt::Display);

    fn on_error(&self, node: &NodeInfo, error: &dyn fmt::Display);
}

/// [`NodeLifecycle`] adapter that forwards updates through an
/// [`EventProducer`].
pub struct LifecycleTracer {
    run_id: String,
    producer: Arc<dyn EventProducer>,
    current: Mutex<Option<String>>,
}

impl LifecycleTracer {
    pub fn new(run_id: impl Into<String>, producer: Arc<dyn EventProducer>) -> Self {
        Self {
            run_id: run_id.into(),
            producer,
            current: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Name of the node currently executing, if any.
    pub fn current_node(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Emit `workflow_complete`, ending the run's stream.
    pub fn complete(&self) {
        self.producer.complete(&self.run_id);
    }

    fn emit(&self, update: NodeUpdate) {
        self.producer
            .push(&self.run_id, EventType::NodeUpdate, update.into_payload());
    }

    /// Clear the tracked node and emit a final update for it.
    fn finish(&self, status: NodeStatus, rendered: String) {
        let tracked = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tracked {
            Some(name) => self.emit(NodeUpdate::new(name, status, Some(rendered))),
            None => debug!(run_id = %self.run_id, %status, "no tracked node, ignoring"),
        }
    }
}

impl NodeLifecycle for LifecycleTracer {
    fn on_start(&self, node: &NodeInfo) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(node.name.clone());
        self.emit(NodeUpdate::new(node.name.clone(), NodeStatus::Running, None));
    }

    fn on_end(&self, _node: &NodeInfo, output: &dyn fmt::Display) {
        self.finish(NodeStatus::Completed, output.to_string());
    }

    fn on_error(&self, _node: &NodeInfo, error: &dyn fmt::Display) {
        self.finish(NodeStatus::Failed, error.to_string());
    }
}

impl fmt::Debug for LifecycleTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTracer")
            .field("run_id", &self.run_id)
            .field("current", &self.current_node())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MAX_OUTPUT_CHARS;

    /// Producer that records every push.
    #[derive(Default)]
    struct RecordingProducer {
        pushed: Mutex<Vec<(String, EventType, Payload)>>,
    }

    impl RecordingProducer {
        fn updates(&self) -> Vec<(EventType, Payload)> {
            self.pushed
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t, p)| (t.clone(), p.clone()))
                .collect()
        }
    }

    impl EventProducer for RecordingProducer {
        fn push(&self, run_id: &str, event_type: EventType, payload: Payload) {
            self.pushed
                .lock()
                .unwrap()
                .push((run_id.to_string(), event_type, payload));
        }

        fn close(&self, _run_id: &str) {}
    }

    fn tracer() -> (LifecycleTracer, Arc<RecordingProducer>) {
        let producer = Arc::new(RecordingProducer::default());
        (LifecycleTracer::new("r1", producer.clone()), producer)
    }

    #[test]
    fn start_emits_running_and_tracks_node() {
        let (tracer, producer) = tracer();
        tracer.on_start(&NodeInfo::new("A"));

        assert_eq!(tracer.current_node().as_deref(), Some("A"));
        let updates = producer.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, EventType::NodeUpdate);
        assert_eq!(updates[0].1["node"], "A");
        assert_eq!(updates[0].1["status"], "running");
        assert!(!updates[0].1.contains_key("output"));
    }

    #[test]
    fn end_emits_completed_with_output_and_clears() {
        let (tracer, producer) = tracer();
        let node = NodeInfo::new("A");
        tracer.on_start(&node);
        tracer.on_end(&node, &"ok");

        assert_eq!(tracer.current_node(), None);
        let updates = producer.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].1["status"], "completed");
        assert_eq!(updates[1].1["output"], "ok");
    }

    #[test]
    fn error_emits_failed_with_truncated_message() {
        let (tracer, producer) = tracer();
        let node = NodeInfo::new("B");
        tracer.on_start(&node);
        let long_error = "e".repeat(2 * MAX_OUTPUT_CHARS);
        tracer.on_error(&node, &long_error);

        let updates = producer.updates();
        assert_eq!(updates[1].1["status"], "failed");
        let output = updates[1].1["output"].as_str().unwrap();
        assert_eq!(output.chars().count(), MAX_OUTPUT_CHARS);
    }

    #[test]
    fn end_without_start_is_ignored() {
        let (tracer, producer) = tracer();
        tracer.on_end(&NodeInfo::new("A"), &42);
        tracer.on_error(&NodeInfo::new("A"), &"boom");
        assert!(producer.updates().is_empty());
    }

    #[test]
    fn output_uses_display_rendering() {
        let (tracer, producer) = tracer();
        let node = NodeInfo::new("calc");
        tracer.on_start(&node);
        tracer.on_end(&node, &42);
        assert_eq!(producer.updates()[1].1["output"], "42");
    }

    #[test]
    fn complete_emits_workflow_complete_for_run() {
        let (tracer, producer) = tracer();
        tracer.complete();
        let pushed = producer.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "r1");
        assert_eq!(pushed[0].1, EventType::WorkflowComplete);
    }

    #[test]
    fn tracer_is_usable_as_dyn_lifecycle() {
        let (tracer, producer) = tracer();
        let hooks: &dyn NodeLifecycle = &tracer;
        let node = NodeInfo::with_metadata("A", Payload::new());
        hooks.on_start(&node);
        hooks.on_end(&node, &"done");
        assert_eq!(producer.updates().len(), 2);
    }
}
