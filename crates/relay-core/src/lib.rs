//! Per-run event relay.
//!
//! Producers push status events for a run at any time; the first subscriber
//! receives everything buffered so far, in order, followed by live events.
//!
//! # Architecture
//!
//! ```text
//! LifecycleTracer / push boundary
//!     |
//!     v
//! EventProducer --push(run_id, type, payload)--> ChannelRegistry
//!                                                   |
//!                       Pending(buffer) or Active(channel), never both
//!                                                   |
//!                                                   v
//!                 subscribe(run_id) --> Subscription --> StreamConsumer
//!                                                   |
//!                                                   v
//!                                        Frame::{Event, Keepalive}
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod producer;
pub mod registry;
pub mod stream;
pub mod tracer;

pub use channel::{ChannelState, Delivery, Subscription};
pub use config::StreamConfig;
pub use error::RelayError;
pub use event::{Event, EventType, NodeStatus, NodeUpdate, Payload};
pub use producer::{EventProducer, RegistryProducer};
pub use registry::{ChannelRegistry, RegistryStats};
pub use stream::{Frame, StreamConsumer};
pub use tracer::{LifecycleTracer, NodeInfo, NodeLifecycle};
