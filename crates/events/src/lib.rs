//! Standup-analysis messaging.
//!
//! - `trigger`: the wire schema carried from publisher to worker
//! - `bus`: broker capability traits (publish, consume, settle)
//! - `in_memory_bus`: an at-least-once broker for tests/dev

pub mod bus;
pub mod in_memory_bus;
pub mod trigger;

pub use bus::{BrokerError, Delivery, MessageConsumer, MessagePublisher};
pub use in_memory_bus::{DeadLetter, InMemoryBroker, InMemoryConsumer};
pub use trigger::{AnalysisTrigger, TriggerDecodeError};

/// Durable topic that carries analysis triggers.
pub const ANALYSIS_TOPIC: &str = "standup_analysis";

/// The single logical consumer group (queue) bound to [`ANALYSIS_TOPIC`].
pub const ANALYSIS_QUEUE: &str = "standup_analysis_queue";
