// Queue module for NATS JetStream integration

pub mod broker;
pub mod nats;

pub use broker::{MessageBroker, NatsBroker, OutboundMessage};
pub use nats::{NatsClient, NatsConfig};
