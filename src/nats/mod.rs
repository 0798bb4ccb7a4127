// NATS JetStream sink

mod client;
mod publisher;

pub use client::{NatsClient, NatsConfig};
pub use publisher::RecordPublisher;
