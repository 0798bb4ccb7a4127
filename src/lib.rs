// Configuration sections shared by connectors
pub mod config;

// NATS JetStream sink
pub mod nats;

// Source partitions, offsets and offset storage
pub mod offsets;

// Output records and validation
pub mod record;

// Record sinks
pub mod sink;

// Cooperative stop signal
pub mod stop;
