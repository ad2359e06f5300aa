//! Broker connectivity: connection caching, publishing, consuming.
//!
//! Traffic is split across AMQP virtual hosts: one fixed "common" vhost for
//! control-plane-wide messages and one `vh_{cluster_id}` vhost per edge
//! cluster. The registry owns the cached connections, the publisher provides
//! transactional enqueue/flush semantics, and the consumer implements the
//! bounded-retry + dead-letter pipeline.

pub mod consumer;
pub mod publisher;
pub mod registry;
pub mod transport;

pub use consumer::{
    CONTROL_QUEUE_NAME, DEAD_LETTER_QUEUE_NAME, DELIVERY_LIMIT, MessageHandler, Outcome,
    WORK_QUEUE_NAME, start_queue_consumer,
};
pub use publisher::{MessageScope, Publisher, Target};
pub use registry::ConnectionRegistry;
pub use transport::{
    AmqpConnector, BrokerSettings, ChannelHandle, ConnectionHandle, Connector, broker_url,
    cluster_vhost,
};
