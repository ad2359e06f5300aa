//! Ordered message publishing with commit-on-success semantics.
//!
//! Handlers enqueue messages while their business transaction runs; nothing
//! touches the network until [`MessageScope::commit`]. A scope dropped
//! without commit discards its queue: losing status messages when the
//! surrounding transaction failed is intentional, publishing them would
//! advertise state that was never persisted.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::consumer::{CONTROL_QUEUE_NAME, WORK_QUEUE_NAME};
use super::registry::ConnectionRegistry;
use super::transport::{ChannelHandle, Connector};
use crate::error::Result;
use crate::message::Envelope;

/// Where a queued message is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The control-plane-wide queue on the common vhost
    Common,
    /// A cluster's work queue on its isolated vhost
    Cluster(Uuid),
}

impl Target {
    fn queue_name(&self) -> &'static str {
        match self {
            Target::Common => CONTROL_QUEUE_NAME,
            Target::Cluster(_) => WORK_QUEUE_NAME,
        }
    }
}

/// Buffers envelopes in enqueue order and publishes them on flush.
pub struct Publisher<C: Connector> {
    registry: Arc<ConnectionRegistry<C>>,
    queued: Vec<(Target, Envelope)>,
}

impl<C: Connector> Publisher<C> {
    pub fn new(registry: Arc<ConnectionRegistry<C>>) -> Self {
        Self {
            registry,
            queued: Vec::new(),
        }
    }

    /// Append a message without touching the network.
    pub fn enqueue(&mut self, target: Target, message: Envelope) {
        self.queued.push((target, message));
    }

    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    /// Publish every queued message in enqueue order. Messages published
    /// before a mid-flush error stay published; the rest are dropped with
    /// the error.
    pub async fn flush(&mut self) -> Result<()> {
        for (target, message) in self.queued.drain(..) {
            let (_, channel) = match target {
                Target::Common => self.registry.common().await?,
                Target::Cluster(id) => self.registry.cluster(id).await?,
            };
            let payload = message.encode()?;
            debug!(
                message_type = message.message_type(),
                queue = target.queue_name(),
                "publishing message"
            );
            channel.publish(target.queue_name(), &payload).await?;
        }
        Ok(())
    }
}

/// Scoped transactional wrapper around a [`Publisher`].
///
/// On [`commit`](Self::commit) the queue is flushed exactly once; a scope
/// dropped uncommitted publishes nothing.
pub struct MessageScope<C: Connector> {
    publisher: Publisher<C>,
}

impl<C: Connector> MessageScope<C> {
    pub fn new(registry: Arc<ConnectionRegistry<C>>) -> Self {
        Self {
            publisher: Publisher::new(registry),
        }
    }

    pub fn enqueue(&mut self, target: Target, message: Envelope) {
        self.publisher.enqueue(target, message);
    }

    pub fn pending(&self) -> usize {
        self.publisher.pending()
    }

    /// Flush the queued messages. Consumes the scope so a committed scope
    /// cannot flush twice.
    pub async fn commit(mut self) -> Result<()> {
        self.publisher.flush().await
    }
}

impl<C: Connector> Drop for MessageScope<C> {
    fn drop(&mut self) {
        let discarded = self.publisher.pending();
        if discarded > 0 {
            debug!(discarded, "discarding unpublished messages from aborted scope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::transport::fakes::{FakeConnector, FakeState};
    use crate::broker::transport::BrokerSettings;
    use jiff::Timestamp;

    fn scope_setup() -> (Arc<FakeState>, Arc<ConnectionRegistry<FakeConnector>>) {
        let state = Arc::new(FakeState::default());
        let registry = Arc::new(ConnectionRegistry::new(
            FakeConnector::new(state.clone()),
            BrokerSettings {
                host: "broker".into(),
                port: 5672,
                username: "u".into(),
                password: "p".into(),
                common_vhost: "common".into(),
            },
        ));
        (state, registry)
    }

    fn heartbeat(n: u32) -> Envelope {
        Envelope::Heartbeat {
            cluster_name: format!("edge-{n}"),
            organization_name: "acme".into(),
            timestamp: Timestamp::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn test_enqueue_does_not_publish() {
        let (state, registry) = scope_setup();
        let mut publisher = Publisher::new(registry);
        publisher.enqueue(Target::Common, heartbeat(1));
        assert_eq!(publisher.pending(), 1);
        assert_eq!(state.connect_count(), 0);
        assert!(state.published().is_empty());
    }

    #[tokio::test]
    async fn test_flush_publishes_in_enqueue_order() {
        let (state, registry) = scope_setup();
        let id = Uuid::new_v4();
        let mut publisher = Publisher::new(registry);
        publisher.enqueue(Target::Common, heartbeat(1));
        publisher.enqueue(Target::Cluster(id), heartbeat(2));
        publisher.enqueue(Target::Common, heartbeat(3));
        publisher.flush().await.unwrap();

        let published = state.published();
        assert_eq!(published.len(), 3);
        assert!(published[0].0.ends_with("/common"));
        assert!(published[1].0.contains(&format!("vh_{id}")));
        assert_eq!(published[1].1, WORK_QUEUE_NAME);
        let first: Envelope = serde_json::from_slice(&published[0].2).unwrap();
        assert_eq!(first, heartbeat(1));
        let third: Envelope = serde_json::from_slice(&published[2].2).unwrap();
        assert_eq!(third, heartbeat(3));
    }

    #[tokio::test]
    async fn test_flush_reuses_cached_connection() {
        let (state, registry) = scope_setup();
        let mut publisher = Publisher::new(registry);
        publisher.enqueue(Target::Common, heartbeat(1));
        publisher.enqueue(Target::Common, heartbeat(2));
        publisher.flush().await.unwrap();
        assert_eq!(state.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_committed_scope_publishes_exactly_once_each() {
        let (state, registry) = scope_setup();
        let mut scope = MessageScope::new(registry);
        scope.enqueue(Target::Common, heartbeat(1));
        scope.enqueue(Target::Common, heartbeat(2));
        scope.commit().await.unwrap();
        assert_eq!(state.published().len(), 2);
    }

    #[tokio::test]
    async fn test_aborted_scope_publishes_nothing() {
        let (state, registry) = scope_setup();
        let run = |registry: Arc<ConnectionRegistry<FakeConnector>>| -> crate::error::Result<()> {
            let mut scope = MessageScope::new(registry);
            scope.enqueue(Target::Common, heartbeat(1));
            scope.enqueue(Target::Common, heartbeat(2));
            // business transaction fails before commit; scope drops uncommitted
            Err(crate::error::Error::Transport("db rollback".into()))
        };
        assert!(run(registry).is_err());
        assert_eq!(state.published().len(), 0);
        assert_eq!(state.connect_count(), 0);
    }
}
