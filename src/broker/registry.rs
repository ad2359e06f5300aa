//! Connection registry: one shared "common" connection plus one isolated
//! connection per cluster vhost, created lazily and reused while open.
//!
//! The cache map lives behind an async mutex; check-then-replace happens
//! under the lock, so concurrent callers for the same cluster id cannot
//! create duplicate live connections.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{
    BrokerSettings, ChannelHandle, ConnectionHandle, Connector, broker_url, cluster_vhost,
};
use crate::error::Result;

/// Cache key: the privileged common vhost or a cluster-scoped vhost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VhostKey {
    Common,
    Cluster(Uuid),
}

/// Owns and caches broker connections, keyed by vhost.
pub struct ConnectionRegistry<C: Connector> {
    connector: C,
    settings: BrokerSettings,
    entries: Mutex<HashMap<VhostKey, (C::Connection, C::Channel)>>,
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn new(connector: C, settings: BrokerSettings) -> Self {
        Self {
            connector,
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Connection/channel pair for the common vhost.
    pub async fn common(&self) -> Result<(C::Connection, C::Channel)> {
        let vhost = self.settings.common_vhost.clone();
        self.get_or_connect(VhostKey::Common, &vhost).await
    }

    /// Connection/channel pair for a cluster's isolated vhost.
    pub async fn cluster(&self, cluster_id: Uuid) -> Result<(C::Connection, C::Channel)> {
        let vhost = cluster_vhost(cluster_id);
        self.get_or_connect(VhostKey::Cluster(cluster_id), &vhost)
            .await
    }

    /// Close and evict a cluster's cached connection. A no-op (with a
    /// warning) when nothing is cached for the cluster.
    pub async fn close_cluster(&self, cluster_id: Uuid) {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.remove(&VhostKey::Cluster(cluster_id))
        };
        let Some((connection, channel)) = entry else {
            warn!(cluster_id = %cluster_id, "no cached broker connection to close");
            return;
        };
        if let Err(e) = channel.close().await {
            warn!(cluster_id = %cluster_id, error = %e, "failed to close channel");
        }
        if let Err(e) = connection.close().await {
            warn!(cluster_id = %cluster_id, error = %e, "failed to close connection");
        }
        info!(cluster_id = %cluster_id, "closed broker connection");
    }

    /// Return the cached pair if both handles are still open, otherwise
    /// connect and replace the cache entry. A connect failure propagates
    /// unmodified; retry is the transport's or the caller's responsibility.
    async fn get_or_connect(&self, key: VhostKey, vhost: &str) -> Result<(C::Connection, C::Channel)> {
        let mut entries = self.entries.lock().await;
        if let Some((connection, channel)) = entries.get(&key) {
            if connection.is_open() && channel.is_open() {
                debug!(vhost = %vhost, "reusing cached broker connection");
                return Ok((connection.clone(), channel.clone()));
            }
            debug!(vhost = %vhost, "cached broker connection is closed, reconnecting");
        }

        let url = broker_url(&self.settings, vhost);
        let (connection, channel) = self.connector.connect(&url).await?;
        info!(vhost = %vhost, "established broker connection");
        entries.insert(key, (connection.clone(), channel.clone()));
        Ok((connection, channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::transport::fakes::{FakeConnector, FakeState};
    use std::sync::Arc;

    fn registry() -> (Arc<FakeState>, ConnectionRegistry<FakeConnector>) {
        let state = Arc::new(FakeState::default());
        let connector = FakeConnector::new(state.clone());
        let settings = BrokerSettings {
            host: "broker".into(),
            port: 5672,
            username: "u".into(),
            password: "p".into(),
            common_vhost: "common".into(),
        };
        (state, ConnectionRegistry::new(connector, settings))
    }

    #[tokio::test]
    async fn test_cluster_connection_is_cached() {
        let (state, registry) = registry();
        let id = Uuid::new_v4();
        let (c1, ch1) = registry.cluster(id).await.unwrap();
        let (c2, ch2) = registry.cluster(id).await.unwrap();
        assert_eq!(c1.id, c2.id);
        assert_eq!(ch1.id, ch2.id);
        assert_eq!(state.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_triggers_reconnect() {
        let (state, registry) = registry();
        let id = Uuid::new_v4();
        let (_, ch1) = registry.cluster(id).await.unwrap();
        ch1.close().await.unwrap();
        let (_, ch2) = registry.cluster(id).await.unwrap();
        assert_ne!(ch1.id, ch2.id);
        assert_eq!(state.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_triggers_reconnect() {
        let (state, registry) = registry();
        let id = Uuid::new_v4();
        let (c1, _) = registry.cluster(id).await.unwrap();
        c1.close().await.unwrap();
        let (c2, _) = registry.cluster(id).await.unwrap();
        assert_ne!(c1.id, c2.id);
        assert_eq!(state.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_common_and_cluster_are_distinct_entries() {
        let (state, registry) = registry();
        let id = Uuid::new_v4();
        registry.common().await.unwrap();
        registry.cluster(id).await.unwrap();
        assert_eq!(state.connect_count(), 2);
        let urls = state.connect_urls();
        assert!(urls[0].ends_with("/common"));
        assert!(urls[1].contains(&format!("vh_{id}")));
    }

    #[tokio::test]
    async fn test_close_unknown_cluster_is_noop() {
        let (state, registry) = registry();
        let known = Uuid::new_v4();
        registry.cluster(known).await.unwrap();
        registry.close_cluster(Uuid::new_v4()).await;
        // the known entry is untouched
        let (c, ch) = registry.cluster(known).await.unwrap();
        assert!(c.is_open() && ch.is_open());
        assert_eq!(state.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_close_cluster_evicts_entry() {
        let (state, registry) = registry();
        let id = Uuid::new_v4();
        let (c1, _) = registry.cluster(id).await.unwrap();
        registry.close_cluster(id).await;
        assert!(!c1.is_open());
        registry.cluster(id).await.unwrap();
        assert_eq!(state.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let (state, registry) = registry();
        state.fail_next_connect();
        let err = registry.cluster(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
