//! Watch worker feeding a bounded channel.
//!
//! The kube watcher is an async stream with automatic re-listing, so the
//! "dedicated execution unit" is a spawned task rather than a thread; the
//! bounded channel provides backpressure toward the reconciliation loop and
//! closing it (or signalling shutdown) stops the worker.

use futures::{Stream, StreamExt};
use kube::Api;
use kube::Resource;
use kube::runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happened to the watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Object was added or modified (including initial listing)
    Applied,
    /// Object is gone
    Deleted,
}

/// One observed resource event.
#[derive(Debug, Clone)]
pub struct ResourceEvent<K> {
    pub kind: WatchEventKind,
    pub object: K,
}

/// Default channel capacity between a watch worker and its consumer.
const WATCH_BUFFER: usize = 64;

/// Spawn a watch worker for `api` and return the event receiver.
///
/// The underlying watcher re-lists and restarts on termination (including
/// normal watch timeouts) with exponential backoff; the worker only exits
/// when shutdown is signalled or the receiver is dropped.
pub fn spawn_watch<K>(
    api: Api<K>,
    config: watcher::Config,
    resource_name: &str,
    shutdown: watch::Receiver<bool>,
) -> (mpsc::Receiver<ResourceEvent<K>>, JoinHandle<()>)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(WATCH_BUFFER);
    let name = resource_name.to_string();
    let stream = watcher(api, config).default_backoff();
    let handle = tokio::spawn(async move {
        info!(resource = %name, "watch worker started");
        forward_watch_events(stream, tx, shutdown).await;
        info!(resource = %name, "watch worker stopped");
    });
    (rx, handle)
}

/// Pump watcher events into the channel until shutdown, receiver drop, or
/// stream end.
pub(crate) async fn forward_watch_events<K, S>(
    stream: S,
    tx: mpsc::Sender<ResourceEvent<K>>,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Send,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
{
    let mut stream = std::pin::pin!(stream);
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.next() => match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    // default_backoff already paced the retry
                    warn!(error = %e, "watch stream error");
                    continue;
                }
                None => break,
            },
        };

        let forwarded = match event {
            watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
                Some(ResourceEvent {
                    kind: WatchEventKind::Applied,
                    object,
                })
            }
            watcher::Event::Delete(object) => Some(ResourceEvent {
                kind: WatchEventKind::Deleted,
                object,
            }),
            watcher::Event::Init | watcher::Event::InitDone => {
                debug!("watch re-list boundary");
                None
            }
        };

        if let Some(event) = forwarded {
            if tx.send(event).await.is_err() {
                // consumer went away
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn cm(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn test_events_forwarded_in_order() {
        let events = vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(cm("a"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(cm("b"))),
            Ok(watcher::Event::Delete(cm("a"))),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        forward_watch_events(futures::stream::iter(events), tx, shutdown_rx).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, WatchEventKind::Applied);
        assert_eq!(first.object.metadata.name.as_deref(), Some("a"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, WatchEventKind::Applied);
        assert_eq!(second.object.metadata.name.as_deref(), Some("b"));
        let third = rx.recv().await.unwrap();
        assert_eq!(third.kind, WatchEventKind::Deleted);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_errors_are_skipped() {
        let events: Vec<Result<watcher::Event<ConfigMap>, watcher::Error>> = vec![
            Err(watcher::Error::NoResourceVersion),
            Ok(watcher::Event::Apply(cm("survivor"))),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        forward_watch_events(futures::stream::iter(events), tx, shutdown_rx).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.object.metadata.name.as_deref(), Some("survivor"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_forwarding() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        // pending stream never yields; shutdown must win the select
        forward_watch_events(
            futures::stream::pending::<Result<watcher::Event<ConfigMap>, watcher::Error>>(),
            tx,
            shutdown_rx,
        )
        .await;
        assert!(rx.recv().await.is_none());
    }
}
