//! edgebus - cluster agent connecting Kubernetes to the control-plane bus.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Reads broker and cluster configuration from the environment
//! - Creates the Kubernetes client
//! - Starts the health server, the queue consumer, and the watch workers

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use edgebus::broker::consumer::{CONTROL_QUEUE_NAME, WORK_QUEUE_NAME, start_queue_consumer};
use edgebus::broker::registry::ConnectionRegistry;
use edgebus::broker::transport::AmqpConnector;
use edgebus::config::Config;
use edgebus::health::{HealthState, run_health_server};
use edgebus::reconcile::Dispatcher;
use edgebus::repository::InMemoryRepository;
use edgebus::spawn_status_bridges;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("edgebus=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("lapin=info".parse()?),
        )
        .json()
        .init();

    info!("Starting edgebus agent");

    let config = Config::from_env()?;

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    let registry = Arc::new(ConnectionRegistry::new(AmqpConnector, config.broker.clone()));
    let repository = Arc::new(InMemoryRepository::new());

    // Shutdown fan-out for consumers and watch workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start health server immediately (probes should work before the broker is up)
    let health_handle = {
        let health_state = health_state.clone();
        let addr = config.health_addr;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // An agent bound to a cluster consumes its vhost's work queue; without
    // a cluster id this process serves the control-plane side and consumes
    // the shared control queue instead.
    let (queue_name, (_, channel)) = match config.cluster_id {
        Some(cluster_id) => {
            info!(cluster_id = %cluster_id, "consuming cluster work queue");
            (WORK_QUEUE_NAME, registry.cluster(cluster_id).await?)
        }
        None => {
            info!("no cluster id configured, consuming control queue");
            (CONTROL_QUEUE_NAME, registry.common().await?)
        }
    };

    let consumer_handle = {
        let dispatcher =
            Dispatcher::new(client.clone(), repository, registry.clone(), config.cluster_id);
        let health_state = health_state.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_queue_consumer(
                channel,
                queue_name,
                "edgebus-agent",
                dispatcher,
                Some(health_state),
                shutdown_rx,
            )
            .await
            {
                error!("Consumer error: {}", e);
            }
        })
    };

    let bridge_handles = spawn_status_bridges(
        client,
        registry,
        health_state.clone(),
        shutdown_rx,
    )
    .await?;

    health_state.set_ready(true).await;
    info!("Agent started");

    tokio::select! {
        result = consumer_handle => {
            if let Err(e) = result {
                error!("Consumer task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false).await;
            // Stop the consumer and watch workers; in-flight handlers finish first
            let _ = shutdown_tx.send(true);
        }
    }

    for handle in bridge_handles {
        if let Err(e) = handle.await {
            error!("Watch worker panicked: {}", e);
        }
    }

    info!("Agent stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the agent cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
