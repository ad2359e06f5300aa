//! Queue consumption with bounded retry and dead-letter quarantine.
//!
//! Retry policy lives in the queue declaration, not in application code:
//! work queues are quorum queues with a delivery limit, and the broker
//! routes messages that exceed it to the dead-letter queue. The consumer
//! itself only distinguishes success (ack) from failure (nack + requeue),
//! so it stays retry-count-agnostic.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::Channel;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::health::HealthState;
use crate::message::Envelope;

/// Well-known queue on each cluster vhost carrying control-plane intents.
pub const WORK_QUEUE_NAME: &str = "edgebus.work";

/// Well-known queue on the common vhost carrying cluster-originated events.
pub const CONTROL_QUEUE_NAME: &str = "edgebus.control";

/// Quarantine queue for messages that exhausted their delivery limit.
pub const DEAD_LETTER_QUEUE_NAME: &str = "edgebus.dead-letter";

/// Additional delivery attempts after the first (21 total deliveries).
pub const DELIVERY_LIMIT: u32 = 20;

/// Explicit handler verdict for one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Message handled; remove it from the queue.
    Ack,
    /// Handling failed transiently; redeliver (bounded by the queue's
    /// delivery limit, after which the broker dead-letters it).
    NackRequeue,
    /// Handling cannot ever succeed; send straight to the dead-letter queue.
    NackDrop,
}

impl Outcome {
    /// Label recorded on the per-outcome consumption metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ack => "ack",
            Outcome::NackRequeue => "requeue",
            Outcome::NackDrop => "drop",
        }
    }
}

/// A handler for decoded envelope messages.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Envelope) -> impl Future<Output = Outcome> + Send;
}

/// Broker arguments configuring the bounded-retry + dead-letter policy.
///
/// Declared at queue-creation time so redelivery accounting stays on the
/// broker (visible in its metrics) instead of in the envelope.
pub fn work_queue_arguments() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString("quorum".into()),
    );
    args.insert(
        ShortString::from("x-delivery-limit"),
        AMQPValue::LongInt(DELIVERY_LIMIT as i32),
    );
    args.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString("".into()),
    );
    args.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(DEAD_LETTER_QUEUE_NAME.into()),
    );
    args
}

/// Declare a work queue with the retry/DLQ policy. Idempotent: redeclaring
/// with identical arguments is a no-op on the broker.
pub async fn declare_work_queue(channel: &Channel, queue_name: &str) -> Result<()> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            work_queue_arguments(),
        )
        .await?;
    Ok(())
}

/// Declare the dead-letter queue: durable, no limits, consumed
/// independently for operator inspection and replay.
pub async fn declare_dead_letter_queue(channel: &Channel) -> Result<()> {
    channel
        .queue_declare(
            DEAD_LETTER_QUEUE_NAME,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Decode one raw delivery and run the handler.
///
/// Decode failures are terminal: the message is acked and dropped with a
/// logged diagnostic, since redelivering a payload nobody can parse only
/// loops. The DLQ is reserved for messages a handler gave up on.
pub async fn process_delivery<H: MessageHandler>(
    body: &[u8],
    handler: &H,
    health_state: Option<&HealthState>,
) -> Outcome {
    match Envelope::decode(body) {
        Ok(message) => {
            debug!(message_type = message.message_type(), "handling message");
            handler.handle(message).await
        }
        Err(e) => {
            if let Some(state) = health_state {
                state.metrics.decode_failures_total.inc();
            }
            error!(error = %e, "dropping undecodable message");
            Outcome::Ack
        }
    }
}

/// Consume a queue until shutdown is signalled.
///
/// Asserts the queue (and the dead-letter queue) before consuming, then
/// acks or nacks each delivery according to the handler's [`Outcome`].
/// Cancellation via `shutdown` stops pulling new deliveries; an in-flight
/// handler finishes first.
pub async fn start_queue_consumer<H: MessageHandler>(
    channel: Channel,
    queue_name: &str,
    consumer_tag: &str,
    handler: H,
    health_state: Option<Arc<HealthState>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    declare_work_queue(&channel, queue_name).await?;
    declare_dead_letter_queue(&channel).await?;
    channel.basic_qos(1, BasicQosOptions::default()).await?;

    let mut consumer = channel
        .basic_consume(
            queue_name,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = queue_name, "consumer started");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.changed() => {
                info!(queue = queue_name, "consumer shutting down");
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(queue = queue_name, error = %e, "delivery error");
                    continue;
                }
                None => {
                    info!(queue = queue_name, "consume stream ended");
                    break;
                }
            },
        };

        let outcome = process_delivery(&delivery.data, &handler, health_state.as_deref()).await;
        if let Some(state) = &health_state {
            state.metrics.record_consumed(outcome.as_str());
        }
        let result = match outcome {
            Outcome::Ack => delivery.ack(BasicAckOptions::default()).await,
            Outcome::NackRequeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
            }
            Outcome::NackDrop => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..BasicNackOptions::default()
                    })
                    .await
            }
        };
        if let Err(e) = result {
            warn!(queue = queue_name, error = %e, "failed to settle delivery");
        }
    }

    Ok(())
}
