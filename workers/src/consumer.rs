//! Shared consumer loop for the five stage workers (§4.2.1): connect to
//! JetStream, fetch-or-create a durable pull consumer for the stage's
//! subject, then spawn one independent task per delivered message so a slow
//! sheet never blocks its batch-mates.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::PullConsumer};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// What a stage handler asks the consumer loop to do with the delivered
/// message, per the error-policy table in §4.2. `Ack` covers both success and
/// the "acked anyway so the pipeline can't wedge" permanent-failure cases;
/// `Retry` leaves the message unacked for JetStream redelivery.
pub enum Outcome {
    Ack,
    Retry,
}

/// Connect to `jetstream`, ensure `stream_name`/`subject` exist, and drive a
/// durable pull consumer named `consumer_name` until `cancel` fires. `handler`
/// is cloned per message and run as an independent task.
pub async fn run<T, F, Fut>(
    jetstream: jetstream::Context,
    stream_name: &str,
    subject: &str,
    consumer_name: &str,
    cancel: CancellationToken,
    handler: F,
) -> Result<()>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let stream = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: stream_name.to_string(),
            subjects: vec![subject.to_string()],
            ..Default::default()
        })
        .await
        .context("failed to get or create jobs stream")?;

    let consumer: PullConsumer = stream
        .get_or_create_consumer(
            consumer_name,
            jetstream::consumer::pull::Config {
                durable_name: Some(consumer_name.to_string()),
                filter_subject: subject.to_string(),
                ..Default::default()
            },
        )
        .await
        .context("failed to create consumer")?;
    tracing::info!(consumer = consumer_name, subject, "consumer ready");

    let mut messages = consumer.messages().await.context("failed to subscribe")?;
    let handler = Arc::new(handler);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!(consumer = consumer_name, "shutdown signal received, stopping worker");
                break;
            }
            msg = messages.next() => {
                match msg {
                    Some(Ok(message)) => {
                        let handler = handler.clone();
                        let consumer_name = consumer_name.to_string();
                        tokio::spawn(async move {
                            let job: T = match serde_json::from_slice(&message.payload) {
                                Ok(job) => job,
                                Err(e) => {
                                    tracing::error!(?e, consumer = %consumer_name, "failed to deserialize job; dropping");
                                    if let Err(e) = message.ack().await {
                                        tracing::error!(?e, "failed to ack undeserializable message");
                                    }
                                    return;
                                }
                            };

                            match handler(job).await {
                                Outcome::Ack => {
                                    if let Err(e) = message.ack().await {
                                        tracing::error!(?e, "failed to ack message");
                                    }
                                }
                                Outcome::Retry => {
                                    tracing::warn!(consumer = %consumer_name, "transient failure, leaving message for redelivery");
                                }
                            }
                        });
                    }
                    Some(Err(e)) => {
                        tracing::error!(?e, "error receiving message");
                    }
                    None => {
                        tracing::warn!(consumer = consumer_name, "message stream ended unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
