// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Loop
//!
//! Drains the delivery stream of a consumer. Every delivery is handed to a
//! [`DeliveryObserver`] and then positively acknowledged, one at a time: the ack
//! for delivery *n* is sent before delivery *n + 1* is pulled from the stream.
//!
//! When the stream ends (the consumer was cancelled or the channel closed) the
//! loop writes its completion signal exactly once and returns.

use crate::{
    broker::{Delivery, DeliveryStream},
    completion::{completion, CompletionReader, CompletionWriter},
    errors::AmqpError,
    otel,
};
use futures_util::StreamExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Name of the span opened for each delivery.
pub const DELIVERY_SPAN_NAME: &str = "amqp.delivery";

/// Sees every delivery before it is acknowledged.
pub trait DeliveryObserver: Send + Sync {
    fn observe(&self, delivery: &Delivery);
}

/// Logs each received message at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl DeliveryObserver for LogObserver {
    fn observe(&self, delivery: &Delivery) {
        debug!(
            bytes = delivery.body.len(),
            delivery_tag = delivery.delivery_tag,
            body = %String::from_utf8_lossy(&delivery.body),
            "received message"
        );
    }
}

/// A delivery loop running in the background, paired with the completion
/// signal it writes when its stream ends.
#[derive(Debug)]
pub struct DeliveryLoop {
    done: CompletionReader,
    handle: JoinHandle<u64>,
}

impl DeliveryLoop {
    /// Spawns [`drain`] over `deliveries`.
    pub fn spawn(deliveries: DeliveryStream, observer: Arc<dyn DeliveryObserver>) -> Self {
        let (writer, done) = completion();
        let handle = tokio::spawn(drain(deliveries, observer, writer));
        DeliveryLoop { done, handle }
    }

    /// Waits for the loop to complete, bounded by `limit` when one is given.
    ///
    /// # Returns
    /// The number of deliveries processed, `ShutdownTimeout` when the bound
    /// expires first, or `CompletionLost` when the loop died without completing.
    pub async fn finish(self, limit: Option<Duration>) -> Result<u64, AmqpError> {
        self.done.wait_for(limit).await?;

        match self.handle.await {
            Ok(processed) => Ok(processed),
            Err(err) => {
                error!(error = err.to_string(), "delivery loop task failed");
                Err(AmqpError::CompletionLost)
            }
        }
    }
}

/// Runs the delivery loop until the stream ends, then completes `done`.
///
/// Returns the number of deliveries processed.
pub async fn drain(
    mut deliveries: DeliveryStream,
    observer: Arc<dyn DeliveryObserver>,
    done: CompletionWriter,
) -> u64 {
    let tracer = global::tracer("amqp consumer");
    let mut processed = 0;

    while let Some(result) = deliveries.next().await {
        match result {
            Ok(delivery) => {
                consume(&tracer, &delivery, observer.as_ref()).await;
                processed += 1;
            }
            Err(err) => error!(error = err.to_string(), "errors consume msg"),
        }
    }

    debug!(processed, "delivery stream closed");
    done.complete(Ok(()));

    processed
}

/// Observes and acknowledges a single delivery.
///
/// A failed ack is logged and dropped; the loop moves on to the next delivery.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    observer: &dyn DeliveryObserver,
) {
    let (_ctx, mut span) = otel::new_span(&delivery.headers, tracer, DELIVERY_SPAN_NAME);

    observer.observe(delivery);

    match delivery.ack(false).await {
        Ok(()) => span.set_status(Status::Ok),
        Err(err) => {
            error!(
                error = err.to_string(),
                delivery_tag = delivery.delivery_tag,
                "error whiling ack msg"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
        }
    }

    span.end();
}
