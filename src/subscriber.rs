// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriber Lifecycle
//!
//! A `Subscriber` owns one connection, one channel, the declared topology and a
//! long-lived consumer. It moves through
//!
//! ```text
//! Created -> Connecting -> Declaring -> Consuming -> ShuttingDown -> Closed
//!                 \____________\________________________\______> Failed
//! ```
//!
//! Construction runs the whole setup sequence (dial, open channel, declare
//! exchange, declare queue, bind, consume) and only ever hands back a subscriber
//! in `Consuming`. While consuming, a delivery loop drains the consumer and a
//! close watcher observes the connection. A broker-side disconnect is logged but
//! does not move the state machine; only [`Subscriber::shutdown`] leaves
//! `Consuming`.

use crate::{
    broker::{BrokerChannel, BrokerConnection, BrokerConnector, DeliveryStream, QueueInfo},
    channel,
    config::SubscriberConfig,
    consumer::{DeliveryLoop, DeliveryObserver},
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
    topology::{AmqpTopology, Topology},
    watcher::CloseWatcher,
};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Created,
    Connecting,
    Declaring,
    Consuming,
    ShuttingDown,
    Closed,
    Failed,
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriberState::Created => "created",
            SubscriberState::Connecting => "connecting",
            SubscriberState::Declaring => "declaring",
            SubscriberState::Consuming => "consuming",
            SubscriberState::ShuttingDown => "shutting_down",
            SubscriberState::Closed => "closed",
            SubscriberState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(state: &mut SubscriberState, to: SubscriberState) {
    debug!(from = %state, to = %to, "subscriber state");
    *state = to;
}

pub struct Subscriber {
    tag: String,
    conn: Box<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
    queue: QueueInfo,
    delivery_loop: Option<DeliveryLoop>,
    watcher: CloseWatcher,
    shutdown_timeout: Option<Duration>,
    state: SubscriberState,
}

impl Subscriber {
    /// Connects, declares the topology and starts consuming.
    ///
    /// Any failure aborts the construction; nothing already declared on the
    /// broker is rolled back.
    pub async fn new(
        connector: &dyn BrokerConnector,
        cfg: &SubscriberConfig,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Result<Subscriber, AmqpError> {
        cfg.validate()?;

        let mut state = SubscriberState::Created;
        match Self::setup(connector, cfg, observer, &mut state).await {
            Ok(subscriber) => Ok(subscriber),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    state = %state,
                    "subscriber setup failed"
                );
                transition(&mut state, SubscriberState::Failed);
                Err(err)
            }
        }
    }

    async fn setup(
        connector: &dyn BrokerConnector,
        cfg: &SubscriberConfig,
        observer: Arc<dyn DeliveryObserver>,
        state: &mut SubscriberState,
    ) -> Result<Subscriber, AmqpError> {
        let kind = cfg.exchange_kind()?;

        transition(state, SubscriberState::Connecting);
        let (conn, watcher) = channel::dial_watched(connector, &cfg.uri).await?;

        let declared = Self::declare(conn.as_ref(), cfg, kind, state).await;
        let (channel, queue, deliveries) = match declared {
            Ok(declared) => declared,
            Err(err) => {
                if let Some(reason) = watcher.settle().await {
                    error!(reason = reason.as_str(), "connection was lost during setup");
                }
                return Err(err);
            }
        };

        let delivery_loop = DeliveryLoop::spawn(deliveries, observer);

        transition(state, SubscriberState::Consuming);
        info!(
            queue = queue.name.as_str(),
            consumer_tag = cfg.consumer_tag.as_str(),
            "subscriber consuming"
        );

        Ok(Subscriber {
            tag: cfg.consumer_tag.clone(),
            conn,
            channel,
            queue,
            delivery_loop: Some(delivery_loop),
            watcher,
            shutdown_timeout: cfg.shutdown_timeout(),
            state: SubscriberState::Consuming,
        })
    }

    /// Opens the channel, installs the topology and starts the consumer.
    async fn declare(
        conn: &dyn BrokerConnection,
        cfg: &SubscriberConfig,
        kind: ExchangeKind,
        state: &mut SubscriberState,
    ) -> Result<(Arc<dyn BrokerChannel>, QueueInfo, DeliveryStream), AmqpError> {
        let channel = channel::open_channel(conn).await?;

        transition(state, SubscriberState::Declaring);
        let declared = AmqpTopology::new(channel.clone())
            .exchange(ExchangeDefinition::new(&cfg.exchange).kind(kind).durable())
            .queue(QueueDefinition::new(&cfg.queue).durable())
            .queue_binding(
                QueueBinding::new(&cfg.queue)
                    .exchange(&cfg.exchange)
                    .routing_key(&cfg.binding_key),
            )
            .install()
            .await?;
        let queue = declared.into_iter().next().unwrap_or_default();

        debug!(consumer_tag = cfg.consumer_tag.as_str(), "starting consume");
        let deliveries = channel.consume(&cfg.queue, &cfg.consumer_tag).await?;

        Ok((channel, queue, deliveries))
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn consumer_tag(&self) -> &str {
        &self.tag
    }

    /// The queue as reported by its declaration.
    pub fn queue_info(&self) -> &QueueInfo {
        &self.queue
    }

    /// Cancels the consumer, closes the connection and waits for the delivery
    /// loop to drain.
    ///
    /// Each step must succeed before the next one runs. Only valid while
    /// `Consuming`; any other state yields `InvalidStateError`.
    pub async fn shutdown(&mut self) -> Result<(), AmqpError> {
        let delivery_loop = match (self.state, self.delivery_loop.take()) {
            (SubscriberState::Consuming, Some(delivery_loop)) => delivery_loop,
            (state, _) => return Err(AmqpError::InvalidStateError(state)),
        };
        transition(&mut self.state, SubscriberState::ShuttingDown);

        if let Err(err) = self.channel.cancel(&self.tag).await {
            return Err(self.fail(as_cancel_error(err)));
        }
        debug!(consumer_tag = self.tag.as_str(), "consumer cancelled");

        self.watcher.stop();
        if let Err(err) = self.conn.close().await {
            return Err(self.fail(as_close_error(err)));
        }
        debug!("connection closed");

        match delivery_loop.finish(self.shutdown_timeout).await {
            Ok(processed) => info!(processed, "delivery loop drained"),
            Err(err) => return Err(self.fail(err)),
        }

        transition(&mut self.state, SubscriberState::Closed);
        debug!("AMQP shutdown OK");
        Ok(())
    }

    /// Keeps consuming for `lifetime` (or until Ctrl-C when `None`), then shuts down.
    pub async fn run_for(mut self, lifetime: Option<Duration>) -> Result<(), AmqpError> {
        match lifetime {
            Some(lifetime) => {
                info!(lifetime = ?lifetime, "consumer running");
                tokio::time::sleep(lifetime).await;
            }
            None => {
                info!("consumer running until interrupted");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(error = err.to_string(), "unable to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        }

        info!("shutting down");
        self.shutdown().await
    }

    fn fail(&mut self, err: AmqpError) -> AmqpError {
        error!(error = err.to_string(), "subscriber shutdown failed");
        transition(&mut self.state, SubscriberState::Failed);
        err
    }
}

fn as_cancel_error(err: AmqpError) -> AmqpError {
    match err {
        AmqpError::CancelError(_) => err,
        other => AmqpError::CancelError(other.to_string()),
    }
}

fn as_close_error(err: AmqpError) -> AmqpError {
    match err {
        AmqpError::CloseError(_) => err,
        other => AmqpError::CloseError(other.to_string()),
    }
}
