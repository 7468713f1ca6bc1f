// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Primitives
//!
//! The lifecycle code never talks to lapin directly. It goes through the traits
//! in this module, which expose the connection, channel and delivery primitives
//! of an AMQP broker client:
//!
//! - `BrokerConnector`: dials a broker URI
//! - `BrokerConnection`: opens channels, closes, and raises a one-shot close notification
//! - `BrokerChannel`: topology declaration, consumption, cancellation and publishing
//! - `Acknowledger`: positive acknowledgement of a single delivery
//!
//! The production implementation lives in [`crate::amqp`].

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{future::BoxFuture, stream::BoxStream};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::sync::oneshot;

#[cfg(test)]
use mockall::automock;

/// Lazy, unbounded, non-restartable sequence of inbound deliveries.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Resolves once the broker confirms (or rejects) a single publishing.
pub type PendingConfirm = BoxFuture<'static, Result<Confirmation, AmqpError>>;

/// Opens transport sessions to a broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Establishes a transport session.
    ///
    /// # Parameters
    /// * `uri` - The AMQP URI, credentials included
    ///
    /// # Returns
    /// The live connection, or `DialError` when the broker is unreachable or
    /// rejects the handshake
    async fn dial(&self, uri: &str) -> Result<Box<dyn BrokerConnection>, AmqpError>;
}

/// A live transport session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Opens a logical channel on this connection.
    ///
    /// # Returns
    /// A shareable channel, or `ChannelError`
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    /// Closes the connection with a normal reply code. Every channel and
    /// consumer on it ends with it.
    async fn close(&self) -> Result<(), AmqpError>;

    /// Registers interest in an unexpected close of this connection.
    ///
    /// The returned receiver resolves at most once. It errors out when the
    /// connection is released without having been closed by the broker.
    fn notify_close(&self) -> oneshot::Receiver<CloseReason>;
}

/// A logical session multiplexed over a connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares an exchange. Redeclaring with equal properties is a no-op.
    ///
    /// # Parameters
    /// * `def` - The exchange definition
    ///
    /// # Returns
    /// `DeclareExchangeError` when the broker rejects the declaration, e.g. on a
    /// type or durability mismatch with an existing exchange
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue. Redeclaring with equal properties is a no-op.
    ///
    /// # Parameters
    /// * `def` - The queue definition
    ///
    /// # Returns
    /// The queue name with its ready message and consumer counts, or
    /// `DeclareQueueError`
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueInfo, AmqpError>;

    /// Binds a queue to an exchange. Both must already exist.
    ///
    /// # Parameters
    /// * `binding` - Queue, exchange and binding key
    ///
    /// # Returns
    /// `BindingQueueError` when the broker rejects the binding
    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Starts a consumer with manual acknowledgement.
    ///
    /// # Parameters
    /// * `queue` - The queue to consume from
    /// * `consumer_tag` - Identifies the consumer for a later [`cancel`](Self::cancel)
    ///
    /// # Returns
    /// The delivery stream, which ends when the consumer is cancelled or the
    /// channel closes, or `ConsumerDeclarationError`
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, AmqpError>;

    /// Asks the broker to stop delivering to `consumer_tag`; the matching
    /// delivery stream ends once the broker acknowledges the cancel.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Puts the channel in confirm mode; every later publishing is acked or
    /// nacked by the broker.
    async fn confirm_select(&self) -> Result<(), AmqpError>;

    /// Publishes one message.
    ///
    /// # Parameters
    /// * `message` - Exchange, routing key, body and properties
    ///
    /// # Returns
    /// A future resolving the broker confirmation. It resolves to
    /// `Confirmation::NotRequested` when the channel is not in confirm mode.
    async fn publish(&self, message: &OutboundMessage) -> Result<PendingConfirm, AmqpError>;
}

/// Positive acknowledgement of one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, multiple: bool) -> Result<(), AmqpError>;
}

/// A single inbound message handed to the consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Delivery {
            delivery_tag,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            headers: BTreeMap::default(),
            body,
            acker,
        }
    }

    pub fn with_route(mut self, exchange: &str, routing_key: &str) -> Self {
        self.exchange = exchange.to_owned();
        self.routing_key = routing_key.to_owned();
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Positively acknowledges this delivery (`multiple = false` acks only this tag).
    pub async fn ack(&self, multiple: bool) -> Result<(), AmqpError> {
        self.acker.ack(multiple).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// What the broker reported back for a queue declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub messages: u32,
    pub consumers: u32,
}

/// Reason reported by the broker (or the network layer) for a closed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason(String);

impl CloseReason {
    pub fn new(reason: impl Into<String>) -> Self {
        CloseReason(reason.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

impl DeliveryMode {
    pub fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) body: Vec<u8>,
    pub(crate) mandatory: bool,
    pub(crate) immediate: bool,
    pub(crate) content_type: String,
    pub(crate) delivery_mode: DeliveryMode,
    pub(crate) message_id: Option<String>,
    pub(crate) headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(exchange: &str, routing_key: &str, body: &[u8]) -> Self {
        OutboundMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            body: body.to_vec(),
            mandatory: false,
            immediate: false,
            content_type: "text/plain".to_owned(),
            delivery_mode: DeliveryMode::Transient,
            message_id: None,
            headers: BTreeMap::default(),
        }
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_owned();
        self
    }

    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn message_id(mut self, id: String) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Outcome of a publisher confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ack,
    Nack,
    /// The channel was not in confirm mode.
    NotRequested,
}
