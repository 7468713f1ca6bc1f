// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # lapin Broker Client
//!
//! Implements the [`crate::broker`] traits on top of lapin. Every broker call is
//! logged and its lapin error is mapped onto the matching [`AmqpError`] variant.

use crate::{
    broker::{
        Acknowledger, BrokerChannel, BrokerConnection, BrokerConnector, CloseReason,
        Confirmation, Delivery, DeliveryStream, OutboundMessage, PendingConfirm, QueueInfo,
    },
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Reply code sent with a client-initiated connection close.
pub const AMQP_REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ through lapin.
#[derive(Debug, Clone)]
pub struct LapinConnector {
    connection_name: String,
}

impl LapinConnector {
    /// `connection_name` is shown in the broker's management UI.
    pub fn new(connection_name: &str) -> Self {
        LapinConnector {
            connection_name: connection_name.to_owned(),
        }
    }
}

impl Default for LapinConnector {
    fn default() -> Self {
        LapinConnector::new(env!("CARGO_PKG_NAME"))
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn dial(&self, uri: &str) -> Result<Box<dyn BrokerConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        match Connection::connect(uri, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Box::new(LapinConnection { inner: conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::DialError(err.to_string()))
            }
        }
    }
}

pub struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.inner.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel { inner: channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(AMQP_REPLY_SUCCESS, "normal shutdown")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close the connection");
                AmqpError::CloseError(err.to_string())
            })
    }

    fn notify_close(&self) -> oneshot::Receiver<CloseReason> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);

        self.inner.on_error(move |err| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(CloseReason::new(err.to_string()));
            }
        });

        rx
    }
}

pub struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.inner
            .exchange_declare(
                &def.name,
                def.kind.clone().into(),
                ExchangeDeclareOptions {
                    durable: def.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                AmqpError::DeclareExchangeError {
                    name: def.name.clone(),
                    reason: err.to_string(),
                }
            })
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueInfo, AmqpError> {
        match self
            .inner
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    durable: def.durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(queue) => Ok(QueueInfo {
                name: queue.name().as_str().to_owned(),
                messages: queue.message_count(),
                consumers: queue.consumer_count(),
            }),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError {
                    name: def.name.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.inner
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingQueueError {
                    queue: binding.queue_name.clone(),
                    exchange: binding.exchange_name.clone(),
                    reason: err.to_string(),
                }
            })
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::ConsumerDeclarationError(err.to_string())
            })?;

        Ok(consumer
            .map(|result| {
                result
                    .map(into_delivery)
                    .map_err(|err| AmqpError::ChannelError(err.to_string()))
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    consumer_tag, "error to cancel the consumer"
                );
                AmqpError::CancelError(err.to_string())
            })
    }

    async fn confirm_select(&self) -> Result<(), AmqpError> {
        self.inner
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to enable publisher confirms");
                AmqpError::ConfirmSelectError(err.to_string())
            })
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<PendingConfirm, AmqpError> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(message.content_type.clone()))
            .with_delivery_mode(message.delivery_mode.as_u8())
            .with_headers(into_field_table(&message.headers));

        if let Some(id) = &message.message_id {
            properties = properties.with_message_id(ShortString::from(id.clone()));
        }

        let confirm = self
            .inner
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    mandatory: message.mandatory,
                    immediate: message.immediate,
                },
                &message.body,
                properties,
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                AmqpError::PublishingError(err.to_string())
            })?;

        Ok(Box::pin(async move {
            match confirm.await {
                Ok(publisher_confirm::Confirmation::Ack(_)) => Ok(Confirmation::Ack),
                Ok(publisher_confirm::Confirmation::Nack(_)) => Ok(Confirmation::Nack),
                Ok(publisher_confirm::Confirmation::NotRequested) => {
                    Ok(Confirmation::NotRequested)
                }
                Err(err) => {
                    error!(error = err.to_string(), "error waiting for confirmation");
                    Err(AmqpError::PublishingError(err.to_string()))
                }
            }
        }))
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self, multiple: bool) -> Result<(), AmqpError> {
        self.0
            .ack(BasicAckOptions { multiple })
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let headers = header_strings(&delivery.properties);

    Delivery::new(
        delivery.delivery_tag,
        delivery.data,
        Box::new(LapinAcker(delivery.acker)),
    )
    .with_route(delivery.exchange.as_str(), delivery.routing_key.as_str())
    .redelivered(delivery.redelivered)
    .with_headers(headers)
}

/// Keeps the textual headers; binary and numeric values are not needed downstream.
fn header_strings(props: &BasicProperties) -> BTreeMap<String, String> {
    let Some(table) = props.headers() else {
        return BTreeMap::default();
    };

    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes()).ok()?.to_owned(),
                AMQPValue::ShortString(v) => v.as_str().to_owned(),
                _ => return None,
            };
            Some((key.as_str().to_owned(), text))
        })
        .collect()
}

fn into_field_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let table: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(key, value)| {
            (
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            )
        })
        .collect();

    FieldTable::from(table)
}
