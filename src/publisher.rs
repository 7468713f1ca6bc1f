// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # One-shot Publisher
//!
//! Opens a short-lived connection, declares the exchange, publishes exactly one
//! message and, when reliability is requested, waits for the broker to confirm
//! it. The connection is closed before returning, whatever the outcome.

use crate::{
    broker::{BrokerConnection, BrokerConnector, Confirmation, DeliveryMode, OutboundMessage},
    channel,
    config::PublisherConfig,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    otel,
    topology::{AmqpTopology, Topology},
};
use opentelemetry::Context;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Content type of published bodies.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// What a successful publish reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub bytes: usize,
    pub confirmation: Confirmation,
}

/// Publishes through connections dialled by the borrowed connector, one
/// connection per publishing.
pub struct Publisher<'a> {
    connector: &'a dyn BrokerConnector,
}

impl<'a> Publisher<'a> {
    pub fn new(connector: &'a dyn BrokerConnector) -> Publisher<'a> {
        Publisher { connector }
    }

    /// Publishes `cfg.body` to `cfg.exchange` with `cfg.routing_key`.
    pub async fn publish(&self, cfg: &PublisherConfig) -> Result<PublishReceipt, AmqpError> {
        cfg.validate()?;
        let kind = cfg.exchange_kind()?;

        let conn = channel::dial(self.connector, &cfg.uri).await?;
        let result = publish_on(conn.as_ref(), cfg, kind).await;

        if let Err(err) = conn.close().await {
            warn!(error = err.to_string(), "failure to close the publisher connection");
        } else {
            debug!("publisher connection closed");
        }

        result
    }
}

async fn publish_on(
    conn: &dyn BrokerConnection,
    cfg: &PublisherConfig,
    kind: ExchangeKind,
) -> Result<PublishReceipt, AmqpError> {
    let channel = channel::open_channel(conn).await?;

    AmqpTopology::new(channel.clone())
        .exchange(ExchangeDefinition::new(&cfg.exchange).kind(kind).durable())
        .install()
        .await?;

    if cfg.reliable {
        info!("enabling publishing confirms");
        channel.confirm_select().await?;
    }

    let mut headers = BTreeMap::new();
    otel::inject_context(&Context::current(), &mut headers);

    let message = OutboundMessage::new(&cfg.exchange, &cfg.routing_key, cfg.body.as_bytes())
        .mandatory(false)
        .immediate(false)
        .content_type(TEXT_CONTENT_TYPE)
        .delivery_mode(DeliveryMode::Transient)
        .message_id(Uuid::new_v4().to_string())
        .headers(headers);

    info!(
        bytes = cfg.body.len(),
        routing_key = cfg.routing_key.as_str(),
        "publishing"
    );
    let pending = channel.publish(&message).await?;

    let confirmation = if cfg.reliable {
        info!("waiting for confirmation of one publishing");
        pending.await?
    } else {
        Confirmation::NotRequested
    };

    match confirmation {
        Confirmation::Ack => info!("confirmed delivery"),
        Confirmation::Nack => {
            error!("failed delivery");
            return Err(AmqpError::PublishNacked);
        }
        Confirmation::NotRequested => debug!("publishing not confirmed"),
    }

    Ok(PublishReceipt {
        bytes: cfg.body.len(),
        confirmation,
    })
}
