// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declaration
//!
//! The topology is the set of exchanges, queues and bindings that must exist on
//! the broker before anything is consumed or published. Declaration happens in a
//! fixed order: exchanges, then queues, then bindings. A queue cannot be bound to
//! an exchange the broker has not seen yet, so the order is not negotiable.
//!
//! Declarations are idempotent on the broker side: redeclaring an entity with
//! matching properties is a no-op, a mismatch fails the whole install.

use crate::{
    broker::{BrokerChannel, QueueInfo},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Trait defining the interface for topology management.
///
/// Definitions are collected with the builder methods and declared together
/// by [`Topology::install`].
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    ///
    /// # Parameters
    /// * `def` - The exchange to declare
    ///
    /// # Returns
    /// Self for method chaining
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    ///
    /// # Parameters
    /// * `def` - The queue to declare
    ///
    /// # Returns
    /// Self for method chaining
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    ///
    /// The exchange does not have to be part of this topology; it only has to
    /// exist on the broker by the time the binding is declared.
    ///
    /// # Parameters
    /// * `binding` - The binding to declare
    ///
    /// # Returns
    /// Self for method chaining
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Declares everything on the broker: exchanges, then queues, then bindings.
    ///
    /// Stops at the first failing step and leaves whatever was already declared
    /// in place; the connection stays open for the caller to close.
    ///
    /// # Returns
    /// The broker's report for every declared queue, in declaration order
    async fn install(&self) -> Result<Vec<QueueInfo>, AmqpError>;
}

/// Installs a topology through a [`BrokerChannel`].
pub struct AmqpTopology {
    channel: Arc<dyn BrokerChannel>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new(channel: Arc<dyn BrokerChannel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            exchanges: vec![],
            queues: vec![],
            queues_binding: vec![],
        }
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    async fn install(&self) -> Result<Vec<QueueInfo>, AmqpError> {
        self.install_exchanges().await?;
        let queues = self.install_queues().await?;
        self.binding_queues().await?;
        Ok(queues)
    }
}

impl AmqpTopology {
    async fn install_exchanges(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!(
                name = exch.name.as_str(),
                kind = %exch.kind,
                "declaring exchange"
            );
            self.channel.declare_exchange(exch).await?;
            debug!("exchange: {} was declared", exch.name);
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<Vec<QueueInfo>, AmqpError> {
        let mut declared = Vec::with_capacity(self.queues.len());

        for def in &self.queues {
            debug!("declaring queue: {}", def.name);
            let info = self.channel.declare_queue(def).await?;
            debug!(
                name = info.name.as_str(),
                messages = info.messages,
                consumers = info.consumers,
                "queue was declared"
            );
            declared.push(info);
        }

        Ok(declared)
    }

    async fn binding_queues(&self) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );
            self.channel.bind_queue(binding).await?;
        }

        debug!("queues were bound");

        Ok(())
    }
}
