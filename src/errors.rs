// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Broker Lifecycle
//!
//! This module provides the error taxonomy for every stage of a broker session:
//! dialing, opening a channel, declaring the topology, consuming, shutting down
//! and publishing. Each variant carries the broker reason so that the binaries
//! can print a descriptive diagnostic before exiting.

use crate::subscriber::SubscriberState;
use std::{fmt, time::Duration};
use thiserror::Error;

/// The topology declaration step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStep {
    Exchange,
    Queue,
    Binding,
}

impl fmt::Display for TopologyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyStep::Exchange => write!(f, "exchange"),
            TopologyStep::Queue => write!(f, "queue"),
            TopologyStep::Binding => write!(f, "binding"),
        }
    }
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Setup errors (`DialError` through `ConsumerDeclarationError`) abort the
/// construction of a subscriber. `CancelError`, `CloseError`, `InvalidStateError`,
/// `ShutdownTimeout` and `CompletionLost` are reported by shutdown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The transport session could not be established
    #[error("failure to dial `{0}`")]
    DialError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare the exchange `{name}`: {reason}")]
    DeclareExchangeError { name: String, reason: String },

    /// Error declaring a queue with the given name
    #[error("failure to declare the queue `{name}`: {reason}")]
    DeclareQueueError { name: String, reason: String },

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{queue}` to exchange `{exchange}`: {reason}")]
    BindingQueueError {
        queue: String,
        exchange: String,
        reason: String,
    },

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer: {0}")]
    ConsumerDeclarationError(String),

    /// Error cancelling the active consumer subscription
    #[error("consumer cancel failed: {0}")]
    CancelError(String),

    /// Error closing the connection
    #[error("connection close error: {0}")]
    CloseError(String),

    /// Shutdown requested while the subscriber is not consuming
    #[error("invalid subscriber state `{0}`")]
    InvalidStateError(SubscriberState),

    /// The delivery loop did not drain within the configured bound
    #[error("delivery loop did not drain within {0:?}")]
    ShutdownTimeout(Duration),

    /// The delivery loop exited without writing its completion signal
    #[error("delivery loop ended without completing")]
    CompletionLost,

    /// Error acknowledging a message
    #[error("failure to ack message: {0}")]
    AckMessageError(String),

    /// Error putting the channel into confirm mode
    #[error("channel could not be put in confirm mode: {0}")]
    ConfirmSelectError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The broker negatively acknowledged a publishing
    #[error("publishing was negatively confirmed")]
    PublishNacked,

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl AmqpError {
    /// Returns which topology step failed, if this is a declaration error.
    pub fn topology_step(&self) -> Option<TopologyStep> {
        match self {
            AmqpError::DeclareExchangeError { .. } => Some(TopologyStep::Exchange),
            AmqpError::DeclareQueueError { .. } => Some(TopologyStep::Queue),
            AmqpError::BindingQueueError { .. } => Some(TopologyStep::Binding),
            _ => None,
        }
    }

    pub fn is_topology(&self) -> bool {
        self.topology_step().is_some()
    }
}
