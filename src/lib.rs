// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

pub mod amqp;
pub mod broker;
pub mod channel;
pub mod completion;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod otel;
pub mod publisher;
pub mod queue;
pub mod subscriber;
pub mod topology;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use amqp::LapinConnector;
pub use config::{PublisherConfig, SubscriberConfig};
pub use consumer::{DeliveryObserver, LogObserver};
pub use errors::AmqpError;
pub use publisher::{PublishReceipt, Publisher};
pub use subscriber::{Subscriber, SubscriberState};
