// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use clap::Parser;
use rabbitmq_lifecycle::{
    config::{DEFAULT_BODY, DEFAULT_EXCHANGE, DEFAULT_EXCHANGE_TYPE, DEFAULT_KEY, DEFAULT_URI},
    AmqpError, LapinConnector, PublishReceipt, Publisher, PublisherConfig,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "publisher")]
#[command(about = "Publishes one message to a RabbitMQ exchange")]
#[command(version)]
struct Cli {
    /// AMQP URI
    #[arg(long, default_value = DEFAULT_URI)]
    uri: String,

    /// Durable AMQP exchange name
    #[arg(long, default_value = DEFAULT_EXCHANGE)]
    exchange: String,

    /// Exchange type - direct|fanout|topic|x-custom
    #[arg(long, default_value = DEFAULT_EXCHANGE_TYPE)]
    exchange_type: String,

    /// AMQP routing key
    #[arg(long, default_value = DEFAULT_KEY)]
    key: String,

    /// Body of message
    #[arg(long, default_value = DEFAULT_BODY)]
    body: String,

    /// Wait for the publisher confirmation before exiting
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    reliable: bool,

    /// JSON configuration file; replaces every other flag
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<PublisherConfig, AmqpError> {
        if let Some(path) = self.config {
            return PublisherConfig::from_json_file(path);
        }

        Ok(PublisherConfig {
            uri: self.uri,
            exchange: self.exchange,
            exchange_type: self.exchange_type,
            routing_key: self.key,
            body: self.body,
            reliable: self.reliable,
        })
    }
}

async fn run(cfg: PublisherConfig) -> Result<PublishReceipt, AmqpError> {
    let connector = LapinConnector::default();
    Publisher::new(&connector).publish(&cfg).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match Cli::parse().into_config() {
        Ok(cfg) => run(cfg).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(receipt) => info!("Published {}B OK", receipt.bytes),
        Err(err) => {
            error!(error = err.to_string(), "publish failed");
            std::process::exit(1);
        }
    }
}
