// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use clap::Parser;
use rabbitmq_lifecycle::{
    config::{
        DEFAULT_CONSUMER_TAG, DEFAULT_EXCHANGE, DEFAULT_EXCHANGE_TYPE, DEFAULT_KEY, DEFAULT_QUEUE,
        DEFAULT_URI,
    },
    AmqpError, LapinConnector, LogObserver, Subscriber, SubscriberConfig,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "subscriber")]
#[command(about = "Consumes and acknowledges messages from a RabbitMQ queue")]
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

    /// Ephemeral AMQP queue name
    #[arg(long, default_value = DEFAULT_QUEUE)]
    queue: String,

    /// AMQP binding key
    #[arg(long, default_value = DEFAULT_KEY)]
    key: String,

    /// AMQP consumer tag (should not be blank)
    #[arg(long, default_value = DEFAULT_CONSUMER_TAG)]
    consumer_tag: String,

    /// Seconds to run before shutting down (0 = until interrupted)
    #[arg(long, default_value = "0")]
    lifetime: u64,

    /// Seconds to wait for the delivery loop on shutdown (0 = unbounded)
    #[arg(long, default_value = "0")]
    shutdown_timeout: u64,

    /// JSON configuration file; replaces every other flag
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<SubscriberConfig, AmqpError> {
        if let Some(path) = self.config {
            return SubscriberConfig::from_json_file(path);
        }

        Ok(SubscriberConfig {
            uri: self.uri,
            exchange: self.exchange,
            exchange_type: self.exchange_type,
            queue: self.queue,
            binding_key: self.key,
            consumer_tag: self.consumer_tag,
            lifetime_secs: self.lifetime,
            shutdown_timeout_secs: self.shutdown_timeout,
        })
    }
}

async fn run(cfg: SubscriberConfig) -> Result<(), AmqpError> {
    let connector = LapinConnector::default();
    let subscriber = Subscriber::new(&connector, &cfg, Arc::new(LogObserver)).await?;
    subscriber.run_for(cfg.lifetime()).await
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

    if let Err(err) = result {
        error!(error = err.to_string(), "subscriber failed");
        std::process::exit(1);
    }
    info!("subscriber finished");
}
