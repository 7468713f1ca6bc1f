// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection and Channel Establishment
//!
//! Dials the broker and opens the single channel a client works on. A watched
//! connection registers its close watcher right after the dial succeeds, before
//! any other setup step runs, so a loss in the middle of setup is still reported.

use crate::{
    broker::{BrokerChannel, BrokerConnection, BrokerConnector},
    errors::AmqpError,
    watcher::CloseWatcher,
};
use std::sync::Arc;
use tracing::debug;

/// Opens a transport session to `uri`.
pub async fn dial(
    connector: &dyn BrokerConnector,
    uri: &str,
) -> Result<Box<dyn BrokerConnection>, AmqpError> {
    debug!(uri = %redact_uri(uri), "dialling");
    let conn = connector.dial(uri).await?;
    debug!("got connection");
    Ok(conn)
}

/// Dials `uri` and immediately starts watching the connection for an
/// unexpected close.
pub async fn dial_watched(
    connector: &dyn BrokerConnector,
    uri: &str,
) -> Result<(Box<dyn BrokerConnection>, CloseWatcher), AmqpError> {
    let conn = dial(connector, uri).await?;
    let watcher = CloseWatcher::watch(conn.notify_close());
    Ok((conn, watcher))
}

pub async fn open_channel(
    conn: &dyn BrokerConnection,
) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
    debug!("getting channel");
    let channel = conn.open_channel().await?;
    debug!("got channel");
    Ok(channel)
}

/// Masks the password in the userinfo part of an AMQP URI.
pub fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_owned();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);

    let Some((userinfo, host)) = authority.rsplit_once('@') else {
        return uri.to_owned();
    };

    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}{path}"),
        None => uri.to_owned(),
    }
}
