// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Single-use completion signal between the delivery loop and shutdown.
//!
//! There is exactly one writer and one reader. `CompletionWriter::complete`
//! consumes the writer, so the signal cannot be written twice; a writer that is
//! dropped without completing (the loop panicked) is reported to the reader as
//! [`AmqpError::CompletionLost`].

use crate::errors::AmqpError;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

pub fn completion() -> (CompletionWriter, CompletionReader) {
    let (tx, rx) = oneshot::channel();
    (CompletionWriter { tx }, CompletionReader { rx })
}

#[derive(Debug)]
pub struct CompletionWriter {
    tx: oneshot::Sender<Result<(), AmqpError>>,
}

impl CompletionWriter {
    pub fn complete(self, result: Result<(), AmqpError>) {
        if self.tx.send(result).is_err() {
            debug!("completion reader already released");
        }
    }
}

#[derive(Debug)]
pub struct CompletionReader {
    rx: oneshot::Receiver<Result<(), AmqpError>>,
}

impl CompletionReader {
    /// Blocks until the writer completes.
    pub async fn wait(self) -> Result<(), AmqpError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(AmqpError::CompletionLost),
        }
    }

    /// Like [`wait`](Self::wait), bounded by `limit` when one is given.
    pub async fn wait_for(self, limit: Option<Duration>) -> Result<(), AmqpError> {
        match limit {
            None => self.wait().await,
            Some(limit) => tokio::time::timeout(limit, self.wait())
                .await
                .map_err(|_| AmqpError::ShutdownTimeout(limit))?,
        }
    }
}
