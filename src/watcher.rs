// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Close Watcher
//!
//! Observes the one-shot close notification of a connection and reports an
//! unexpected close. It is purely diagnostic: it never triggers a shutdown,
//! never reconnects and never touches the delivery loop's completion signal.

use crate::broker::CloseReason;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

/// Scheduler turns given to a pending notification before detaching.
const SETTLE_YIELDS: usize = 4;

/// Owned handle on the background task watching a connection.
///
/// Dropping the watcher stops the task; [`CloseWatcher::settle`] detaches it
/// instead.
#[derive(Debug)]
pub struct CloseWatcher {
    handle: Option<JoinHandle<Option<CloseReason>>>,
}

impl CloseWatcher {
    pub fn watch(notification: oneshot::Receiver<CloseReason>) -> Self {
        let handle = tokio::spawn(async move {
            match notification.await {
                Ok(reason) => {
                    warn!(reason = reason.as_str(), "connection closed unexpectedly");
                    Some(reason)
                }
                Err(_) => {
                    debug!("close notifier released");
                    None
                }
            }
        });

        CloseWatcher {
            handle: Some(handle),
        }
    }

    /// Hands the watcher over to the runtime without stopping it.
    ///
    /// Used when setup fails after the dial: a notification that already
    /// arrived gets reported (and returned) before the caller gives up on the
    /// connection, and a later one is still logged by the detached task.
    pub async fn settle(mut self) -> Option<CloseReason> {
        let handle = self.handle.take()?;

        for _ in 0..SETTLE_YIELDS {
            if handle.is_finished() {
                return handle.await.ok().flatten();
            }
            tokio::task::yield_now().await;
        }
        None
    }

    /// Stops watching. A client-initiated close is not reported.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    #[cfg(test)]
    pub(crate) async fn join(mut self) -> Option<CloseReason> {
        let handle = self.handle.take()?;
        handle.await.ok().flatten()
    }
}

impl Drop for CloseWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
