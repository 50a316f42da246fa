// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Long-lived ingestion of the upstream stream into the retention store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::constants::{DEFAULT_RECONNECT_DELAY, PROGRESS_REPORT_EVERY};
use crate::errors::StreamError;
use crate::store::Store;

/// How the worker waits before reconnecting, whether the previous connection
/// failed or was closed by the remote.
///
/// Attempts are unbounded and the delay never grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    FixedDelay(Duration),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::FixedDelay(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn delay(&self) -> Duration {
        match self {
            ReconnectPolicy::FixedDelay(delay) => *delay,
        }
    }
}

pub struct IngestionWorker {
    collector: Collector,
    store: Arc<Store>,
    reconnect_policy: ReconnectPolicy,
    cancel_token: CancellationToken,
}

impl IngestionWorker {
    #[must_use]
    pub fn new(
        collector: Collector,
        store: Arc<Store>,
        reconnect_policy: ReconnectPolicy,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            collector,
            store,
            reconnect_policy,
            cancel_token,
        }
    }

    /// Ingests until cancelled, reconnecting after every failure or remote close.
    ///
    /// Only ever returns `Err(StreamError::Cancelled)`.
    pub async fn spin(self) -> Result<(), StreamError> {
        info!("Worker: starting stream collection from {}", self.collector.url());

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }

            let delay = self.reconnect_policy.delay();
            match self.consume_stream().await {
                Ok(()) => debug!("Worker: stream ended, reconnecting in {delay:?}"),
                Err(e) if e.is_cancelled() || self.cancel_token.is_cancelled() => break,
                Err(e) => warn!("Worker: stream error: {e}, reconnecting in {delay:?}"),
            }

            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel_token.cancelled() => break,
            }
        }

        info!("Worker: shutting down");
        Err(StreamError::Cancelled)
    }

    /// Runs one connection, inserting every decoded post into the store.
    async fn consume_stream(&self) -> Result<(), StreamError> {
        let store = &self.store;
        let mut processed: u64 = 0;
        self.collector
            .collect(&self.cancel_token, |post| {
                store.insert(post);
                processed += 1;
                if processed % PROGRESS_REPORT_EVERY == 0 {
                    info!(
                        "Worker: processed {} posts | buckets: {} | total: {}",
                        processed,
                        store.bucket_count(),
                        store.total_event_count()
                    );
                }
            })
            .await
    }
}
