// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_PRUNE_INTERVAL;
use crate::store::Store;

/// Periodically evicts buckets that fell behind the retention horizon.
pub struct Pruner {
    store: Arc<Store>,
    interval: Duration,
    cancel_token: CancellationToken,
}

impl Pruner {
    /// A zero `interval` falls back to [`DEFAULT_PRUNE_INTERVAL`].
    #[must_use]
    pub fn new(store: Arc<Store>, interval: Duration, cancel_token: CancellationToken) -> Self {
        let interval = if interval.is_zero() {
            warn!("Pruner: zero interval, using {DEFAULT_PRUNE_INTERVAL:?}");
            DEFAULT_PRUNE_INTERVAL
        } else {
            interval
        };
        Self {
            store,
            interval,
            cancel_token,
        }
    }

    pub async fn spin(self) {
        info!("Pruner: starting (interval={:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.store.prune();
                    if removed > 0 {
                        info!("Pruner: removed {removed} stale buckets");
                    } else {
                        debug!("Pruner: nothing to remove");
                    }
                }
                () = self.cancel_token.cancelled() => {
                    info!("Pruner: shutting down");
                    return;
                }
            }
        }
    }
}
