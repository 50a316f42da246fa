// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::HANDOFF_CHANNEL_CAPACITY;
use crate::errors::StreamError;
use crate::post::Post;
use crate::stream_client::StreamClient;

/// Consumer side of a stream connection.
///
/// Each [`Collector::collect`] call opens a fresh upstream connection in a producer
/// task, decodes the frames it publishes and hands every post to a callback.
/// Frames that fail to decode are dropped.
#[derive(Debug, Clone)]
pub struct Collector {
    client: StreamClient,
}

impl Collector {
    pub fn new(url: impl Into<String>) -> Result<Self, StreamError> {
        Ok(Self {
            client: StreamClient::new(url)?,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.client.url()
    }

    /// Runs one connection until the remote closes it, it fails, or `cancel_token`
    /// fires.
    ///
    /// Dropping the returned future cancels the producer and releases the
    /// connection.
    pub async fn collect<F>(
        &self,
        cancel_token: &CancellationToken,
        mut handler: F,
    ) -> Result<(), StreamError>
    where
        F: FnMut(Post),
    {
        let producer_token = cancel_token.child_token();
        let _producer_guard = producer_token.clone().drop_guard();

        let (tx, mut rx) = mpsc::channel(HANDOFF_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let producer =
            tokio::spawn(async move { client.consume(tx, &producer_token).await });

        loop {
            let frame = tokio::select! {
                frame = rx.recv() => frame,
                () = cancel_token.cancelled() => return Err(StreamError::Cancelled),
            };
            let Some(frame) = frame else {
                break;
            };
            match Post::parse(frame.as_bytes()) {
                Ok(post) => handler(post),
                Err(e) => debug!("Dropping frame: {e}"),
            }
        }

        match producer.await {
            Ok(result) => result,
            Err(e) => Err(StreamError::Producer(e.to_string())),
        }
    }
}
