// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound connection to the upstream event stream.

use bytes::BytesMut;
use reqwest::{header, StatusCode};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::StreamError;
use crate::frame::FrameDecoder;

/// Opens one streaming GET per [`StreamClient::consume`] call.
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: reqwest::Client,
    url: String,
}

impl StreamClient {
    pub fn new(url: impl Into<String>) -> Result<Self, StreamError> {
        // No idle pooling: a reconnect must never resume a half-dead connection.
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Streams frame payloads into `tx` until the remote closes the stream.
    ///
    /// A slow consumer blocks the publish, which in turn stops reading from the
    /// socket. Both waits observe `cancel_token`. Remote close is `Ok(())`; so is a
    /// dropped receiver, since nobody is left to publish to.
    pub async fn consume(
        &self,
        tx: mpsc::Sender<String>,
        cancel_token: &CancellationToken,
    ) -> Result<(), StreamError> {
        let request = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .send();

        let mut response = tokio::select! {
            response = request => response?,
            () = cancel_token.cancelled() => return Err(StreamError::Cancelled),
        };

        if response.status() != StatusCode::OK {
            return Err(StreamError::Status(response.status()));
        }
        debug!("Connected to event stream at {}", self.url);

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();

        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk?,
                () = cancel_token.cancelled() => return Err(StreamError::Cancelled),
            };

            let Some(chunk) = chunk else {
                while let Some(frame) = decoder.decode_eof(&mut buf)? {
                    if !publish(&tx, frame, cancel_token).await? {
                        break;
                    }
                }
                debug!("Event stream closed by remote");
                return Ok(());
            };

            buf.extend_from_slice(&chunk);
            while let Some(frame) = decoder.decode(&mut buf)? {
                if !publish(&tx, frame, cancel_token).await? {
                    debug!("Frame consumer went away, closing stream");
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `Ok(false)` once the receiving side is gone.
async fn publish(
    tx: &mpsc::Sender<String>,
    frame: String,
    cancel_token: &CancellationToken,
) -> Result<bool, StreamError> {
    trace!("Publishing frame of {} bytes", frame.len());
    tokio::select! {
        sent = tx.send(frame) => Ok(sent.is_ok()),
        () = cancel_token.cancelled() => Err(StreamError::Cancelled),
    }
}
