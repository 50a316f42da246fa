// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Failure to turn one frame payload into a post. Always soft: the frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid format: {0}")]
    InvalidFormat(#[from] serde_json::Error),
    #[error("no post data found")]
    NoPostData,
    #[error("missing timestamp")]
    MissingTimestamp,
}

/// Failure of one connection attempt against the upstream stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid HTTP status: {0}")]
    Status(StatusCode),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("frame error: {0}")]
    Frame(#[from] std::io::Error),
    #[error("stream producer task failed: {0}")]
    Producer(String),
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

/// Terminal outcomes of an analysis call other than success.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("no data collected during the specified duration")]
    NoDataCollected,
    #[error("no data available for requested dimension and duration")]
    NoDataAvailable,
    #[error("upstream stream failed: {0}")]
    Stream(#[from] StreamError),
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Expected empty outcomes, as opposed to defects or transport failures.
    #[must_use]
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            AnalysisError::NoDataCollected | AnalysisError::NoDataAvailable
        )
    }
}
