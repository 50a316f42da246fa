// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Engagement posts as decoded from the upstream stream.
//!
//! Every frame carries a JSON object with exactly one top-level key naming the
//! source kind (`tweet`, `instagram_media`, `youtube_video`, ...). The value under
//! that key holds the post timestamp and any subset of the engagement metrics.
//! A metric that is missing from the payload stays `None`: absent is not zero.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::DecodeError;

/// One named engagement metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Likes,
    Comments,
    Retweets,
    Favorites,
    Shares,
    Plays,
    Views,
    Saves,
    Repins,
    Dislikes,
    AvgViewers,
    PeakViewers,
}

impl Dimension {
    pub const ALL: [Dimension; 12] = [
        Dimension::Likes,
        Dimension::Comments,
        Dimension::Retweets,
        Dimension::Favorites,
        Dimension::Shares,
        Dimension::Plays,
        Dimension::Views,
        Dimension::Saves,
        Dimension::Repins,
        Dimension::Dislikes,
        Dimension::AvgViewers,
        Dimension::PeakViewers,
    ];

    /// The field name used on the wire and in response keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Likes => "likes",
            Dimension::Comments => "comments",
            Dimension::Retweets => "retweets",
            Dimension::Favorites => "favorites",
            Dimension::Shares => "shares",
            Dimension::Plays => "plays",
            Dimension::Views => "views",
            Dimension::Saves => "saves",
            Dimension::Repins => "repins",
            Dimension::Dislikes => "dislikes",
            Dimension::AvgViewers => "avg_viewers",
            Dimension::PeakViewers => "peak_viewers",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dimension: {0}")]
pub struct UnknownDimension(pub String);

impl FromStr for Dimension {
    type Err = UnknownDimension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str() == s)
            .ok_or_else(|| UnknownDimension(s.to_string()))
    }
}

/// Sparse engagement metrics. `None` means the upstream did not report the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Metrics {
    pub likes: Option<i64>,
    pub comments: Option<i64>,
    pub retweets: Option<i64>,
    pub favorites: Option<i64>,
    pub shares: Option<i64>,
    pub plays: Option<i64>,
    pub views: Option<i64>,
    pub saves: Option<i64>,
    pub repins: Option<i64>,
    pub dislikes: Option<i64>,
    pub avg_viewers: Option<i64>,
    pub peak_viewers: Option<i64>,
}

impl Metrics {
    #[must_use]
    pub fn get(&self, dimension: Dimension) -> Option<i64> {
        match dimension {
            Dimension::Likes => self.likes,
            Dimension::Comments => self.comments,
            Dimension::Retweets => self.retweets,
            Dimension::Favorites => self.favorites,
            Dimension::Shares => self.shares,
            Dimension::Plays => self.plays,
            Dimension::Views => self.views,
            Dimension::Saves => self.saves,
            Dimension::Repins => self.repins,
            Dimension::Dislikes => self.dislikes,
            Dimension::AvgViewers => self.avg_viewers,
            Dimension::PeakViewers => self.peak_viewers,
        }
    }
}

/// A single engagement record. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Declared publication time, epoch seconds. Never zero.
    pub timestamp: i64,
    pub metrics: Metrics,
}

#[derive(Deserialize)]
struct PostContent {
    #[serde(default)]
    timestamp: i64,
    #[serde(flatten)]
    metrics: Metrics,
}

impl Post {
    /// Decodes one frame payload.
    ///
    /// The payload must be a JSON object with exactly one key; its value must carry
    /// a non-zero `timestamp`. Unrecognised fields are ignored.
    pub fn parse(data: &[u8]) -> Result<Post, DecodeError> {
        let raw: Map<String, Value> = serde_json::from_slice(data)?;
        if raw.len() != 1 {
            return Err(DecodeError::NoPostData);
        }
        let content = raw
            .into_iter()
            .next()
            .map(|(_, content)| content)
            .ok_or(DecodeError::NoPostData)?;

        let content: PostContent = serde_json::from_value(content)?;
        if content.timestamp == 0 {
            return Err(DecodeError::MissingTimestamp);
        }

        Ok(Post {
            timestamp: content.timestamp,
            metrics: content.metrics,
        })
    }
}
