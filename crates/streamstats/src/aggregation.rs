// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::post::{Dimension, Post};

/// Summary statistics of a set of posts for one dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    /// Every non-null post considered, whether or not it carried the dimension.
    pub total_count: usize,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub p50: i64,
    pub p90: i64,
    pub p99: i64,
}

impl Aggregate {
    #[must_use]
    pub fn has_percentiles(&self) -> bool {
        self.p50 != 0 || self.p90 != 0 || self.p99 != 0
    }
}

/// Computes nearest-rank percentiles of `dimension` and the declared-timestamp
/// bounds over `posts`.
///
/// `None` entries are skipped and not counted. Timestamp bounds cover every
/// remaining post; percentiles only the posts where `dimension` is present, and
/// are all zero when none is.
pub fn aggregate<'a, I>(posts: I, dimension: Dimension) -> Aggregate
where
    I: IntoIterator,
    I::Item: Into<Option<&'a Post>>,
{
    let mut result = Aggregate::default();
    let mut values = Vec::new();

    for post in posts
        .into_iter()
        .filter_map(Into::<Option<&'a Post>>::into)
    {
        if result.total_count == 0 {
            result.min_timestamp = post.timestamp;
            result.max_timestamp = post.timestamp;
        } else {
            result.min_timestamp = result.min_timestamp.min(post.timestamp);
            result.max_timestamp = result.max_timestamp.max(post.timestamp);
        }
        result.total_count += 1;

        if let Some(value) = post.metrics.get(dimension) {
            values.push(value);
        }
    }

    if values.is_empty() {
        return result;
    }

    values.sort_unstable();
    result.p50 = percentile(&values, 50);
    result.p90 = percentile(&values, 90);
    result.p99 = percentile(&values, 99);
    result
}

/// `sorted[floor(p * (n - 1) / 100)]`, without interpolation.
fn percentile(sorted: &[i64], p: usize) -> i64 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0;
    };
    let rank = (p * last / 100).min(last);
    sorted[rank]
}
