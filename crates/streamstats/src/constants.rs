// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Width of one retention bucket. Also the smallest window a query may ask for.
pub const BUCKET_GRANULARITY: Duration = Duration::from_secs(5);

/// Maximum age of a retained bucket. Also the largest window a query may ask for.
pub const RETENTION_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Windows at or under this length are answered by observing the live stream.
pub const REALTIME_THRESHOLD: Duration = Duration::from_secs(60);

/// Capacity of the handoff channel between a stream client and its consumer.
pub const HANDOFF_CHANNEL_CAPACITY: usize = 100;

pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// The ingestion worker reports progress once per this many posts.
pub const PROGRESS_REPORT_EVERY: u64 = 100;

/// Longest upstream line, in bytes, before the connection is treated as broken.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
