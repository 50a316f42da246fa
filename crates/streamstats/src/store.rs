// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-bucketed retention of ingested posts.
//!
//! Posts are grouped into fixed-width buckets keyed by their *arrival* time, not by
//! their declared timestamp. Locking is two-level: the bucket directory sits behind
//! a `RwLock` that is only write-locked to create or delete buckets, and each bucket
//! has its own `Mutex`. Inserts into different buckets therefore never wait on
//! each other, and copying one bucket out never blocks an insert into another.
//!
//! Buckets past the retention horizon are only removed by [`Store::prune`]; between
//! prune cycles an expired bucket may still be present, but queries never reach
//! that far back.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;

use crate::constants::{BUCKET_GRANULARITY, RETENTION_HORIZON};
use crate::post::Post;

/// Source of the current time, in epoch seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Default)]
struct Bucket {
    posts: Mutex<Vec<Arc<Post>>>,
}

impl Bucket {
    fn push(&self, post: Arc<Post>) {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(post);
    }

    fn snapshot_into(&self, out: &mut Vec<Arc<Post>>) {
        let posts = self.posts.lock().unwrap_or_else(PoisonError::into_inner);
        out.extend(posts.iter().cloned());
    }

    fn len(&self) -> usize {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct Store {
    buckets: RwLock<HashMap<i64, Arc<Bucket>>>,
    clock: Box<dyn Clock>,
    granularity_secs: i64,
    horizon_secs: i64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("granularity_secs", &self.granularity_secs)
            .field("horizon_secs", &self.horizon_secs)
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    #[must_use]
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clock: Box::new(clock),
            granularity_secs: duration_secs(BUCKET_GRANULARITY),
            horizon_secs: duration_secs(RETENTION_HORIZON),
        }
    }

    /// Appends `post` to the bucket of the current arrival slot, creating it if needed.
    pub fn insert(&self, post: Post) {
        let key = self.bucket_key(self.clock.now_secs());
        let bucket = self.bucket_for(key);
        bucket.push(Arc::new(post));
    }

    fn bucket_for(&self, key: i64) -> Arc<Bucket> {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(&key) {
                return Arc::clone(bucket);
            }
        }
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(key).or_default())
    }

    /// Snapshot of every post whose bucket key is within `duration` of now.
    ///
    /// Order is unspecified.
    #[must_use]
    pub fn query(&self, duration: Duration) -> Vec<Arc<Post>> {
        let cutoff = self.clock.now_secs().saturating_sub(duration_secs(duration));

        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut posts = Vec::new();
        for (_, bucket) in buckets.iter().filter(|(key, _)| **key >= cutoff) {
            bucket.snapshot_into(&mut posts);
        }
        posts
    }

    /// Deletes every bucket older than the retention horizon and returns how many
    /// were removed.
    pub fn prune(&self) -> usize {
        let cutoff = self.clock.now_secs().saturating_sub(self.horizon_secs);

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|key, _| *key >= cutoff);
        before - buckets.len()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn total_event_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|bucket| bucket.len())
            .sum()
    }

    /// Smallest window worth querying: one bucket.
    #[must_use]
    pub fn min_duration(&self) -> Duration {
        BUCKET_GRANULARITY
    }

    #[must_use]
    pub fn max_duration(&self) -> Duration {
        RETENTION_HORIZON
    }

    fn bucket_key(&self, now_secs: i64) -> i64 {
        now_secs.div_euclid(self.granularity_secs) * self.granularity_secs
    }
}

fn duration_secs(duration: Duration) -> i64 {
    duration.as_secs().try_into().unwrap_or(i64::MAX)
}
