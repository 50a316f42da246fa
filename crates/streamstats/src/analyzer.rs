// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Answers percentile queries over a trailing window.
//!
//! Short windows (up to the realtime threshold) are answered by opening a
//! dedicated connection to the upstream and observing it for the whole window.
//! Longer windows are answered from the retention store. Nothing is kept between
//! calls.

use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::aggregation::{aggregate, Aggregate};
use crate::collector::Collector;
use crate::constants::REALTIME_THRESHOLD;
use crate::errors::AnalysisError;
use crate::post::{Dimension, Post};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Mode {
    /// Observed on a request-scoped upstream connection.
    #[display("REALTIME")]
    Live,
    /// Read from the retention store.
    #[display("HISTORICAL")]
    Indexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Analysis {
    pub aggregate: Aggregate,
    pub mode: Mode,
}

pub struct Analyzer {
    store: Arc<Store>,
    stream_url: String,
    realtime_threshold: Duration,
}

impl Analyzer {
    #[must_use]
    pub fn new(store: Arc<Store>, stream_url: impl Into<String>) -> Self {
        Self {
            store,
            stream_url: stream_url.into(),
            realtime_threshold: REALTIME_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_realtime_threshold(mut self, realtime_threshold: Duration) -> Self {
        self.realtime_threshold = realtime_threshold;
        self
    }

    #[must_use]
    pub fn mode_for(&self, duration: Duration) -> Mode {
        if duration <= self.realtime_threshold {
            Mode::Live
        } else {
            Mode::Indexed
        }
    }

    /// `duration` and `dimension` are expected to be validated already against
    /// [`Analyzer::min_allowed_duration`] and [`Analyzer::max_allowed_duration`].
    pub async fn analyze(
        &self,
        duration: Duration,
        dimension: Dimension,
        cancel_token: &CancellationToken,
    ) -> Result<Analysis, AnalysisError> {
        match self.mode_for(duration) {
            Mode::Live => self.analyze_live(duration, dimension, cancel_token).await,
            Mode::Indexed => self.analyze_indexed(duration, dimension),
        }
    }

    async fn analyze_live(
        &self,
        duration: Duration,
        dimension: Dimension,
        cancel_token: &CancellationToken,
    ) -> Result<Analysis, AnalysisError> {
        // never shares a connection or buffered frames with the ingestion worker
        let collector = Collector::new(self.stream_url.as_str())?;

        let mut posts: Vec<Post> = Vec::new();
        let collection = collector.collect(cancel_token, |post| posts.push(post));
        let outcome = tokio::time::timeout(duration, collection).await;

        match outcome {
            Err(_elapsed) => debug!("Live window of {duration:?} elapsed"),
            Ok(Ok(())) => debug!("Upstream closed before the live window elapsed"),
            Ok(Err(e)) if e.is_cancelled() => return Err(AnalysisError::Cancelled),
            Ok(Err(e)) => return Err(e.into()),
        }

        if posts.is_empty() {
            return Err(AnalysisError::NoDataCollected);
        }

        Ok(Analysis {
            aggregate: aggregate(&posts, dimension),
            mode: Mode::Live,
        })
    }

    fn analyze_indexed(
        &self,
        duration: Duration,
        dimension: Dimension,
    ) -> Result<Analysis, AnalysisError> {
        let posts = self.store.query(duration);
        if posts.is_empty() {
            return Err(AnalysisError::NoDataAvailable);
        }

        let aggregate = aggregate(posts.iter().map(|post| &**post), dimension);
        // Also hides a dimension that was present but always zero.
        if aggregate.total_count > 0 && !aggregate.has_percentiles() {
            return Err(AnalysisError::NoDataAvailable);
        }

        Ok(Analysis {
            aggregate,
            mode: Mode::Indexed,
        })
    }

    #[must_use]
    pub fn min_allowed_duration(&self) -> Duration {
        self.store.min_duration()
    }

    #[must_use]
    pub fn max_allowed_duration(&self) -> Duration {
        self.store.max_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Metrics;
    use crate::store::tests::{post, ManualClock};
    use mockito::Server;

    fn analyzer_with(store: Store, url: &str) -> Analyzer {
        Analyzer::new(Arc::new(store), url)
    }

    #[test]
    fn test_mode_selection() {
        let analyzer = analyzer_with(Store::new(), "http://127.0.0.1:1");
        assert_eq!(analyzer.mode_for(Duration::from_secs(5)), Mode::Live);
        assert_eq!(analyzer.mode_for(Duration::from_secs(60)), Mode::Live);
        assert_eq!(analyzer.mode_for(Duration::from_secs(61)), Mode::Indexed);
        assert_eq!(analyzer.mode_for(Duration::from_secs(86_400)), Mode::Indexed);

        let analyzer = analyzer.with_realtime_threshold(Duration::from_secs(10));
        assert_eq!(analyzer.mode_for(Duration::from_secs(10)), Mode::Live);
        assert_eq!(analyzer.mode_for(Duration::from_secs(30)), Mode::Indexed);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Live.to_string(), "REALTIME");
        assert_eq!(Mode::Indexed.to_string(), "HISTORICAL");
    }

    #[test]
    fn test_allowed_durations() {
        let analyzer = analyzer_with(Store::new(), "http://127.0.0.1:1");
        assert_eq!(analyzer.min_allowed_duration(), Duration::from_secs(5));
        assert_eq!(analyzer.max_allowed_duration(), Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_indexed_on_empty_store() {
        let analyzer = analyzer_with(Store::new(), "http://127.0.0.1:1");
        let result = analyzer
            .analyze(
                Duration::from_secs(300),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AnalysisError::NoDataAvailable)));
    }

    #[tokio::test]
    async fn test_indexed_without_requested_dimension() {
        let store = Store::with_clock(ManualClock::at(1_000));
        store.insert(post(900, Some(3)));
        let analyzer = analyzer_with(store, "http://127.0.0.1:1");

        let result = analyzer
            .analyze(
                Duration::from_secs(300),
                Dimension::Comments,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AnalysisError::NoDataAvailable)));
    }

    #[tokio::test]
    async fn test_indexed_all_zero_values_collapse_to_no_data() {
        let store = Store::with_clock(ManualClock::at(1_000));
        store.insert(post(900, Some(0)));
        store.insert(post(901, Some(0)));
        let analyzer = analyzer_with(store, "http://127.0.0.1:1");

        let result = analyzer
            .analyze(
                Duration::from_secs(120),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AnalysisError::NoDataAvailable)));
    }

    #[tokio::test]
    async fn test_indexed_hundred_posts() {
        let clock = ManualClock::at(1_700_000_000);
        let store = Store::with_clock(clock.clone());
        for i in 1..=100 {
            store.insert(post(1_700_000_000 + i, Some(i)));
            clock.advance(1);
        }
        let analyzer = analyzer_with(store, "http://127.0.0.1:1");

        let analysis = analyzer
            .analyze(
                Duration::from_secs(300),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await
            .expect("analysis should succeed");

        assert_eq!(analysis.mode, Mode::Indexed);
        assert_eq!(analysis.aggregate.total_count, 100);
        assert_eq!(analysis.aggregate.min_timestamp, 1_700_000_001);
        assert_eq!(analysis.aggregate.max_timestamp, 1_700_000_100);
        assert_eq!(analysis.aggregate.p50, 50);
        assert_eq!(analysis.aggregate.p90, 90);
        assert_eq!(analysis.aggregate.p99, 99);
    }

    #[tokio::test]
    async fn test_indexed_counts_posts_without_dimension() {
        let store = Store::with_clock(ManualClock::at(2_000));
        store.insert(post(10, Some(5)));
        store.insert(Post {
            timestamp: 20,
            metrics: Metrics {
                views: Some(1),
                ..Metrics::default()
            },
        });
        let analyzer = analyzer_with(store, "http://127.0.0.1:1");

        let analysis = analyzer
            .analyze(
                Duration::from_secs(600),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await
            .expect("analysis should succeed");
        assert_eq!(analysis.aggregate.total_count, 2);
        assert_eq!(analysis.aggregate.max_timestamp, 20);
        assert_eq!(analysis.aggregate.p50, 5);
    }

    #[tokio::test]
    async fn test_live_collects_until_upstream_closes() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .with_status(200)
            .with_body(concat!(
                "data: {\"tweet\":{\"timestamp\":7,\"likes\":1}}\n\n",
                "data: {\"tweet\":{\"timestamp\":9,\"likes\":3}}\n\n",
            ))
            .create_async()
            .await;

        // the store is never consulted in live mode
        let store = Store::new();
        store.insert(post(1, Some(1_000)));
        let analyzer = analyzer_with(store, &format!("{}/stream", server.url()));

        let analysis = analyzer
            .analyze(
                Duration::from_secs(5),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await
            .expect("analysis should succeed");

        assert_eq!(analysis.mode, Mode::Live);
        assert_eq!(analysis.aggregate.total_count, 2);
        assert_eq!(analysis.aggregate.min_timestamp, 7);
        assert_eq!(analysis.aggregate.max_timestamp, 9);
        assert_eq!(analysis.aggregate.p99, 1);
    }

    #[tokio::test]
    async fn test_live_with_no_events() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .with_status(200)
            .with_body(": nothing to see\n\n")
            .create_async()
            .await;
        let analyzer = analyzer_with(Store::new(), &format!("{}/stream", server.url()));

        let result = analyzer
            .analyze(
                Duration::from_secs(5),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AnalysisError::NoDataCollected)));
    }

    #[tokio::test]
    async fn test_live_upstream_failure_is_hard() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .with_status(500)
            .create_async()
            .await;
        let analyzer = analyzer_with(Store::new(), &format!("{}/stream", server.url()));

        let result = analyzer
            .analyze(
                Duration::from_secs(5),
                Dimension::Likes,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AnalysisError::Stream(_))));
    }

    #[tokio::test]
    async fn test_live_parent_cancellation() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .with_status(200)
            .with_body("data: {\"tweet\":{\"timestamp\":7,\"likes\":1}}\n\n")
            .create_async()
            .await;
        let analyzer = analyzer_with(Store::new(), &format!("{}/stream", server.url()));

        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let result = analyzer
            .analyze(Duration::from_secs(5), Dimension::Likes, &cancel_token)
            .await;
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
    }
}
