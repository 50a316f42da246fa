// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hyper::{http, Method, Request, StatusCode};
use serde_json::{Map, Value};
use streamstats::analyzer::{Analysis, Analyzer};
use streamstats::errors::AnalysisError;
use streamstats::post::Dimension;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::http_utils::{
    empty_response, json_response, log_and_create_http_response, query_pairs, HttpResponse,
};

pub const ANALYSIS_ENDPOINT_PATH: &str = "/analysis";

#[async_trait]
pub trait AnalysisService {
    async fn analyze(
        &self,
        duration: Duration,
        dimension: Dimension,
        cancel_token: &CancellationToken,
    ) -> Result<Analysis, AnalysisError>;

    fn min_allowed_duration(&self) -> Duration;

    fn max_allowed_duration(&self) -> Duration;
}

#[async_trait]
impl AnalysisService for Analyzer {
    async fn analyze(
        &self,
        duration: Duration,
        dimension: Dimension,
        cancel_token: &CancellationToken,
    ) -> Result<Analysis, AnalysisError> {
        Analyzer::analyze(self, duration, dimension, cancel_token).await
    }

    fn min_allowed_duration(&self) -> Duration {
        Analyzer::min_allowed_duration(self)
    }

    fn max_allowed_duration(&self) -> Duration {
        Analyzer::max_allowed_duration(self)
    }
}

pub async fn endpoint_handler<B>(
    service: Arc<dyn AnalysisService + Send + Sync>,
    req: Request<B>,
    cancel_token: CancellationToken,
) -> http::Result<HttpResponse> {
    let (parts, _body) = req.into_parts();
    match (&parts.method, parts.uri.path()) {
        (&Method::GET, ANALYSIS_ENDPOINT_PATH) => {
            analysis_handler(service.as_ref(), parts.uri.query(), &cancel_token).await
        }
        (_, ANALYSIS_ENDPOINT_PATH) => {
            log_and_create_http_response("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => empty_response(StatusCode::NOT_FOUND),
    }
}

async fn analysis_handler(
    service: &(dyn AnalysisService + Send + Sync),
    query: Option<&str>,
    cancel_token: &CancellationToken,
) -> http::Result<HttpResponse> {
    let (duration, dimension) = match parse_request(
        query,
        service.min_allowed_duration(),
        service.max_allowed_duration(),
    ) {
        Ok(request) => request,
        Err(message) => return log_and_create_http_response(&message, StatusCode::BAD_REQUEST),
    };

    info!(
        "Processing analysis request (duration={}, dimension={dimension})",
        humantime::format_duration(duration)
    );
    let start = Instant::now();

    match service.analyze(duration, dimension, cancel_token).await {
        Ok(analysis) => {
            info!(
                "Request completed: {} posts, duration={:?}, mode={}",
                analysis.aggregate.total_count,
                start.elapsed(),
                analysis.mode
            );
            json_response(StatusCode::OK, response_body(&analysis, dimension))
        }
        Err(e) if e.is_no_data() => {
            log_and_create_http_response(&e.to_string(), StatusCode::NOT_FOUND)
        }
        Err(e) => {
            error!("Analysis failed: {e}");
            log_and_create_http_response("Internal server error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Validates `duration` and `dimension` from the query string, returning the client-facing
/// message on failure.
fn parse_request(
    query: Option<&str>,
    min_duration: Duration,
    max_duration: Duration,
) -> Result<(Duration, Dimension), String> {
    let mut raw_duration = None;
    let mut raw_dimension = None;
    for (key, value) in query_pairs(query.unwrap_or_default()) {
        match key.as_str() {
            "duration" if raw_duration.is_none() => raw_duration = Some(value),
            "dimension" if raw_dimension.is_none() => raw_dimension = Some(value),
            _ => {}
        }
    }

    let raw_duration = raw_duration
        .filter(|value| !value.is_empty())
        .ok_or("missing required parameter: duration")?;
    let duration = humantime::parse_duration(raw_duration.trim())
        .ok()
        .filter(|duration| !duration.is_zero())
        .ok_or("invalid duration format (use 5s, 30s, 5m, 1h, etc.)")?;
    if duration < min_duration {
        return Err(format!(
            "duration too short (minimum: {})",
            short_duration(min_duration)
        ));
    }
    if duration > max_duration {
        return Err(format!(
            "duration too long (maximum: {})",
            short_duration(max_duration)
        ));
    }

    let raw_dimension = raw_dimension
        .filter(|value| !value.is_empty())
        .ok_or("missing required parameter: dimension")?;
    let dimension = raw_dimension.parse::<Dimension>().map_err(|_| {
        let allowed: Vec<&str> = Dimension::ALL.iter().map(Dimension::as_str).collect();
        format!("invalid dimension (allowed: {})", allowed.join(", "))
    })?;

    Ok((duration, dimension))
}

/// Largest whole unit among h, m and s, e.g. `24h` rather than `1day`.
fn short_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

fn response_body(analysis: &Analysis, dimension: Dimension) -> String {
    let aggregate = &analysis.aggregate;
    let mut body = Map::new();
    body.insert("total_posts".to_string(), Value::from(aggregate.total_count));
    body.insert(
        "minimum_timestamp".to_string(),
        Value::from(aggregate.min_timestamp),
    );
    body.insert(
        "maximum_timestamp".to_string(),
        Value::from(aggregate.max_timestamp),
    );
    body.insert(format!("{dimension}_p50"), Value::from(aggregate.p50));
    body.insert(format!("{dimension}_p90"), Value::from(aggregate.p90));
    body.insert(format!("{dimension}_p99"), Value::from(aggregate.p99));
    Value::Object(body).to_string()
}
