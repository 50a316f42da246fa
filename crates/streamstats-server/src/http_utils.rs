// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, http, Response, StatusCode};
use serde_json::json;
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. Server errors are logged at error level, client errors at warn
///    and anything else at debug.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(message: &str, status: StatusCode) -> http::Result<HttpResponse> {
    if status.is_server_error() {
        error!("{message}");
    } else if status.is_client_error() {
        warn!("{message}");
    } else {
        debug!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    json_response(status, body)
}

pub fn json_response(status: StatusCode, body: String) -> http::Result<HttpResponse> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

pub fn empty_response(status: StatusCode) -> http::Result<HttpResponse> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
}

/// Splits a query string into decoded `(key, value)` pairs, in order.
pub fn query_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| match param.split_once('=') {
            Some((key, value)) => (url_decode(key), url_decode(value)),
            None => (url_decode(param), String::new()),
        })
}

fn url_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut input = s.bytes();

    while let Some(byte) = input.next() {
        match byte {
            b'%' => {
                let hex: Vec<u8> = input.by_ref().take(2).collect();
                let decoded = std::str::from_utf8(&hex)
                    .ok()
                    .filter(|hex| hex.len() == 2)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(decoded) => bytes.push(decoded),
                    None => {
                        // keep malformed escapes as they were
                        bytes.push(b'%');
                        bytes.extend_from_slice(&hex);
                    }
                }
            }
            b'+' => bytes.push(b' '),
            _ => bytes.push(byte),
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}
