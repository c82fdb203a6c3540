// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The telemetry record and the helpers used to fill it.
//!
//! A [`Payload`] is built once per exchange by
//! [`Client::build_payload`](crate::client::Client::build_payload), serialized
//! once by the publisher and then dropped.  Every map in it is owned, so the
//! live request can be mutated or dropped without affecting the record.


use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hyper::header::HeaderMap;
use hyper::http::request::Parts;
use hyper::Version;
use serde::{Deserialize, Serialize};

use crate::errors::ATError;
use crate::redact::HeaderValues;

/// Protocol version used when the version string cannot be parsed.
pub const DEFAULT_PROTOCOL_VERSION: (u32, u32) = (1, 1);

/// One captured request/response exchange, as shipped to the collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// When the payload was built
    pub timestamp: DateTime<Utc>,
    /// Redacted request headers
    pub request_headers: HeaderValues,
    /// Decoded query parameters
    pub query_params: HeaderValues,
    /// Path parameters of the matched route
    pub path_params: BTreeMap<String, String>,
    /// Redacted response headers
    pub response_headers: HeaderValues,
    /// Request method
    pub method: String,
    /// Source tag, e.g. `RustHyper`
    pub sdk_type: String,
    /// Request host without port
    pub host: String,
    /// Encoded path and query as received
    pub raw_url: String,
    /// `Referer` header, empty when absent
    pub referer: String,
    /// Project the payload belongs to
    pub project_id: String,
    /// Route template, e.g. `/users/{id}`
    pub url_path: String,
    /// Redacted response body
    #[serde(with = "body_encoding")]
    pub response_body: Vec<u8>,
    /// Redacted request body
    #[serde(with = "body_encoding")]
    pub request_body: Vec<u8>,
    /// Minor protocol version
    pub proto_minor: u32,
    /// Response status code
    pub status_code: u16,
    /// Major protocol version
    pub proto_major: u32,
    /// Exchange duration in nanoseconds
    pub duration: u64,
    /// Errors reported while handling the request
    pub errors: Vec<ATError>,
}

/// Bodies travel as standard base64 strings.
mod body_encoding {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Everything captured about one exchange, before redaction.
#[derive(Debug, Clone, Default)]
pub struct CapturedExchange<'a> {
    /// Source tag stored in [`Payload::sdk_type`]
    pub sdk_type: String,
    /// Time from interception to capture completion
    pub elapsed: Duration,
    /// Request line and headers; `None` yields an empty payload
    pub request: Option<&'a Parts>,
    /// Final status code
    pub status_code: u16,
    /// Raw request body
    pub request_body: Vec<u8>,
    /// Raw response body
    pub response_body: Vec<u8>,
    /// Response headers
    pub response_headers: HeaderValues,
    /// Path parameters of the matched route
    pub path_params: BTreeMap<String, String>,
    /// Route template
    pub url_path: String,
    /// Errors reported during the exchange
    pub errors: Vec<ATError>,
}

/// Parse `HTTP/<major>.<minor>`.
///
/// Falls back to [`DEFAULT_PROTOCOL_VERSION`] unless at least two numeric
/// components follow the protocol name.
pub fn parse_protocol_version(protocol: &str) -> (u32, u32) {
    let mut parts = protocol.split(['/', '.']).skip(1).map(str::parse::<u32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor))) => (major, minor),
        _ => DEFAULT_PROTOCOL_VERSION,
    }
}

/// Render a hyper version as `HTTP/<major>.<minor>`.
pub fn protocol_string(version: Version) -> String {
    let text = match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    };
    text.to_string()
}

/// Convert a duration to the payload's nanosecond count.
///
/// `Instant` already measures in nanoseconds, so the conversion factor is 1;
/// the count saturates at `u64::MAX` (about 584 years).
pub fn duration_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// Copy a header map into an owned multi-valued map.
///
/// Values keep their order; non-UTF-8 values are decoded lossily.
pub fn header_values(headers: &HeaderMap) -> HeaderValues {
    let mut values = HeaderValues::new();
    for name in headers.keys() {
        let entry = values.entry(name.as_str().to_string()).or_default();
        for value in headers.get_all(name) {
            entry.push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }
    values
}

/// Decode a raw query string into a multi-valued map.
///
/// Repeated keys accumulate in order, `+` decodes to a space and a key without
/// `=` maps to an empty value.
pub fn query_values(query: Option<&str>) -> HeaderValues {
    let mut values = HeaderValues::new();
    let Some(query) = query else {
        return values;
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        values
            .entry(decode_component(key))
            .or_default()
            .push(decode_component(value));
    }
    values
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Host of the request without port: URI authority first, then `Host`.
pub fn request_host(parts: &Parts) -> String {
    if let Some(host) = parts.uri.host() {
        return host.to_string();
    }
    parts
        .headers
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(strip_port)
        .unwrap_or_default()
}

fn strip_port(host: &str) -> String {
    // Bracketed IPv6 literals contain colons of their own
    if let Some(end) = host.find(']') {
        return host[..=end].to_string();
    }
    host.split(':').next().unwrap_or(host).to_string()
}

/// Encoded path and query, exactly as received.
pub fn raw_url(parts: &Parts) -> String {
    parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string())
}

/// `Referer` header values joined by `,`; empty if absent.
pub fn referer(headers: &HeaderMap) -> String {
    headers
        .get_all(hyper::header::REFERER)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Owned copy of a request head without its extensions.
///
/// Lets the head outlive the request handed to the inner service.
pub fn snapshot_parts(parts: &Parts) -> Parts {
    let mut snapshot = hyper::Request::new(());
    *snapshot.method_mut() = parts.method.clone();
    *snapshot.uri_mut() = parts.uri.clone();
    *snapshot.version_mut() = parts.version;
    *snapshot.headers_mut() = parts.headers.clone();
    snapshot.into_parts().0
}
