// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound call observation.
//!
//! [`ObservingClient`] decorates anything implementing [`HttpSend`] (a
//! `reqwest::Client` out of the box) and publishes one payload per outbound
//! call, tagged `RustOutgoing`.  The request and response pass through
//! untouched; the inner client's error, if any, is returned as is.


use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::Client;
use crate::core::ToolkitError;
use crate::errors::ATError;
use crate::payload::{header_values, snapshot_parts, CapturedExchange};
use crate::redact::{CompiledRules, RedactionRules};
use crate::trace_fmt;

/// Source tag of outbound payloads.
pub const OUTGOING_SDK_TYPE: &str = "RustOutgoing";

/// The capability of sending one fully buffered HTTP request.
#[async_trait]
pub trait HttpSend: Send + Sync {
    /// Send `request` and buffer the whole response.
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ToolkitError>;
}

#[async_trait]
impl HttpSend for reqwest::Client {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ToolkitError> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut buffered = Response::new(body);
        *buffered.status_mut() = status;
        *buffered.version_mut() = version;
        *buffered.headers_mut() = headers;
        Ok(buffered)
    }
}

#[async_trait]
impl<T: HttpSend + ?Sized> HttpSend for Arc<T> {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ToolkitError> {
        (**self).send(request).await
    }
}

/// Redaction and grouping options for outbound payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingOptions {
    /// Route template reported instead of the concrete path
    #[serde(default)]
    pub path_wildcard: Option<String>,

    /// Header names to redact
    #[serde(default)]
    pub redact_headers: Vec<String>,

    /// JSON paths redacted in request bodies
    #[serde(default)]
    pub redact_request_body: Vec<String>,

    /// JSON paths redacted in response bodies
    #[serde(default)]
    pub redact_response_body: Vec<String>,
}

impl OutgoingOptions {
    /// Report `template` as the route of every observed call.
    pub fn with_path_wildcard(mut self, template: impl Into<String>) -> Self {
        self.path_wildcard = Some(template.into());
        self
    }

    /// Redaction rules derived from the options.
    pub fn rules(&self) -> RedactionRules {
        RedactionRules {
            headers: self.redact_headers.clone(),
            request_body: self.redact_request_body.clone(),
            response_body: self.redact_response_body.clone(),
        }
    }
}

/// [`HttpSend`] decorator that publishes every call it forwards.
#[derive(Debug, Clone)]
pub struct ObservingClient<C> {
    inner: C,
    client: Arc<Client>,
    options: OutgoingOptions,
    rules: CompiledRules,
}

impl<C: HttpSend> ObservingClient<C> {
    /// Wrap `inner`, publishing through `client`.
    pub fn new(inner: C, client: Arc<Client>, options: OutgoingOptions) -> Self {
        let rules = options.rules().compile_lenient();
        Self {
            inner,
            client,
            options,
            rules,
        }
    }

    /// The wrapped sender.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: HttpSend> HttpSend for ObservingClient<C> {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ToolkitError> {
        let start = Instant::now();

        let (parts, body) = request.into_parts();
        let head = snapshot_parts(&parts);
        let request_body = body.to_vec();

        let result = self.inner.send(Request::from_parts(parts, body)).await;
        let elapsed = start.elapsed();

        let url_path = self
            .options
            .path_wildcard
            .clone()
            .unwrap_or_else(|| head.uri.path().to_string());

        let mut exchange = CapturedExchange {
            sdk_type: OUTGOING_SDK_TYPE.to_string(),
            elapsed,
            request: Some(&head),
            request_body,
            url_path,
            ..Default::default()
        };

        match &result {
            Ok(response) => {
                exchange.status_code = response.status().as_u16();
                exchange.response_headers = header_values(response.headers());
                exchange.response_body = response.body().to_vec();
            }
            Err(e) => {
                // Status 0 marks a call that produced no response
                exchange.errors.push(ATError::from_error(e));
            }
        }

        let payload = self.client.build_payload_with(&self.rules, exchange);
        trace_fmt!("Observer", "{} {} observed", head.method, head.uri);
        self.client.dispatch(payload).await;

        result
    }
}
