// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The toolkit client: payload builder and publisher.
//!
//! A [`Client`] binds the process-wide [`ToolkitConfig`] to the metadata
//! fetched at startup and to the transport payloads are published through.
//! It is created once, wrapped in an `Arc` and shared by every middleware
//! instance and outbound observer.
//!
//! Nothing on the request path returns an error: building degrades to an
//! empty payload, publishing reports a [`DeliveryOutcome`] that is logged.

mod metadata;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::Utc;
use hyper::Request;

use crate::config::{DeliveryMode, ToolkitConfig};
use crate::core::{DeliveryOutcome, ToolkitError};
use crate::errors::report_error;
use crate::observer::{HttpSend, ObservingClient, OutgoingOptions};
use crate::payload::{
    duration_nanos, header_values, parse_protocol_version, protocol_string, query_values, raw_url,
    referer, request_host, CapturedExchange, Payload,
};
use crate::redact::{redact_headers, redact_json_with, CompiledRules};
use crate::transport::{PubSubTransport, ServiceAccountKey, Transport, TransportMessage};
use crate::{debug_fmt, info_fmt, warn_fmt};

pub use metadata::{ClientMetadata, CLIENT_METADATA_PATH};

/// Toolkit client shared across requests.
#[derive(Debug)]
pub struct Client {
    config: ToolkitConfig,
    rules: CompiledRules,
    metadata: Option<ClientMetadata>,
    transport: Option<Arc<dyn Transport>>,
}

impl Client {
    /// Fetch client metadata and connect the Pub/Sub transport.
    ///
    /// This is the only fallible step of the toolkit: an invalid config,
    /// unreachable or rejecting metadata endpoint, malformed metadata or
    /// unusable credentials abort initialization.
    pub async fn initialize(config: ToolkitConfig) -> Result<Self, ToolkitError> {
        config.validate()?;

        let metadata = ClientMetadata::fetch(&config).await?;
        let key = ServiceAccountKey::from_value(&metadata.pubsub_push_service_account)?;
        let transport = PubSubTransport::new(key, &metadata.pubsub_project_id, &metadata.topic_id)?;

        info_fmt!(
            "APIToolkit",
            "client initialized for project {} (topic {})",
            metadata.project_id,
            transport.topic_path()
        );

        Ok(Self::from_parts(config, Some(metadata), Some(Arc::new(transport))))
    }

    /// Assemble a client from already available parts.
    ///
    /// Without metadata every built payload is empty; without a transport
    /// every publish is skipped.  Body paths that do not parse are logged and
    /// left out.
    pub fn from_parts(
        config: ToolkitConfig,
        metadata: Option<ClientMetadata>,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let rules = config.rules().compile_lenient();
        Self {
            config,
            rules,
            metadata,
            transport,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    /// Metadata fetched at initialization, if any.
    pub fn metadata(&self) -> Option<&ClientMetadata> {
        self.metadata.as_ref()
    }

    /// Returns true if payloads will be handed to a transport.
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Build a payload using the configured redaction rules.
    pub fn build_payload(&self, exchange: CapturedExchange<'_>) -> Payload {
        self.build_payload_with(&self.rules, exchange)
    }

    /// Build a payload using `rules`.
    ///
    /// Returns an empty payload when the exchange carries no request or the
    /// client has no metadata.
    pub fn build_payload_with(&self, rules: &CompiledRules, exchange: CapturedExchange<'_>) -> Payload {
        let (Some(request), Some(metadata)) = (exchange.request, self.metadata.as_ref()) else {
            if self.config.debug {
                info_fmt!("APIToolkit", "request or client metadata missing; payload left empty");
            }
            return Payload::default();
        };

        let (proto_major, proto_minor) = parse_protocol_version(&protocol_string(request.version));
        let sdk_type = if exchange.sdk_type.is_empty() {
            self.config.sdk_type.clone()
        } else {
            exchange.sdk_type
        };

        Payload {
            timestamp: Utc::now(),
            request_headers: redact_headers(&header_values(&request.headers), &rules.headers),
            query_params: query_values(request.uri.query()),
            path_params: exchange.path_params,
            response_headers: redact_headers(&exchange.response_headers, &rules.headers),
            method: request.method.as_str().to_string(),
            sdk_type,
            host: request_host(request),
            raw_url: raw_url(request),
            referer: referer(&request.headers),
            project_id: metadata.project_id.clone(),
            url_path: exchange.url_path,
            response_body: redact_json_with(&exchange.response_body, &rules.response_body),
            request_body: redact_json_with(&exchange.request_body, &rules.request_body),
            proto_minor,
            status_code: exchange.status_code,
            proto_major,
            duration: duration_nanos(exchange.elapsed),
            errors: exchange.errors,
        }
    }

    /// Full payloads are only logged when both debug flags are set.
    fn logs_payloads(&self) -> bool {
        self.config.debug && self.config.verbose_debug
    }

    /// Serialize `payload` and hand it to the transport.
    pub async fn publish_message(&self, payload: &Payload) -> DeliveryOutcome {
        let Some(transport) = &self.transport else {
            if self.config.debug {
                info_fmt!("APIToolkit", "topic is not initialized. Check client initialization");
            }
            return DeliveryOutcome::Skipped;
        };

        let data = match serde_json::to_vec(payload) {
            Ok(data) => data,
            Err(e) => {
                warn_fmt!("APIToolkit", "failed to serialize payload: {}", e);
                return DeliveryOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if self.logs_payloads() {
            info_fmt!("APIToolkit", "payload: {}", String::from_utf8_lossy(&data));
        }

        match transport.publish(TransportMessage::new(data)).await {
            Ok(message_id) => {
                if self.config.debug {
                    info_fmt!("APIToolkit", "message published to {} ({})", transport.name(), message_id);
                }
                DeliveryOutcome::Delivered { message_id }
            }
            Err(e) => {
                warn_fmt!("APIToolkit", "failed to publish message via {}: {}", transport.name(), e);
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Publish `payload` according to the delivery policy.
    ///
    /// Returns the outcome under [`DeliveryMode::Await`]; under
    /// [`DeliveryMode::Detached`] the publish runs on a spawned task and
    /// `None` is returned immediately.
    pub async fn dispatch(self: &Arc<Self>, payload: Payload) -> Option<DeliveryOutcome> {
        match self.config.delivery {
            DeliveryMode::Await => Some(self.publish_message(&payload).await),
            DeliveryMode::Detached => {
                let client = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = client.publish_message(&payload).await;
                    debug_fmt!("APIToolkit", "detached delivery {}", outcome);
                });
                None
            }
        }
    }

    /// Record `error` against the request it occurred in.
    ///
    /// Returns false when the request did not pass through the middleware.
    pub async fn report_error<B, E>(&self, request: &Request<B>, error: &E) -> bool
    where
        E: std::error::Error + 'static,
    {
        report_error(request, error).await
    }

    /// Wrap an outbound HTTP client so its calls are published too.
    pub fn observing_client<C: HttpSend>(self: &Arc<Self>, inner: C, options: OutgoingOptions) -> ObservingClient<C> {
        ObservingClient::new(inner, Arc::clone(self), options)
    }
}
