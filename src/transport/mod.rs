// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message transports.
//!
//! The publisher only needs one capability: hand a serialized payload to a
//! pub/sub system and learn whether it was accepted.  [`Transport`] is that
//! seam; [`PubSubTransport`] is the production implementation talking to
//! Google Cloud Pub/Sub.  Implementations are shared across all concurrent
//! requests and must be internally synchronised.

mod pubsub;

#[cfg(test)]
pub(crate) mod testing;


use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::ToolkitError;

pub use pubsub::{PubSubTransport, ServiceAccountKey, DEFAULT_PUBSUB_ENDPOINT, PUBSUB_SCOPE};

/// Envelope around one serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Serialized payload
    pub data: Vec<u8>,
    /// When the publisher handed the message over
    pub publish_time: DateTime<Utc>,
    /// Extra string attributes
    pub attributes: HashMap<String, String>,
}

impl TransportMessage {
    /// Wrap `data`, stamping the current UTC time.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            publish_time: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A pub/sub publisher.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Publish one message; returns the transport's message id.
    async fn publish(&self, message: TransportMessage) -> Result<String, ToolkitError>;

    /// Transport name for logging.
    fn name(&self) -> &str;
}
