// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – errors and delivery outcomes.
//!
//! Everything that is shared between the capture pipeline, the publisher and
//! the transports is defined here.  No protocol-level logic lives in this
//! module; that sits in `middleware` (inbound), `observer` (outbound) and
//! `transport` (delivery).


use std::fmt;
use thiserror::Error;

/// Boxed error type used at the hyper service boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur inside the toolkit.
///
/// Only initialization surfaces these to the caller.  Everything raised on the
/// request path is logged and swallowed by the middleware and publisher.
#[derive(Error, Debug)]
pub enum ToolkitError {
    /// HTTP client error
    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),

    /// Client metadata could not be fetched or understood
    #[error("client metadata error: {0}")]
    Metadata(String),

    /// Transport credentials could not be constructed
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Delivery through the transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<crate::config::error::ConfigError> for ToolkitError {
    fn from(err: crate::config::error::ConfigError) -> Self {
        ToolkitError::ConfigError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ToolkitError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        ToolkitError::Credentials(e.to_string())
    }
}

/// Result of handing one payload to the transport.
///
/// Never travels back into the instrumented request; the publisher logs it and
/// returns it to callers that explicitly asked (tests, the outbound observer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The transport accepted the message.
    Delivered {
        /// Identifier assigned by the transport.
        message_id: String,
    },
    /// No transport is configured; nothing was sent.
    Skipped,
    /// The transport or serialization failed.
    Failed {
        /// Human readable reason, already logged.
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Returns true if the message reached the transport.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered { message_id } => write!(f, "delivered ({message_id})"),
            DeliveryOutcome::Skipped => write!(f, "skipped"),
            DeliveryOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
