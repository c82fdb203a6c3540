// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! APItoolkit - request/response telemetry for hyper services
//!
//! The toolkit wraps an HTTP service, captures every exchange, redacts what
//! must not leave the process and publishes the result to the APItoolkit
//! ingestion topic.  Outbound calls can be observed the same way.
//!
//! # Core Principles
//!
//! - **Transparency**: The instrumented service sees the same request and the
//!   client receives the same response as without the toolkit
//! - **Isolation**: Telemetry failures are logged, never surfaced to the caller
//! - **Configuration**: Redaction, delivery and logging are driven by layered
//!   configuration
//!
//! # Getting started
//!
//! ```rust,no_run
//! use std::convert::Infallible;
//!
//! use apitoolkit::Toolkit;
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use hyper::{Request, Response};
//! use hyper::service::service_fn;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let toolkit = Toolkit::loader()
//!     .with_env_vars()
//!     .with_route("/users/{id}")
//!     .build()
//!     .await?;
//!
//! let service = toolkit.wrap(service_fn(|_req: Request<Full<Bytes>>| async {
//!     Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"hello"))))
//! }));
//! # let _ = service;
//! # Ok(())
//! # }
//! ```
//!
//! Handlers report application errors against the current request with
//! [`report_error`]; they are attached to the published payload.

// Module declarations
pub mod client;
pub mod config;
pub mod core;
pub mod errors;
pub mod loader;
pub mod logging;
pub mod middleware;
pub mod observer;
pub mod payload;
pub mod redact;
pub mod router;
pub mod transport;

// Re-export key types at the crate root for convenience
pub use client::{Client, ClientMetadata};
pub use config::{ConfigError, ConfigProvider, ConfigProviderExt, DeliveryMode, ToolkitConfig};
pub use crate::core::{BoxError, DeliveryOutcome, ToolkitError};
pub use errors::{report_error, ATError, ErrorCollector};
pub use loader::{LoaderError, Toolkit, ToolkitLoader};
pub use middleware::ToolkitService;
pub use observer::{HttpSend, ObservingClient, OutgoingOptions};
pub use payload::Payload;
pub use redact::{CompiledRules, RedactionRules, REDACTED};
pub use router::{MatchedRoute, RouteTable};
pub use transport::{PubSubTransport, ServiceAccountKey, Transport, TransportMessage};
