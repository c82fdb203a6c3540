// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound capture middleware.
//!
//! [`ToolkitService`] wraps any hyper service and publishes one payload per
//! exchange.  Per request it:
//!
//! 1. starts the timer and buffers the inbound body, so the inner service
//!    receives the complete body from position zero (a body that fails to
//!    read is published with status 400 and the error is returned);
//! 2. inserts a fresh [`ErrorCollector`] into the request extensions;
//! 3. calls the inner service;
//! 4. buffers the response body and rebuilds the response from the same head
//!    and bytes, so the client receives exactly what the service produced;
//! 5. builds the payload and dispatches it before returning the response.
//!
//! Step 4 and 5 run on every exit path.  An inner error is recorded
//! (status 500, empty body) and returned unchanged.  If the future is
//! dropped before completing, a partial payload with status 499 is published
//! from a spawned task.


use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::http::request::Parts;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use tokio::time::Instant;

use crate::client::Client;
use crate::core::BoxError;
use crate::errors::{ATError, ErrorCollector};
use crate::payload::{header_values, snapshot_parts, CapturedExchange};
use crate::router::{MatchedRoute, RouteTable};
use crate::{debug_fmt, trace_fmt};

/// Status recorded when the host drops the request before it completes.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Hyper service that captures and publishes every exchange.
pub struct ToolkitService<S> {
    inner: Arc<S>,
    client: Arc<Client>,
    routes: Arc<RouteTable>,
}

impl<S> Clone for ToolkitService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            client: Arc::clone(&self.client),
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<S> std::fmt::Debug for ToolkitService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolkitService")
            .field("client", &self.client)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl<S> ToolkitService<S> {
    /// Wrap `inner`, publishing through `client`.
    pub fn new(inner: S, client: Arc<Client>) -> Self {
        Self {
            inner: Arc::new(inner),
            client,
            routes: Arc::new(RouteTable::default()),
        }
    }

    /// Resolve route templates with `routes` when the inner service does
    /// not report a [`MatchedRoute`].
    pub fn with_routes(mut self, routes: Arc<RouteTable>) -> Self {
        self.routes = routes;
        self
    }

    /// The wrapped service.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, B, ResBody> Service<Request<B>> for ToolkitService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<B>) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        let client = Arc::clone(&self.client);
        let routes = Arc::clone(&self.routes);

        Box::pin(async move {
            let start = Instant::now();
            let (parts, body) = request.into_parts();
            let head = snapshot_parts(&parts);

            let (request_body, read_error) = collect_partial(body).await;
            let fallback_route = routes.resolve(head.uri.path());
            let collector = ErrorCollector::new();

            if let Some(error) = read_error {
                // A truncated body cannot be replayed; record what arrived
                debug_fmt!("Middleware", "failed to read request body: {}", error);
                collector.push(ATError::from_dyn(error.as_ref())).await;

                let route = fallback_route.unwrap_or_else(|| MatchedRoute::new(head.uri.path()));
                let payload = client.build_payload(CapturedExchange {
                    sdk_type: client.config().sdk_type.clone(),
                    elapsed: start.elapsed(),
                    request: Some(&head),
                    status_code: StatusCode::BAD_REQUEST.as_u16(),
                    request_body: request_body.to_vec(),
                    path_params: route.params,
                    url_path: route.template,
                    errors: collector.drain().await,
                    ..Default::default()
                });
                client.dispatch(payload).await;
                return Err(error);
            }

            let mut guard = CaptureGuard::arm(
                Arc::clone(&client),
                snapshot_parts(&head),
                request_body.clone(),
                collector.clone(),
                start,
                fallback_route.clone(),
            );

            let mut forwarded = Request::from_parts(parts, Full::new(request_body.clone()));
            forwarded.extensions_mut().insert(collector.clone());

            let result = inner.call(forwarded).await.map_err(Into::<BoxError>::into);

            let (outcome, capture) = match result {
                Ok(response) => {
                    let (response_parts, body) = response.into_parts();
                    let route = response_parts
                        .extensions
                        .get::<MatchedRoute>()
                        .cloned()
                        .or(fallback_route);

                    match body.collect().await.map_err(Into::<BoxError>::into) {
                        Ok(collected) => {
                            let bytes = collected.to_bytes();
                            let capture = ResponseCapture {
                                status_code: response_parts.status.as_u16(),
                                headers: header_values(&response_parts.headers),
                                body: bytes.to_vec(),
                                route,
                            };
                            (Ok(Response::from_parts(response_parts, Full::new(bytes))), capture)
                        }
                        Err(error) => {
                            debug_fmt!("Middleware", "failed to read response body: {}", error);
                            collector.push(ATError::from_dyn(error.as_ref())).await;

                            let mut failed = Response::new(Full::new(Bytes::new()));
                            *failed.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            let capture = ResponseCapture {
                                status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                                headers: header_values(failed.headers()),
                                body: Vec::new(),
                                route,
                            };
                            (Ok(failed), capture)
                        }
                    }
                }
                Err(error) => {
                    collector.push(ATError::from_dyn(error.as_ref())).await;
                    let capture = ResponseCapture {
                        status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                        headers: Default::default(),
                        body: Vec::new(),
                        route: fallback_route,
                    };
                    (Err(error), capture)
                }
            };

            guard.disarm();

            let errors = collector.drain().await;
            let route = capture.route.unwrap_or_else(|| MatchedRoute::new(head.uri.path()));
            let payload = client.build_payload(CapturedExchange {
                sdk_type: client.config().sdk_type.clone(),
                elapsed: start.elapsed(),
                request: Some(&head),
                status_code: capture.status_code,
                request_body: request_body.to_vec(),
                response_body: capture.body,
                response_headers: capture.headers,
                path_params: route.params,
                url_path: route.template,
                errors,
            });

            trace_fmt!("Middleware", "{} {} -> {}", head.method, head.uri, payload.status_code);
            client.dispatch(payload).await;

            outcome
        })
    }
}

/// Collect `body`, keeping the bytes that arrived before a read failure.
async fn collect_partial<B>(body: B) -> (Bytes, Option<BoxError>)
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut buffer = BytesMut::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    buffer.put(data);
                }
            }
            Err(error) => return (buffer.freeze(), Some(error.into())),
        }
    }
    (buffer.freeze(), None)
}

struct ResponseCapture {
    status_code: u16,
    headers: crate::redact::HeaderValues,
    body: Vec<u8>,
    route: Option<MatchedRoute>,
}

struct PendingCapture {
    head: Parts,
    request_body: Bytes,
    collector: ErrorCollector,
    start: Instant,
    route: Option<MatchedRoute>,
}

/// Publishes a partial payload if the request future is dropped mid-flight.
struct CaptureGuard {
    client: Arc<Client>,
    pending: Option<PendingCapture>,
}

impl CaptureGuard {
    fn arm(
        client: Arc<Client>,
        head: Parts,
        request_body: Bytes,
        collector: ErrorCollector,
        start: Instant,
        route: Option<MatchedRoute>,
    ) -> Self {
        Self {
            client,
            pending: Some(PendingCapture {
                head,
                request_body,
                collector,
                start,
                route,
            }),
        }
    }

    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug_fmt!("Middleware", "request cancelled outside a runtime; payload dropped");
            return;
        };

        let client = Arc::clone(&self.client);
        runtime.spawn(async move {
            let errors = pending.collector.drain().await;
            let route = pending
                .route
                .unwrap_or_else(|| MatchedRoute::new(pending.head.uri.path()));
            let payload = client.build_payload(CapturedExchange {
                sdk_type: client.config().sdk_type.clone(),
                elapsed: pending.start.elapsed(),
                request: Some(&pending.head),
                status_code: CLIENT_CLOSED_REQUEST,
                request_body: pending.request_body.to_vec(),
                path_params: route.params,
                url_path: route.template,
                errors,
                ..Default::default()
            });
            let outcome = client.publish_message(&payload).await;
            debug_fmt!("Middleware", "cancelled request payload {}", outcome);
        });
    }
}
