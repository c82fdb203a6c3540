// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Echo server instrumented with the toolkit.
//!
//!  Build it with `cargo build --release --bin apitoolkit-echo`
//!  Configuration comes from `APITOOLKIT_*` environment variables and, when
//!  set, the file named by APITOOLKIT_CONFIG_FILE.  The listen address is
//!  read from APITOOLKIT_ECHO_ADDR (default 127.0.0.1:8080).

use std::convert::Infallible;
use std::env;
use std::error::Error;

use apitoolkit::{error_fmt, info_fmt, report_error, Toolkit};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;
use tokio::signal;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug)]
struct InvalidJson(String);

impl std::fmt::Display for InvalidJson {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request body is not JSON: {}", self.0)
    }
}

impl Error for InvalidJson {}

/// Echo the body back; JSON requests that fail to parse are reported.
async fn echo(request: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
    let is_json = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let body = match request.body().clone().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    if is_json {
        if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
            report_error(&request, &InvalidJson(e.to_string())).await;
            let mut response = Response::new(Full::new(Bytes::from_static(b"invalid json")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    }

    let mut response = Response::new(Full::new(body));
    if let Some(content_type) = request.headers().get("content-type") {
        response.headers_mut().insert("content-type", content_type.clone());
    }
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Starting apitoolkit-echo");

    let mut loader = Toolkit::loader().with_env_vars();
    if let Ok(path) = env::var("APITOOLKIT_CONFIG_FILE") {
        println!("Using configuration from {path}");
        loader = loader.with_config_file(&path);
    }

    let toolkit = match loader.build().await {
        Ok(toolkit) => toolkit,
        Err(e) => {
            println!("Failed to initialize APItoolkit: {e}");
            return Err(e.into());
        }
    };

    let addr = env::var("APITOOLKIT_ECHO_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    info_fmt!("Echo", "listening on {}", addr);

    let service = toolkit.wrap(service_fn(echo));
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info_fmt!("Echo", "received Ctrl-C; shutting down");
                break;
            }
            accept = listener.accept() => {
                let (stream, _) = match accept {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error_fmt!("Echo", "accept failed: {}", e);
                        continue;
                    }
                };

                let service = service.clone();
                tokio::spawn(async move {
                    let builder = AutoBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), service).await {
                        error_fmt!("Echo", "connection error: {}", e);
                    }
                });
            }
        }
    }

    Ok(())
}
