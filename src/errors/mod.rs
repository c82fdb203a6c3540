// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request-scoped collection of application-reported errors.
//!
//! The middleware inserts an [`ErrorCollector`] into the extensions of every
//! request it forwards.  Handlers report errors through it (or through
//! [`report_error`]) and the middleware drains the list into the payload once
//! the exchange completes.  Collectors are never shared between requests.


use std::any::type_name;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::sync::Arc;

use chrono::Utc;
use hyper::Request;
use hyper::http::Extensions;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::ToolkitError;
use crate::debug_fmt;

/// Timestamp layout of [`ATError::when`]: UTC, millisecond precision.
const WHEN_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// One application-reported error, as shipped in the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ATError {
    /// When the error was reported
    pub when: String,
    /// Type name of the reported error
    pub error_type: String,
    /// Type name of the innermost cause
    pub root_error_type: String,
    /// Display text of the reported error
    pub message: String,
    /// Display text of the innermost cause
    pub root_error_message: String,
    /// Captured backtrace, empty when backtraces are disabled
    pub stack_trace: String,
}

impl ATError {
    /// Create a record for an error whose type name is known to the caller.
    ///
    /// Root fields start out equal to the top-level fields.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let error_type = error_type.into();
        let message = message.into();
        Self {
            when: Utc::now().format(WHEN_FORMAT).to_string(),
            root_error_type: error_type.clone(),
            root_error_message: message.clone(),
            error_type,
            message,
            stack_trace: String::new(),
        }
    }

    /// Set the innermost cause.
    pub fn with_root(mut self, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        self.root_error_type = error_type.into();
        self.root_error_message = message.into();
        self
    }

    /// Attach trace text.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = trace.into();
        self
    }

    /// Capture a typed error and its cause chain.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + 'static,
    {
        Self::capture(display_type_name(type_name::<E>()), error)
    }

    /// Capture a type-erased error and its cause chain.
    pub fn from_dyn(error: &(dyn StdError + 'static)) -> Self {
        Self::capture(describe_type(error), error)
    }

    fn capture(error_type: String, error: &(dyn StdError + 'static)) -> Self {
        let mut root = error;
        let mut depth = 0;
        while let Some(source) = root.source() {
            root = source;
            depth += 1;
        }

        let mut record = Self::new(error_type, error.to_string()).with_stack_trace(capture_trace());
        if depth > 0 {
            record = record.with_root(describe_type(root), root.to_string());
        }
        record
    }
}

fn capture_trace() -> String {
    let trace = Backtrace::capture();
    match trace.status() {
        BacktraceStatus::Captured => trace.to_string(),
        _ => String::new(),
    }
}

/// Shorten a fully qualified Rust type name.
///
/// `my_app::errors::NotFound` becomes `NotFound`; generic arguments are
/// dropped.  Names whose last segment is the uninformative `Error` keep their
/// full path so `std::io::error::Error` and `serde_json::error::Error` stay
/// distinguishable.
pub(crate) fn display_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    let last = base.rsplit("::").next().unwrap_or(base);
    if last == "Error" {
        base.to_string()
    } else {
        last.to_string()
    }
}

fn named<T: 'static>() -> String {
    display_type_name(type_name::<T>())
}

/// Name the concrete type behind a `dyn Error`.
///
/// Trait objects carry no type name, so well-known error types are recognised
/// by downcasting; anything else falls back to the leading identifier of its
/// `Debug` representation.
fn describe_type(error: &(dyn StdError + 'static)) -> String {
    if error.is::<std::io::Error>() {
        return named::<std::io::Error>();
    }
    if error.is::<std::fmt::Error>() {
        return named::<std::fmt::Error>();
    }
    if error.is::<std::num::ParseIntError>() {
        return named::<std::num::ParseIntError>();
    }
    if error.is::<std::num::ParseFloatError>() {
        return named::<std::num::ParseFloatError>();
    }
    if error.is::<std::str::Utf8Error>() {
        return named::<std::str::Utf8Error>();
    }
    if error.is::<std::string::FromUtf8Error>() {
        return named::<std::string::FromUtf8Error>();
    }
    if error.is::<serde_json::Error>() {
        return named::<serde_json::Error>();
    }
    if error.is::<reqwest::Error>() {
        return named::<reqwest::Error>();
    }
    if error.is::<hyper::Error>() {
        return named::<hyper::Error>();
    }
    if error.is::<ToolkitError>() {
        return named::<ToolkitError>();
    }

    let debug = format!("{error:?}");
    let ident: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if ident.is_empty() {
        "Error".to_string()
    } else {
        ident
    }
}

/// Request-scoped error list.
///
/// Cloning yields another handle to the same list.
#[derive(Debug, Clone, Default)]
pub struct ErrorCollector {
    errors: Arc<RwLock<Vec<ATError>>>,
}

impl ErrorCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a typed error.
    pub async fn report<E>(&self, error: &E)
    where
        E: StdError + 'static,
    {
        self.push(ATError::from_error(error)).await;
    }

    /// Record an already captured error.
    pub async fn push(&self, error: ATError) {
        self.errors.write().await.push(error);
    }

    /// Number of errors reported so far.
    pub async fn len(&self) -> usize {
        self.errors.read().await.len()
    }

    /// Returns true if nothing has been reported.
    pub async fn is_empty(&self) -> bool {
        self.errors.read().await.is_empty()
    }

    /// Copy of the reported errors, in report order.
    pub async fn snapshot(&self) -> Vec<ATError> {
        self.errors.read().await.clone()
    }

    /// Take the reported errors, leaving the collector empty.
    pub async fn drain(&self) -> Vec<ATError> {
        std::mem::take(&mut *self.errors.write().await)
    }
}

/// Record `error` against the collector stored in `extensions`.
///
/// Returns false (and drops the report) when the extensions carry no
/// collector, i.e. the request did not pass through the middleware.
pub async fn report_error_in<E>(extensions: &Extensions, error: &E) -> bool
where
    E: StdError + 'static,
{
    match extensions.get::<ErrorCollector>() {
        Some(collector) => {
            collector.report(error).await;
            true
        }
        None => {
            debug_fmt!("ErrorCollector", "no collector on request; dropping report: {}", error);
            false
        }
    }
}

/// Record `error` against the request it occurred in.
pub async fn report_error<B, E>(request: &Request<B>, error: &E) -> bool
where
    E: StdError + 'static,
{
    report_error_in(request.extensions(), error).await
}
