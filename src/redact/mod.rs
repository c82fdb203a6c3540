// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field-level redaction.
//!
//! Two independent, pure transforms:
//!
//! * [`redact_json`] – structural redaction of JSON bodies addressed by
//!   [`JsonPath`] expressions.  [`RedactionRules::compile`] parses the
//!   configured paths once so requests only walk the document.
//! * [`redact_headers`] – case-insensitive redaction of header maps by key.
//!
//! Redaction replaces *values* with [`REDACTED`] and never removes keys.  A body
//! that is not valid JSON is passed through unchanged: instrumentation must
//! not break the request it observes.

pub mod jsonpath;


use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{debug_fmt, warn_fmt};
pub use jsonpath::{JsonPath, JsonPathError};

/// Sentinel written in place of every redacted value.
pub const REDACTED: &str = "[CLIENT_REDACTED]";

/// Multi-valued header or query map.  Values keep their original order.
pub type HeaderValues = BTreeMap<String, Vec<String>>;

/// The three redaction rule lists applied to one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRules {
    /// Header names, matched case-insensitively
    #[serde(default)]
    pub headers: Vec<String>,

    /// JSON paths redacted in the request body
    #[serde(default)]
    pub request_body: Vec<String>,

    /// JSON paths redacted in the response body
    #[serde(default)]
    pub response_body: Vec<String>,
}

impl RedactionRules {
    /// Parse every body path, failing on the first invalid one.
    pub fn compile(&self) -> Result<CompiledRules, JsonPathError> {
        Ok(CompiledRules {
            headers: self.headers.clone(),
            request_body: compile_paths(&self.request_body)?,
            response_body: compile_paths(&self.response_body)?,
        })
    }

    /// Parse every body path, logging a warning for each one that is
    /// invalid and leaving it out.
    pub fn compile_lenient(&self) -> CompiledRules {
        CompiledRules {
            headers: self.headers.clone(),
            request_body: compile_paths_lenient(&self.request_body),
            response_body: compile_paths_lenient(&self.response_body),
        }
    }
}

/// [`RedactionRules`] with the body paths parsed once up front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledRules {
    pub headers: Vec<String>,
    pub request_body: Vec<JsonPath>,
    pub response_body: Vec<JsonPath>,
}

fn compile_paths(paths: &[String]) -> Result<Vec<JsonPath>, JsonPathError> {
    paths.iter().map(|expr| JsonPath::parse(expr)).collect()
}

fn compile_paths_lenient(paths: &[String]) -> Vec<JsonPath> {
    paths
        .iter()
        .filter_map(|expr| match JsonPath::parse(expr) {
            Ok(path) => Some(path),
            Err(e) => {
                warn_fmt!("Redact", "ignoring redaction rule: {}", e);
                None
            }
        })
        .collect()
}

/// Redact a JSON body.
///
/// Returns `body` unchanged when `paths` is empty, `body` is empty, the body is
/// not valid JSON, or no path matched anything.  Otherwise the mutated
/// document is re-serialized with two-space indentation, preserving the input
/// key order.  Expressions that do not parse are skipped.
pub fn redact_json(body: &[u8], paths: &[String]) -> Vec<u8> {
    if paths.is_empty() || body.is_empty() {
        return body.to_vec();
    }
    redact_json_with(body, &compile_paths_lenient(paths))
}

/// Redact a JSON body with already parsed paths.
pub fn redact_json_with(body: &[u8], paths: &[JsonPath]) -> Vec<u8> {
    if paths.is_empty() || body.is_empty() {
        return body.to_vec();
    }

    let mut document: Value = match serde_json::from_slice(body) {
        Ok(doc) => doc,
        Err(e) => {
            debug_fmt!("Redact", "body is not JSON, passing through unredacted: {}", e);
            return body.to_vec();
        }
    };

    let sentinel = Value::String(REDACTED.to_string());
    let replaced: usize = paths
        .iter()
        .map(|path| path.replace_all(&mut document, &sentinel))
        .sum();

    if replaced == 0 {
        return body.to_vec();
    }

    match serde_json::to_vec_pretty(&document) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug_fmt!("Redact", "failed to re-serialize redacted body: {}", e);
            body.to_vec()
        }
    }
}

/// Redact a header map.
///
/// Every entry whose key matches one of `keys` (ignoring ASCII case) has its
/// values replaced by a single [`REDACTED`] element.  All other entries are
/// copied through with their original key casing and values.
pub fn redact_headers(headers: &HeaderValues, keys: &[String]) -> HeaderValues {
    headers
        .iter()
        .map(|(name, values)| {
            let matched = keys.iter().any(|k| k.eq_ignore_ascii_case(name));
            let values = if matched {
                vec![REDACTED.to_string()]
            } else {
                values.clone()
            };
            (name.clone(), values)
        })
        .collect()
}
