// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed toolkit settings.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Config, ConfigError};
use crate::redact::RedactionRules;

/// Metadata endpoint base URL used when `root_url` is unset.
pub const DEFAULT_ROOT_URL: &str = "https://app.apitoolkit.io";
/// Source tag stamped on payloads captured by the middleware.
pub const DEFAULT_SDK_TYPE: &str = "RustHyper";

const SECTION: &str = "apitoolkit";

/// When a payload is handed to the transport relative to the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Publish before the response is returned to the host.
    #[default]
    Await,
    /// Spawn the publish and return immediately.
    Detached,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Await => write!(f, "await"),
            DeliveryMode::Detached => write!(f, "detached"),
        }
    }
}

fn default_sdk_type() -> String {
    DEFAULT_SDK_TYPE.to_string()
}

/// Process-wide toolkit settings, read-only after initialization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Log delivery notices
    #[serde(default)]
    pub debug: bool,

    /// Additionally log every serialized payload
    #[serde(default)]
    pub verbose_debug: bool,

    /// Metadata endpoint base URL
    #[serde(default)]
    pub root_url: Option<String>,

    /// Bearer token for the metadata endpoint
    #[serde(default)]
    pub api_key: String,

    /// Header names to redact, case-insensitive
    #[serde(default)]
    pub redact_headers: Vec<String>,

    /// JSON paths redacted in request bodies
    #[serde(default)]
    pub redact_request_body: Vec<String>,

    /// JSON paths redacted in response bodies
    #[serde(default)]
    pub redact_response_body: Vec<String>,

    /// Publish policy
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Source tag for inbound payloads
    #[serde(default = "default_sdk_type")]
    pub sdk_type: String,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            debug: false,
            verbose_debug: false,
            root_url: None,
            api_key: String::new(),
            redact_headers: Vec::new(),
            redact_request_body: Vec::new(),
            redact_response_body: Vec::new(),
            delivery: DeliveryMode::default(),
            sdk_type: default_sdk_type(),
        }
    }
}

impl fmt::Debug for ToolkitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolkitConfig")
            .field("debug", &self.debug)
            .field("verbose_debug", &self.verbose_debug)
            .field("root_url", &self.root_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("redact_headers", &self.redact_headers)
            .field("redact_request_body", &self.redact_request_body)
            .field("redact_response_body", &self.redact_response_body)
            .field("delivery", &self.delivery)
            .field("sdk_type", &self.sdk_type)
            .finish()
    }
}

impl ToolkitConfig {
    /// Create settings with just an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Read the `apitoolkit` section, key by key, from layered configuration.
    ///
    /// Keys are looked up individually so that an environment variable can
    /// override a single field of a file-provided section.  List values may be
    /// JSON arrays or comma-separated strings.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let key = |name: &str| format!("{SECTION}.{name}");

        let root_url: Option<String> = config.get(&key("root_url"))?;

        Ok(Self {
            debug: config.get_or_default(&key("debug"), defaults.debug)?,
            verbose_debug: config.get_or_default(&key("verbose_debug"), defaults.verbose_debug)?,
            root_url: root_url.filter(|url| !url.is_empty()),
            api_key: config.get_or_default(&key("api_key"), defaults.api_key)?,
            redact_headers: string_list(config, &key("redact_headers"))?,
            redact_request_body: string_list(config, &key("redact_request_body"))?,
            redact_response_body: string_list(config, &key("redact_response_body"))?,
            delivery: config.get_or_default(&key("delivery"), defaults.delivery)?,
            sdk_type: config.get_or_default(&key("sdk_type"), defaults.sdk_type)?,
        })
    }

    /// Check the settings needed to initialize a client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::NotFound(format!("{SECTION}.api_key")));
        }
        if let Some(url) = &self.root_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ParseError(format!(
                    "{SECTION}.root_url must be an http(s) URL, got '{url}'"
                )));
            }
        }
        self.rules()
            .compile()
            .map_err(|e| ConfigError::ParseError(format!("{SECTION} redaction rules: {e}")))?;
        Ok(())
    }

    /// Metadata endpoint base URL, without trailing slash.
    pub fn root_url(&self) -> &str {
        self.root_url
            .as_deref()
            .unwrap_or(DEFAULT_ROOT_URL)
            .trim_end_matches('/')
    }

    /// Redaction rules for inbound exchanges.
    pub fn rules(&self) -> RedactionRules {
        RedactionRules {
            headers: self.redact_headers.clone(),
            request_body: self.redact_request_body.clone(),
            response_body: self.redact_response_body.clone(),
        }
    }
}

/// Read a list that may be configured as an array or as `a,b,c`.
pub(crate) fn string_list(config: &Config, key: &str) -> Result<Vec<String>, ConfigError> {
    match config.get::<Value>(key)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(joined)) => Ok(joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Some(other) => serde_json::from_value(other)
            .map_err(|e| ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))),
    }
}
