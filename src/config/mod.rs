// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration subsystem
//!
//! Settings are read from an ordered list of [`ConfigProvider`]s; later
//! providers override earlier ones.  The usual stack is:
//!
//! 1. `FileConfigProvider` – `apitoolkit.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  – `APITOOLKIT_API_KEY=…`, `APITOOLKIT_LOGGING__LEVEL=debug`
//! 3. *your* provider implementing [`ConfigProvider`]
//!
//! All toolkit keys live under the `apitoolkit` section:
//!
//! | key | type | default | description |
//! |-----|------|---------|-------------|
//! | `apitoolkit.api_key`              | string   | –            | Bearer token for the metadata endpoint |
//! | `apitoolkit.root_url`             | string   | `https://app.apitoolkit.io` | Metadata endpoint base URL |
//! | `apitoolkit.debug`                | bool     | `false`      | Log delivery notices |
//! | `apitoolkit.verbose_debug`        | bool     | `false`      | Also log every serialized payload |
//! | `apitoolkit.redact_headers`       | string[] | `[]`         | Header names to redact |
//! | `apitoolkit.redact_request_body`  | string[] | `[]`         | JSON paths redacted in request bodies |
//! | `apitoolkit.redact_response_body` | string[] | `[]`         | JSON paths redacted in response bodies |
//! | `apitoolkit.delivery`             | `await` \| `detached` | `await` | Publish policy |
//! | `apitoolkit.sdk_type`             | string   | `RustHyper`  | Source tag on inbound payloads |
//! | `apitoolkit.routes`               | string[] | `[]`         | Route templates for path parameters |
//! | `apitoolkit.logging`              | object   | see [`LoggingConfig`](crate::logging::config::LoggingConfig) | Log backend |

mod env;
pub mod error;
mod file;
mod toolkit;

#[cfg(test)]
mod tests;

pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};
pub use toolkit::{DeliveryMode, ToolkitConfig, DEFAULT_ROOT_URL, DEFAULT_SDK_TYPE};
pub(crate) use toolkit::string_list;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Configuration source.
///
/// Object-safe; typed access lives in [`ConfigProviderExt`].
pub trait ConfigProvider: Debug + Send + Sync {
    /// Check if the provider has a value for `key`.
    fn has(&self, key: &str) -> bool;

    /// Provider name, for diagnostics.
    fn provider_name(&self) -> &str;

    /// Get a raw value by dot-separated key.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

/// Typed access on top of [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a value by key and deserialize it.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => deserialize_value(key, value).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

fn deserialize_value<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value)
        .map_err(|e| ConfigError::ParseError(format!("failed to deserialize '{key}': {e}")))
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; it overrides every provider added before it.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Add an already shared provider.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Layered configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        // Later providers override earlier ones
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    /// Returns true if any provider has `key`.
    pub fn has(&self, key: &str) -> bool {
        self.providers.iter().any(|p| p.has(key))
    }

    /// Get a value from the highest-priority provider that has `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => deserialize_value(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Get a value, falling back to `default` when no provider has it.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.get(key)? {
            Some(value) => Ok(value),
            None => Ok(default),
        }
    }

    /// Names of the configured providers, lowest priority first.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider_name()).collect()
    }

    /// Configuration backed by a single file.
    pub fn default_file(file_path: &str) -> Result<Self, ConfigError> {
        let provider = FileConfigProvider::new(file_path)?;
        Ok(Self::builder().with_provider(provider).build())
    }
}
