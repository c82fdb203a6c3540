// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable configuration provider.
//!
//! `APITOOLKIT_API_KEY` is exposed as `apitoolkit.api_key`.  A double
//! underscore separates nesting levels, so `APITOOLKIT_LOGGING__LEVEL` becomes
//! `apitoolkit.logging.level`; single underscores stay part of the key name.

use std::collections::HashMap;
use std::env;
use serde_json::{Value, json};

use super::ConfigProvider;
use super::ConfigError;

/// Default variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "APITOOLKIT_";
/// Default key namespace the variables are mounted under.
pub const DEFAULT_ENV_NAMESPACE: &str = "apitoolkit";

/// Configuration provider backed by environment variables.
#[derive(Debug)]
pub struct EnvConfigProvider {
    /// Variable prefix, e.g. `APITOOLKIT_`
    prefix: String,
    /// Key namespace prepended to every mapped key; empty for none
    namespace: String,
    /// Mapped key to raw value
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Create a provider for `prefix`, mounting keys under the default namespace.
    pub fn new(prefix: &str) -> Self {
        Self::with_namespace(prefix, DEFAULT_ENV_NAMESPACE)
    }

    /// Create a provider for `prefix`, mounting keys under `namespace`.
    pub fn with_namespace(prefix: &str, namespace: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            namespace: namespace.to_string(),
            cache: HashMap::new(),
        };
        provider.refresh_cache();
        provider
    }

    /// Re-read the environment.
    pub fn refresh_cache(&mut self) {
        self.cache.clear();

        for (key, value) in env::vars() {
            if let Some(rest) = key.strip_prefix(&self.prefix) {
                if rest.is_empty() {
                    continue;
                }
                let config_key = self.config_key(rest);
                self.cache.insert(config_key, value);
            }
        }
    }

    fn config_key(&self, variable: &str) -> String {
        let local = variable.to_lowercase().replace("__", ".");
        if self.namespace.is_empty() {
            local
        } else {
            format!("{}.{}", self.namespace, local)
        }
    }

    /// Interpret a raw value: JSON first, then bool and number, else string.
    fn parse_value_to_json(&self, value: &str) -> Result<Value, ConfigError> {
        if let Ok(json_value) = serde_json::from_str(value) {
            return Ok(json_value);
        }

        if value.eq_ignore_ascii_case("true") {
            return Ok(json!(true));
        } else if value.eq_ignore_ascii_case("false") {
            return Ok(json!(false));
        }

        if let Ok(int_val) = value.parse::<i64>() {
            return Ok(json!(int_val));
        }

        if let Ok(float_val) = value.parse::<f64>() {
            return Ok(json!(float_val));
        }

        Ok(json!(value))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        match self.cache.get(key) {
            Some(value) => self.parse_value_to_json(value).map(Some),
            None => Ok(None),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "env"
    }
}
