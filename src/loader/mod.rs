// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry point – "turn the key and go".
//!
//! The [`ToolkitLoader`] layers configuration, installs logging, fetches the
//! client metadata and returns a [`Toolkit`] ready to wrap services and
//! outbound clients:
//!
//! ```rust,no_run
//! use apitoolkit::Toolkit;
//!
//! # async fn run() -> Result<(), apitoolkit::LoaderError> {
//! let toolkit = Toolkit::loader()
//!     .with_config_file("apitoolkit.yaml")
//!     .with_env_vars()
//!     .with_route("/users/{id}")
//!     .build()
//!     .await?;
//! # let _ = toolkit;
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
mod tests;

use std::sync::Arc;

use thiserror::Error;

use crate::client::Client;
use crate::config::{
    string_list, Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider,
    ToolkitConfig,
};
use crate::core::ToolkitError;
use crate::logging::config::LoggingConfig;
use crate::logging::init_with_config;
use crate::middleware::ToolkitService;
use crate::observer::{HttpSend, ObservingClient, OutgoingOptions};
use crate::router::RouteTable;
use crate::info_fmt;

const ROUTES_KEY: &str = "apitoolkit.routes";
const LOGGING_KEY: &str = "apitoolkit.logging";

/// Errors that can occur while loading the toolkit.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Client initialization error
    #[error("toolkit error: {0}")]
    ToolkitError(#[from] ToolkitError),
}

/// Builder for a [`Toolkit`].
#[derive(Debug, Default)]
pub struct ToolkitLoader {
    toolkit_config: Option<ToolkitConfig>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    routes: Vec<String>,
}

impl ToolkitLoader {
    /// Create a loader with no configuration sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` as is; layered sources are then only read for routes and
    /// logging.
    pub fn with_config(mut self, config: ToolkitConfig) -> Self {
        self.toolkit_config = Some(config);
        self
    }

    /// Read a configuration file (`.toml`, `.json` or `.yaml`).
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Read `APITOOLKIT_*` environment variables.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Read environment variables with a custom prefix.
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a custom provider; it overrides the file and the environment.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Register a route template used to extract path parameters.
    pub fn with_route(mut self, template: impl Into<String>) -> Self {
        self.routes.push(template.into());
        self
    }

    /// Register several route templates.
    pub fn with_routes<I, T>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.routes.extend(templates.into_iter().map(Into::into));
        self
    }

    fn layered_config(&self) -> Result<Config, ConfigError> {
        let mut builder = Config::builder();

        if let Some(file_path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(file_path)?);
        }

        if self.use_env_vars {
            let env_provider = match &self.env_prefix {
                Some(prefix) => EnvConfigProvider::new(prefix),
                None => EnvConfigProvider::default(),
            };
            builder = builder.with_provider(env_provider);
        }

        for provider in &self.providers {
            builder = builder.with_shared_provider(Arc::clone(provider));
        }

        Ok(builder.build())
    }

    /// Install logging, initialize the client and compile the route table.
    pub async fn build(self) -> Result<Toolkit, LoaderError> {
        let config = self.layered_config()?;

        init_with_config(&logging_config(&config)?);

        let toolkit_config = match self.toolkit_config {
            Some(toolkit_config) => toolkit_config,
            None => ToolkitConfig::from_config(&config)?,
        };

        let mut templates = string_list(&config, ROUTES_KEY)?;
        templates.extend(self.routes);
        let routes = RouteTable::new(templates)?;

        let client = Client::initialize(toolkit_config).await?;

        info_fmt!(
            "Loader",
            "APItoolkit ready: {} route template(s), delivery {}",
            routes.len(),
            client.config().delivery
        );

        Ok(Toolkit {
            config: Arc::new(config),
            client: Arc::new(client),
            routes: Arc::new(routes),
        })
    }
}

/// Read `apitoolkit.logging`, letting single fields be overridden, e.g. by
/// `APITOOLKIT_LOGGING__LEVEL`.
fn logging_config(config: &Config) -> Result<LoggingConfig, ConfigError> {
    let mut logging: LoggingConfig = config.get(LOGGING_KEY)?.unwrap_or_default();

    if let Some(structured) = config.get(&format!("{LOGGING_KEY}.structured"))? {
        logging.structured = structured;
    }
    if let Some(format) = config.get(&format!("{LOGGING_KEY}.format"))? {
        logging.format = format;
    }
    if let Some(level) = config.get(&format!("{LOGGING_KEY}.level"))? {
        logging.level = level;
    }

    Ok(logging)
}

/// An initialized toolkit: the shared client plus the route table.
#[derive(Debug, Clone)]
pub struct Toolkit {
    config: Arc<Config>,
    client: Arc<Client>,
    routes: Arc<RouteTable>,
}

impl Toolkit {
    /// Create a new loader.
    pub fn loader() -> ToolkitLoader {
        ToolkitLoader::new()
    }

    /// Assemble a toolkit from an already initialized client.
    pub fn from_client(client: Arc<Client>, routes: RouteTable) -> Self {
        Self {
            config: Arc::new(Config::default()),
            client,
            routes: Arc::new(routes),
        }
    }

    /// The layered configuration the toolkit was loaded from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared client.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// The compiled route templates.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Wrap a hyper service so every exchange it handles is published.
    pub fn wrap<S>(&self, service: S) -> ToolkitService<S> {
        ToolkitService::new(service, Arc::clone(&self.client)).with_routes(Arc::clone(&self.routes))
    }

    /// Wrap an outbound sender so every call it makes is published.
    pub fn observe<C: HttpSend>(&self, inner: C, options: OutgoingOptions) -> ObservingClient<C> {
        self.client.observing_client(inner, options)
    }
}
