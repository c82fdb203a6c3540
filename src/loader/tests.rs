// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use std::collections::HashMap;
use std::env;
use std::io::Write;

use serde_json::{json, Value};
use serial_test::serial;
use tempfile::Builder;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::client::CLIENT_METADATA_PATH;
use crate::config::DeliveryMode;

const SERVICE_ACCOUNT: &str = include_str!("../../tests/fixtures/service_account.json");

#[derive(Debug)]
struct MockConfigProvider {
    values: HashMap<String, Value>,
}

impl MockConfigProvider {
    fn new(values: &[(&str, Value)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl ConfigProvider for MockConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

async fn metadata_server(api_key: &str) -> MockServer {
    let server = MockServer::start().await;
    let account: Value = serde_json::from_str(SERVICE_ACCOUNT).unwrap();
    Mock::given(method("GET"))
        .and(path(CLIENT_METADATA_PATH))
        .and(header("authorization", format!("Bearer {api_key}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "project_id": "project-123",
            "pubsub_project_id": "pubsub-project",
            "topic_id": "apitoolkit-events",
            "pubsub_push_service_account": account
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_build_from_provider() {
    let server = metadata_server("provider-key").await;
    let provider = MockConfigProvider::new(&[
        ("apitoolkit.api_key", json!("provider-key")),
        ("apitoolkit.root_url", json!(server.uri())),
        ("apitoolkit.delivery", json!("detached")),
        ("apitoolkit.routes", json!(["/users/{id}", "/orders/{order_id}"])),
    ]);

    let toolkit = Toolkit::loader()
        .with_provider(provider)
        .with_route("/health")
        .build()
        .await
        .unwrap();

    assert_eq!(toolkit.client().config().delivery, DeliveryMode::Detached);
    assert_eq!(toolkit.client().metadata().unwrap().project_id, "project-123");
    assert!(toolkit.client().has_transport());
    assert_eq!(toolkit.routes().len(), 3);
    assert_eq!(
        toolkit.routes().resolve("/orders/77").unwrap().params["order_id"],
        "77"
    );
    assert_eq!(toolkit.config().provider_names(), vec!["mock"]);
}

#[tokio::test]
async fn test_build_from_config_file() {
    let server = metadata_server("file-key").await;
    let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        "apitoolkit:\n  api_key: file-key\n  root_url: {}\n  redact_headers: authorization, cookie\n  routes:\n    - /items/{{id}}\n",
        server.uri()
    )
    .unwrap();

    let toolkit = ToolkitLoader::new()
        .with_config_file(file.path().to_str().unwrap())
        .build()
        .await
        .unwrap();

    assert_eq!(
        toolkit.client().config().redact_headers,
        vec!["authorization", "cookie"]
    );
    assert_eq!(toolkit.routes().len(), 1);
}

#[tokio::test]
async fn test_explicit_config_skips_layered_toolkit_section() {
    let server = metadata_server("explicit-key").await;
    let mut config = ToolkitConfig::new("explicit-key");
    config.root_url = Some(server.uri());

    let toolkit = ToolkitLoader::new()
        .with_config(config)
        .with_provider(MockConfigProvider::new(&[
            ("apitoolkit.api_key", json!("ignored")),
        ]))
        .build()
        .await
        .unwrap();

    assert_eq!(toolkit.client().config().api_key, "explicit-key");
}

#[tokio::test]
#[serial]
async fn test_env_overrides_provider_stack() {
    let server = metadata_server("env-key").await;
    unsafe {
        env::set_var("APITOOLKIT_TEST_API_KEY", "env-key");
        env::set_var("APITOOLKIT_TEST_ROOT_URL", server.uri());
    }

    let result = ToolkitLoader::new()
        .with_env_prefix("APITOOLKIT_TEST_")
        .build()
        .await;

    unsafe {
        env::remove_var("APITOOLKIT_TEST_API_KEY");
        env::remove_var("APITOOLKIT_TEST_ROOT_URL");
    }

    let toolkit = result.unwrap();
    assert_eq!(toolkit.client().config().api_key, "env-key");
}

#[tokio::test]
async fn test_missing_file_is_config_error() {
    let result = ToolkitLoader::new()
        .with_config_file("does-not-exist.toml")
        .build()
        .await;
    assert!(matches!(result, Err(LoaderError::ConfigError(_))));
}

#[tokio::test]
async fn test_missing_api_key_fails() {
    let result = ToolkitLoader::new().build().await;
    assert!(matches!(result, Err(LoaderError::ToolkitError(ToolkitError::ConfigError(_)))));
}

#[tokio::test]
async fn test_invalid_route_template_fails() {
    let result = ToolkitLoader::new()
        .with_config(ToolkitConfig::new("key"))
        .with_route("/pairs/{id}/{id}")
        .build()
        .await;
    assert!(matches!(result, Err(LoaderError::ToolkitError(ToolkitError::ConfigError(_)))));
}

#[tokio::test]
async fn test_rejected_api_key_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CLIENT_METADATA_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut config = ToolkitConfig::new("revoked");
    config.root_url = Some(server.uri());

    let result = ToolkitLoader::new().with_config(config).build().await;
    assert!(matches!(result, Err(LoaderError::ToolkitError(ToolkitError::Metadata(_)))));
}

#[test]
fn test_logging_config_field_overrides() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new(&[
            ("apitoolkit.logging", json!({"format": "json", "level": "warn"})),
        ]))
        .with_provider(MockConfigProvider::new(&[
            ("apitoolkit.logging.level", json!("debug")),
        ]))
        .build();

    let logging = logging_config(&config).unwrap();
    assert_eq!(logging.format, "json");
    assert_eq!(logging.level, "debug");
    assert!(!logging.structured);
}

#[test]
fn test_logging_config_defaults() {
    let logging = logging_config(&Config::default()).unwrap();
    assert_eq!(logging, LoggingConfig::default());
}
