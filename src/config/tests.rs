// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use serde_json::{json, Value};
use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug)]
struct MockConfigProvider {
    values: HashMap<String, Value>,
    name: String,
}

impl MockConfigProvider {
    fn new(name: &str, values: &[(&str, Value)]) -> Self {
        Self {
            values: values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            name: name.to_string(),
        }
    }
}

impl ConfigProvider for MockConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

fn temp_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_later_provider_wins() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new(
            "first",
            &[("apitoolkit.api_key", json!("file-key")), ("apitoolkit.debug", json!(true))],
        ))
        .with_provider(MockConfigProvider::new("second", &[("apitoolkit.api_key", json!("env-key"))]))
        .build();

    assert_eq!(config.get::<String>("apitoolkit.api_key").unwrap().unwrap(), "env-key");
    assert!(config.get::<bool>("apitoolkit.debug").unwrap().unwrap());
    assert_eq!(config.provider_names(), vec!["first", "second"]);
}

#[test]
fn test_get_or_default() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("test", &[("apitoolkit.debug", json!(true))]))
        .build();

    assert!(config.get_or_default("apitoolkit.debug", false).unwrap());
    assert!(!config.get_or_default("apitoolkit.verbose_debug", false).unwrap());
}

#[test]
fn test_type_mismatch_is_parse_error() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("test", &[("apitoolkit.debug", json!("not-a-bool"))]))
        .build();

    let err = config.get::<bool>("apitoolkit.debug").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn test_file_provider_formats() {
    let json_file = temp_config(".json", r#"{"apitoolkit": {"api_key": "from-json", "logging": {"level": "debug"}}}"#);
    let toml_file = temp_config(".toml", "[apitoolkit]\napi_key = \"from-toml\"\n");
    let yaml_file = temp_config(".yaml", "apitoolkit:\n  api_key: from-yaml\n");

    for (file, expected) in [(&json_file, "from-json"), (&toml_file, "from-toml"), (&yaml_file, "from-yaml")] {
        let provider = FileConfigProvider::new(file.path().to_str().unwrap()).unwrap();
        let key: String = provider.get("apitoolkit.api_key").unwrap().unwrap();
        assert_eq!(key, expected);
    }

    let provider = FileConfigProvider::new(json_file.path().to_str().unwrap()).unwrap();
    assert_eq!(provider.format(), FileFormat::Json);
    let level: String = provider.get("apitoolkit.logging.level").unwrap().unwrap();
    assert_eq!(level, "debug");
}

#[test]
fn test_file_provider_rejects_bad_input() {
    let unknown = temp_config(".ini", "api_key = x");
    assert!(FileConfigProvider::new(unknown.path().to_str().unwrap()).is_err());

    let not_object = temp_config(".json", "[1, 2, 3]");
    assert!(FileConfigProvider::new(not_object.path().to_str().unwrap()).is_err());

    assert!(FileConfigProvider::new("/nonexistent/apitoolkit.json").is_err());
}

#[test]
fn test_toolkit_config_defaults() {
    let config = ToolkitConfig::from_config(&Config::default()).unwrap();
    assert_eq!(config, ToolkitConfig::default());
    assert_eq!(config.sdk_type, DEFAULT_SDK_TYPE);
    assert_eq!(config.delivery, DeliveryMode::Await);
    assert_eq!(config.root_url(), DEFAULT_ROOT_URL);
}

#[test]
fn test_toolkit_config_from_file() {
    let provider = FileConfigProvider::from_content(
        r#"
apitoolkit:
  api_key: abc123
  root_url: http://localhost:9000/
  debug: true
  redact_headers: [Authorization, Cookie]
  redact_request_body: ["$.password"]
  redact_response_body: "$.token, $.user.ssn"
  delivery: detached
"#,
        FileFormat::Yaml,
    )
    .unwrap();
    let config = ToolkitConfig::from_config(&Config::builder().with_provider(provider).build()).unwrap();

    assert_eq!(config.api_key, "abc123");
    assert_eq!(config.root_url(), "http://localhost:9000");
    assert!(config.debug);
    assert!(!config.verbose_debug);
    assert_eq!(config.delivery, DeliveryMode::Detached);

    let rules = config.rules();
    assert_eq!(rules.headers, vec!["Authorization", "Cookie"]);
    assert_eq!(rules.request_body, vec!["$.password"]);
    assert_eq!(rules.response_body, vec!["$.token", "$.user.ssn"]);
}

#[test]
#[serial]
fn test_env_overrides_single_field() {
    let file = FileConfigProvider::from_content(
        r#"{"apitoolkit": {"api_key": "file-key", "redact_headers": ["cookie"]}}"#,
        FileFormat::Json,
    )
    .unwrap();

    unsafe {
        env::set_var("APITOOLKIT_API_KEY", "env-key");
    }
    let config = Config::builder()
        .with_provider(file)
        .with_provider(EnvConfigProvider::default())
        .build();
    let toolkit = ToolkitConfig::from_config(&config).unwrap();
    unsafe {
        env::remove_var("APITOOLKIT_API_KEY");
    }

    assert_eq!(toolkit.api_key, "env-key");
    assert_eq!(toolkit.redact_headers, vec!["cookie"]);
}

#[test]
fn test_invalid_delivery_mode() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("test", &[("apitoolkit.delivery", json!("sometimes"))]))
        .build();
    assert!(ToolkitConfig::from_config(&config).is_err());
}

#[test]
fn test_validate() {
    assert!(matches!(
        ToolkitConfig::default().validate(),
        Err(ConfigError::NotFound(_))
    ));

    let mut config = ToolkitConfig::new("key");
    assert!(config.validate().is_ok());

    config.root_url = Some("ftp://example.com".to_string());
    assert!(matches!(config.validate(), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_validate_parses_redaction_paths() {
    let mut config = ToolkitConfig::new("key");
    config.redact_request_body = vec!["$['a','b']".to_string(), "$.list[0:2].pw".to_string()];
    assert!(config.validate().is_ok());

    config.redact_response_body = vec!["$.items[".to_string()];
    match config.validate() {
        Err(ConfigError::ParseError(message)) => assert!(message.contains("$.items[")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_debug_hides_api_key() {
    let debug = format!("{:?}", ToolkitConfig::new("super-secret"));
    assert!(!debug.contains("super-secret"));
    assert!(debug.contains("***"));
}
