// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use std::collections::BTreeMap;
use std::time::Duration;

use hyper::http::request::Parts;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::errors::{ATError, ErrorCollector};
use crate::redact::{RedactionRules, REDACTED};
use crate::transport::testing::RecordingTransport;

const SERVICE_ACCOUNT: &str = include_str!("../../tests/fixtures/service_account.json");

fn metadata() -> ClientMetadata {
    ClientMetadata {
        project_id: "project-123".to_string(),
        pubsub_project_id: "pubsub-project".to_string(),
        topic_id: "apitoolkit-events".to_string(),
        pubsub_push_service_account: json!({}),
    }
}

fn client_with(config: ToolkitConfig, transport: Option<Arc<RecordingTransport>>) -> Client {
    Client::from_parts(
        config,
        Some(metadata()),
        transport.map(|t| t as Arc<dyn Transport>),
    )
}

fn request_parts(uri: &str) -> Parts {
    Request::get(uri)
        .header("host", "api.example.com:443")
        .header("Authorization", "Bearer secret")
        .header("referer", "https://example.com/")
        .body(())
        .unwrap()
        .into_parts()
        .0
}

fn metadata_body() -> Value {
    let account: Value = serde_json::from_str(SERVICE_ACCOUNT).unwrap();
    json!({
        "project_id": "project-123",
        "pubsub_project_id": "pubsub-project",
        "topic_id": "apitoolkit-events",
        "pubsub_push_service_account": account
    })
}

#[tokio::test]
async fn test_initialize_fetches_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CLIENT_METADATA_PATH))
        .and(header("authorization", "Bearer my-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = ToolkitConfig::new("my-api-key");
    config.root_url = Some(server.uri());

    let client = Client::initialize(config).await.unwrap();
    assert_eq!(client.metadata().unwrap().project_id, "project-123");
    assert_eq!(client.metadata().unwrap().topic_id, "apitoolkit-events");
    assert!(client.has_transport());
}

#[tokio::test]
async fn test_initialize_fails_on_non_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CLIENT_METADATA_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let mut config = ToolkitConfig::new("wrong-key");
    config.root_url = Some(server.uri());

    match Client::initialize(config).await {
        Err(ToolkitError::Metadata(msg)) => assert!(msg.contains("401")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_initialize_fails_on_malformed_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CLIENT_METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"project_id": "p"})))
        .mount(&server)
        .await;

    let mut config = ToolkitConfig::new("key");
    config.root_url = Some(server.uri());

    assert!(matches!(
        Client::initialize(config).await,
        Err(ToolkitError::Metadata(_))
    ));
}

#[tokio::test]
async fn test_initialize_fails_on_bad_credentials() {
    let server = MockServer::start().await;
    let mut body = metadata_body();
    body["pubsub_push_service_account"] = json!({"client_email": "a@b.c", "private_key": "nope"});
    Mock::given(method("GET"))
        .and(path(CLIENT_METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let mut config = ToolkitConfig::new("key");
    config.root_url = Some(server.uri());

    assert!(matches!(
        Client::initialize(config).await,
        Err(ToolkitError::Credentials(_))
    ));
}

#[tokio::test]
async fn test_initialize_requires_api_key() {
    let err = Client::initialize(ToolkitConfig::default()).await.unwrap_err();
    assert!(matches!(err, ToolkitError::ConfigError(_)));
}

#[tokio::test]
async fn test_initialize_rejects_unparseable_redaction_path() {
    let mut config = ToolkitConfig::new("key");
    config.redact_request_body = vec!["$.card[1:2:0]".to_string()];
    let err = Client::initialize(config).await.unwrap_err();
    assert!(matches!(err, ToolkitError::ConfigError(_)));
}

#[test]
fn test_build_payload_path_and_query() {
    let client = client_with(ToolkitConfig::new("key"), None);
    let parts = request_parts("/path/to/resource?param1=value1&param2=value2");

    let mut path_params = BTreeMap::new();
    path_params.insert("id".to_string(), "123".to_string());

    let payload = client.build_payload(CapturedExchange {
        elapsed: Duration::from_millis(5),
        request: Some(&parts),
        status_code: 200,
        path_params,
        url_path: "/path/to/resource/{id}".to_string(),
        ..Default::default()
    });

    assert_eq!(payload.raw_url, "/path/to/resource?param1=value1&param2=value2");
    assert_eq!(payload.url_path, "/path/to/resource/{id}");
    assert_eq!(payload.path_params.get("id").map(String::as_str), Some("123"));
    assert_eq!(payload.query_params["param1"], vec!["value1"]);
    assert_eq!(payload.query_params["param2"], vec!["value2"]);
    assert_eq!(payload.method, "GET");
    assert_eq!(payload.host, "api.example.com");
    assert_eq!(payload.referer, "https://example.com/");
    assert_eq!(payload.project_id, "project-123");
    assert_eq!(payload.sdk_type, "RustHyper");
    assert_eq!((payload.proto_major, payload.proto_minor), (1, 1));
    assert_eq!(payload.duration, 5_000_000);
    assert_eq!(payload.status_code, 200);
}

#[test]
fn test_build_payload_applies_redaction() {
    let mut config = ToolkitConfig::new("key");
    config.redact_headers = vec!["authorization".to_string(), "set-cookie".to_string()];
    config.redact_request_body = vec!["$.password".to_string()];
    config.redact_response_body = vec!["$.token".to_string()];
    let client = client_with(config, None);
    let parts = request_parts("/login");

    let mut response_headers = crate::redact::HeaderValues::new();
    response_headers.insert("Set-Cookie".to_string(), vec!["a=1".to_string(), "b=2".to_string()]);
    response_headers.insert("content-type".to_string(), vec!["application/json".to_string()]);

    let payload = client.build_payload(CapturedExchange {
        request: Some(&parts),
        request_body: br#"{"user":"ann","password":"hunter2"}"#.to_vec(),
        response_body: br#"{"token":"abc"}"#.to_vec(),
        response_headers,
        ..Default::default()
    });

    assert_eq!(payload.request_headers["authorization"], vec![REDACTED]);
    assert_eq!(payload.response_headers["Set-Cookie"], vec![REDACTED]);
    assert_eq!(payload.response_headers["content-type"], vec!["application/json"]);

    let request_body: Value = serde_json::from_slice(&payload.request_body).unwrap();
    assert_eq!(request_body, json!({"user": "ann", "password": REDACTED}));
    let response_body: Value = serde_json::from_slice(&payload.response_body).unwrap();
    assert_eq!(response_body, json!({"token": REDACTED}));
}

#[test]
fn test_build_payload_with_custom_rules_and_sdk_type() {
    let client = client_with(ToolkitConfig::new("key"), None);
    let parts = request_parts("/x");
    let rules = RedactionRules {
        headers: vec!["referer".to_string()],
        ..Default::default()
    };

    let payload = client.build_payload_with(
        &rules.compile_lenient(),
        CapturedExchange {
            sdk_type: "RustOutgoing".to_string(),
            request: Some(&parts),
            ..Default::default()
        },
    );

    assert_eq!(payload.sdk_type, "RustOutgoing");
    assert_eq!(payload.request_headers["referer"], vec![REDACTED]);
    assert_eq!(payload.request_headers["authorization"], vec!["Bearer secret"]);
}

#[test]
fn test_build_payload_guards() {
    let parts = request_parts("/x");

    let without_metadata = Client::from_parts(ToolkitConfig::new("key"), None, None);
    let payload = without_metadata.build_payload(CapturedExchange {
        request: Some(&parts),
        status_code: 200,
        ..Default::default()
    });
    assert_eq!(payload, Payload::default());

    let with_metadata = client_with(ToolkitConfig::new("key"), None);
    let payload = with_metadata.build_payload(CapturedExchange {
        status_code: 200,
        ..Default::default()
    });
    assert_eq!(payload, Payload::default());
}

#[test]
fn test_build_payload_carries_errors() {
    let client = client_with(ToolkitConfig::new("key"), None);
    let parts = request_parts("/x");
    let payload = client.build_payload(CapturedExchange {
        request: Some(&parts),
        errors: vec![ATError::new("Boom", "it broke")],
        ..Default::default()
    });
    assert_eq!(payload.errors.len(), 1);
    assert_eq!(payload.errors[0].error_type, "Boom");
}

#[tokio::test]
async fn test_publish_without_transport_is_skipped() {
    let mut config = ToolkitConfig::new("key");
    config.debug = true;
    let client = client_with(config, None);
    assert_eq!(client.publish_message(&Payload::default()).await, DeliveryOutcome::Skipped);
}

#[tokio::test]
async fn test_publish_delivers_serialized_payload() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = ToolkitConfig::new("key");
    config.verbose_debug = true;
    let client = client_with(config, Some(transport.clone()));

    let payload = Payload {
        method: "POST".to_string(),
        status_code: 201,
        ..Default::default()
    };
    let outcome = client.publish_message(&payload).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { message_id: "msg-1".to_string() });
    assert_eq!(transport.payloads().await, vec![payload]);
}

#[test]
fn test_payload_logging_needs_both_debug_flags() {
    let mut config = ToolkitConfig::new("key");
    config.verbose_debug = true;
    assert!(!client_with(config.clone(), None).logs_payloads());

    config.debug = true;
    assert!(client_with(config.clone(), None).logs_payloads());

    config.verbose_debug = false;
    assert!(!client_with(config, None).logs_payloads());
}

#[test]
fn test_invalid_redaction_paths_are_left_out() {
    let mut config = ToolkitConfig::new("key");
    config.redact_request_body = vec!["$[".to_string(), "$['a','b']".to_string()];
    let client = client_with(config, None);
    let parts = request_parts("/x");

    let payload = client.build_payload(CapturedExchange {
        request: Some(&parts),
        request_body: br#"{"a":1,"b":2,"c":3}"#.to_vec(),
        ..Default::default()
    });

    let request_body: Value = serde_json::from_slice(&payload.request_body).unwrap();
    assert_eq!(request_body, json!({"a": REDACTED, "b": REDACTED, "c": 3}));
}

#[tokio::test]
async fn test_publish_failure_is_reported_not_raised() {
    let transport = Arc::new(RecordingTransport::failing());
    let client = client_with(ToolkitConfig::new("key"), Some(transport));

    match client.publish_message(&Payload::default()).await {
        DeliveryOutcome::Failed { reason } => assert!(reason.contains("simulated outage")),
        other => panic!("unexpected outcome: {other}"),
    }
}

#[tokio::test]
async fn test_dispatch_await_returns_outcome() {
    let transport = Arc::new(RecordingTransport::default());
    let client = Arc::new(client_with(ToolkitConfig::new("key"), Some(transport.clone())));

    let outcome = client.dispatch(Payload::default()).await;
    assert!(outcome.unwrap().is_delivered());
    assert_eq!(transport.payloads().await.len(), 1);
}

#[tokio::test]
async fn test_dispatch_detached_publishes_once() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = ToolkitConfig::new("key");
    config.delivery = DeliveryMode::Detached;
    let client = Arc::new(client_with(config, Some(transport.clone())));

    assert!(client.dispatch(Payload::default()).await.is_none());

    for _ in 0..50 {
        if !transport.payloads().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.payloads().await.len(), 1);
}

#[tokio::test]
async fn test_report_error_uses_request_collector() {
    let client = client_with(ToolkitConfig::new("key"), None);
    let collector = ErrorCollector::new();
    let mut request = Request::new(());
    request.extensions_mut().insert(collector.clone());

    let err = std::io::Error::other("disk full");
    assert!(client.report_error(&request, &err).await);
    assert_eq!(collector.snapshot().await[0].message, "disk full");
}
