// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common helpers for the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use apitoolkit::{Client, ClientMetadata, Payload, ToolkitConfig, ToolkitError, Transport, TransportMessage};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

/// Service account key with a real RSA key, for transports that sign tokens.
#[allow(dead_code)]
pub const SERVICE_ACCOUNT: &str = include_str!("../fixtures/service_account.json");

/// Transport that keeps every payload in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<TransportMessage>>,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingTransport {
    /// A transport whose every publish fails.
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.fail.store(true, Ordering::SeqCst);
        transport
    }

    /// Published payloads, in publish order.
    pub async fn payloads(&self) -> Vec<Payload> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| serde_json::from_slice(&m.data).expect("payload JSON"))
            .collect()
    }

    /// Poll until `count` payloads arrived or a second has passed.
    pub async fn wait_for(&self, count: usize) -> Vec<Payload> {
        for _ in 0..100 {
            let payloads = self.payloads().await;
            if payloads.len() >= count {
                return payloads;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.payloads().await
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(&self, message: TransportMessage) -> Result<String, ToolkitError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ToolkitError::Transport("pubsub unavailable".to_string()));
        }
        let mut messages = self.messages.lock().await;
        messages.push(message);
        Ok(format!("msg-{}", messages.len()))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Metadata as the ingestion endpoint would return it.
pub fn test_metadata() -> ClientMetadata {
    ClientMetadata {
        project_id: "00000000-0000-0000-0000-000000000000".to_string(),
        pubsub_project_id: "pubsub-project".to_string(),
        topic_id: "apitoolkit-go-client".to_string(),
        pubsub_push_service_account: Value::Null,
    }
}

/// Client publishing into `transport`.
pub fn test_client(config: ToolkitConfig, transport: Arc<RecordingTransport>) -> Arc<Client> {
    init_test_logging();
    Arc::new(Client::from_parts(
        config,
        Some(test_metadata()),
        Some(transport as Arc<dyn Transport>),
    ))
}

/// Install env_logger once, quiet unless RUST_LOG says otherwise.
pub fn init_test_logging() {
    apitoolkit::logging::init(Some(log::LevelFilter::Warn));
}
