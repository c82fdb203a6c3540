// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Transport, TransportMessage};
use crate::core::ToolkitError;
use crate::payload::Payload;

/// In-memory transport that records every published message.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    messages: Mutex<Vec<TransportMessage>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn failing() -> Self {
        let transport = Self::default();
        transport.fail.store(true, Ordering::SeqCst);
        transport
    }

    pub(crate) async fn payloads(&self) -> Vec<Payload> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| serde_json::from_slice(&m.data).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(&self, message: TransportMessage) -> Result<String, ToolkitError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ToolkitError::Transport("simulated outage".to_string()));
        }
        let mut messages = self.messages.lock().await;
        messages.push(message);
        Ok(format!("msg-{}", messages.len()))
    }

    fn name(&self) -> &str {
        "recording"
    }
}
