// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote client metadata.

use std::fmt;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ToolkitConfig;
use crate::core::ToolkitError;
use crate::debug_fmt;

/// Path of the metadata endpoint below the root URL.
pub const CLIENT_METADATA_PATH: &str = "/api/client_metadata";

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Project and transport identifiers issued for an API key.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Project the payloads belong to
    pub project_id: String,
    /// Project hosting the pub/sub topic
    pub pubsub_project_id: String,
    /// Topic payloads are published to
    pub topic_id: String,
    /// Service-account credentials for the topic
    pub pubsub_push_service_account: Value,
}

impl fmt::Debug for ClientMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMetadata")
            .field("project_id", &self.project_id)
            .field("pubsub_project_id", &self.pubsub_project_id)
            .field("topic_id", &self.topic_id)
            .finish_non_exhaustive()
    }
}

impl ClientMetadata {
    /// Fetch metadata for `config.api_key` from `config.root_url()`.
    ///
    /// Fails on transport errors, non-2xx responses and bodies that do not
    /// carry every metadata field.
    pub async fn fetch(config: &ToolkitConfig) -> Result<Self, ToolkitError> {
        let url = format!("{}{}", config.root_url(), CLIENT_METADATA_PATH);
        debug_fmt!("ClientMetadata", "fetching client metadata from {}", url);

        let http = HttpClient::builder()
            .user_agent(concat!("apitoolkit-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(METADATA_TIMEOUT)
            .build()?;

        let response = http.get(&url).bearer_auth(&config.api_key).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolkitError::Metadata(format!(
                "{url} returned {status}: {body}"
            )));
        }

        let body = response.bytes().await?;
        let metadata: ClientMetadata = serde_json::from_slice(&body)
            .map_err(|e| ToolkitError::Metadata(format!("malformed client metadata: {e}")))?;

        if metadata.project_id.is_empty() || metadata.topic_id.is_empty() {
            return Err(ToolkitError::Metadata(
                "client metadata is missing the project or topic id".to_string(),
            ));
        }

        Ok(metadata)
    }
}
