// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Google Cloud Pub/Sub publisher over the REST API.
//!
//! Auth flow   : service-account JWT bearer grant (RS256), token cached until
//!               shortly before expiry and refreshed lazily
//! Publish     : `POST {endpoint}/v1/projects/{p}/topics/{t}:publish`
//! Encoding    : payload bytes as standard base64 in `messages[].data`

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{SecondsFormat, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Transport, TransportMessage};
use crate::core::ToolkitError;
use crate::{debug_fmt, trace_fmt, warn_fmt};

/// Production Pub/Sub REST endpoint.
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
/// OAuth scope required for publishing.
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The parts of a Google service-account key the publisher needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account identity, used as JWT issuer
    pub client_email: String,

    /// PEM encoded RSA private key
    pub private_key: String,

    /// Key id, forwarded as the JWT `kid`
    #[serde(default)]
    pub private_key_id: Option<String>,

    /// OAuth token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parse a key from the raw metadata blob.
    ///
    /// The blob is either the key object itself or a string holding its JSON.
    pub fn from_value(value: &Value) -> Result<Self, ToolkitError> {
        let parsed = match value {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| ToolkitError::Credentials(format!("invalid service account key: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

/// Pub/Sub publisher bound to a single topic.
pub struct PubSubTransport {
    http: Client,
    endpoint: String,
    topic_path: String,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    token: RwLock<Option<CachedToken>>,
}

impl fmt::Debug for PubSubTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubTransport")
            .field("endpoint", &self.endpoint)
            .field("topic_path", &self.topic_path)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl PubSubTransport {
    /// Create a publisher for `projects/{project_id}/topics/{topic_id}`.
    ///
    /// Fails if the private key is not a valid RSA PEM key.
    pub fn new(key: ServiceAccountKey, project_id: &str, topic_id: &str) -> Result<Self, ToolkitError> {
        if project_id.is_empty() || topic_id.is_empty() {
            return Err(ToolkitError::Credentials(
                "pub/sub project and topic must not be empty".to_string(),
            ));
        }

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ToolkitError::Credentials(format!("invalid service account private key: {e}")))?;

        let http = Client::builder()
            .user_agent(concat!("apitoolkit-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ToolkitError::ClientError)?;

        Ok(Self {
            http,
            endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            topic_path: format!("projects/{project_id}/topics/{topic_id}"),
            key,
            signing_key,
            token: RwLock::new(None),
        })
    }

    /// Point the publisher at another Pub/Sub endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Fully qualified topic name.
    pub fn topic_path(&self) -> &str {
        &self.topic_path
    }

    /// Return a valid access token, exchanging a fresh assertion if needed.
    async fn access_token(&self) -> Result<String, ToolkitError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let mut guard = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fetched = self.fetch_token().await?;
        let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *guard = Some(CachedToken {
            value: fetched.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fetched.access_token)
    }

    async fn fetch_token(&self) -> Result<TokenResponse, ToolkitError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: PUBSUB_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let assertion = encode(&header, &claims, &self.signing_key)?;

        debug_fmt!("PubSub", "requesting access token from {}", self.key.token_uri);

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolkitError::Credentials(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ToolkitError::Credentials(format!("malformed token response: {e}")))
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }
}

#[async_trait]
impl Transport for PubSubTransport {
    async fn publish(&self, message: TransportMessage) -> Result<String, ToolkitError> {
        let token = self.access_token().await?;

        let mut attributes = message.attributes.clone();
        attributes.insert(
            "publish_time".to_string(),
            message.publish_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        let body = json!({
            "messages": [{
                "data": STANDARD.encode(&message.data),
                "attributes": attributes,
            }]
        });

        let url = format!("{}/v1/{}:publish", self.endpoint, self.topic_path);
        trace_fmt!("PubSub", "publishing {} bytes to {}", message.data.len(), url);

        let response = self.http.post(&url).bearer_auth(token).json(&body).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn_fmt!("PubSub", "access token rejected; will refresh on next publish");
            self.invalidate_token().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolkitError::Transport(format!("publish returned {status}: {body}")));
        }

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| ToolkitError::Transport(format!("malformed publish response: {e}")))?;

        published
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| ToolkitError::Transport("publish response carried no message id".to_string()))
    }

    fn name(&self) -> &str {
        "pubsub"
    }
}
