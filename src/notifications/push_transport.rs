//! # Push Transport
//!
//! Sends one push message to one device token. [`FcmPushTransport`] talks to
//! the Firebase Cloud Messaging HTTP v1 API, authenticating with an OAuth2
//! access token minted from a service-account key.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PushConfig;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
/// Refresh an access token this long before it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PushError {
    #[error("device token is no longer registered")]
    Unregistered,

    #[error("push rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("push request failed: {0}")]
    Http(String),

    #[error("push authentication failed: {0}")]
    Auth(String),

    #[error("push credentials unusable: {0}")]
    Credentials(String),
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// One message for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub data: String,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}

/// FCM v1 request body: a visible notification plus the same text as data
pub fn fcm_request_body(message: &PushMessage) -> Value {
    json!({
        "message": {
            "token": message.token,
            "notification": {
                "title": message.title,
                "body": message.data,
            },
            "data": {
                "title": message.title,
                "content": message.data,
            }
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, PushError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PushError::Credentials(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| PushError::Credentials(format!("{}: {e}", path.display())))
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
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct FcmPushTransport {
    client: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    send_url: String,
    access_token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for FcmPushTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmPushTransport")
            .field("send_url", &self.send_url)
            .field("client_email", &self.key.client_email)
            .finish()
    }
}

impl FcmPushTransport {
    pub fn from_config(config: &PushConfig) -> Result<Self, PushError> {
        let key = ServiceAccountKey::from_file(&config.credentials_file)?;
        let project_id = config
            .project_id
            .clone()
            .unwrap_or_else(|| key.project_id.clone());
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::new(client, key, &config.endpoint, &project_id)
    }

    pub fn new(
        client: reqwest::Client,
        key: ServiceAccountKey,
        endpoint: &str,
        project_id: &str,
    ) -> Result<Self, PushError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| PushError::Credentials(format!("private key: {e}")))?;
        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            endpoint.trim_end_matches('/'),
            project_id
        );

        info!(send_url = %send_url, "FCM push transport configured");

        Ok(Self {
            client,
            key,
            encoding_key,
            send_url,
            access_token: Mutex::new(None),
        })
    }

    fn signed_assertion(&self) -> Result<String, PushError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: FCM_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECONDS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| PushError::Auth(format!("signing assertion: {e}")))
    }

    async fn access_token(&self) -> Result<String, PushError> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: AccessTokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });

        debug!(expires_in = token.expires_in, "Refreshed FCM access token");
        Ok(token.access_token)
    }
}

#[async_trait]
impl PushTransport for FcmPushTransport {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let access_token = self.access_token().await?;

        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&fcm_request_body(message))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), body))
    }
}

fn classify_failure(status: u16, body: String) -> PushError {
    match status {
        401 | 403 => PushError::Auth(body),
        404 if body.contains("UNREGISTERED") => PushError::Unregistered,
        _ => PushError::Rejected {
            status,
            message: body,
        },
    }
}
