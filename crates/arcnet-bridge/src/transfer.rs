// SPDX-License-Identifier: MIT OR Apache-2.0
//! The external transfer service client.
//!
//! Three abstract RPCs (`initiate`, `poll`, `cancel`) behind a trait,
//! with an HTTP implementation that holds a bearer token obtained via a
//! client-credentials exchange. The token is cached process-wide and
//! refreshed lazily with a five-minute expiry buffer.

use arcnet_core::TransferStatus;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Refresh the token this long before it actually expires.
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 300;

/// Errors from the transfer client.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP request itself failed.
    #[error("transfer request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The token exchange failed.
    #[error("token exchange failed: {0}")]
    Token(String),

    /// The service answered with a non-success status.
    #[error("transfer service returned {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Options for a transfer submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Verify checksums after the copy.
    pub verify_checksum: bool,
    /// Preserve source timestamps.
    pub preserve_timestamps: bool,
    /// Require wire encryption.
    pub encryption_required: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            preserve_timestamps: true,
            encryption_required: true,
        }
    }
}

/// A transfer request handed to [`TransferApi::initiate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Source endpoint identifier.
    pub source_endpoint: String,
    /// Destination endpoint identifier.
    pub dest_endpoint: String,
    /// Path at the source endpoint.
    pub source_path: String,
    /// Path at the destination endpoint.
    pub dest_path: String,
    /// Submission options.
    pub options: TransferOptions,
}

/// A successfully accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInitiation {
    /// Handle for polling and cancelling.
    pub task_id: String,
    /// Submission identifier at the service.
    pub submission_id: String,
}

/// One poll of an open transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPoll {
    /// Current substate.
    pub status: TransferStatus,
    /// Bytes moved so far.
    pub bytes_transferred: u64,
    /// Files moved so far.
    pub files_transferred: u64,
    /// Human-readable status from the service.
    pub nice_status: Option<String>,
}

/// The external transfer service, as the bridge sees it.
#[async_trait]
pub trait TransferApi: Send + Sync {
    /// Submit a transfer.
    async fn initiate(&self, request: &TransferRequest) -> Result<TransferInitiation, TransferError>;

    /// Poll an open transfer.
    async fn poll(&self, task_id: &str) -> Result<TransferPoll, TransferError>;

    /// Cancel an open transfer.
    async fn cancel(&self, task_id: &str) -> Result<(), TransferError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Credentials for the client-credentials token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCredentials {
    /// Token endpoint URL.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct InitiateBody<'a> {
    source_endpoint: &'a str,
    destination_endpoint: &'a str,
    source_path: &'a str,
    destination_path: &'a str,
    verify_checksum: bool,
    preserve_timestamps: bool,
    encryption_required: bool,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    task_id: String,
    submission_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    bytes_transferred: u64,
    #[serde(default)]
    files_transferred: u64,
    #[serde(default)]
    nice_status: Option<String>,
}

/// HTTP client for the transfer service.
pub struct HttpTransferApi {
    http: reqwest::Client,
    base_url: String,
    credentials: TransferCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl HttpTransferApi {
    /// Build a client against a service base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, credentials: TransferCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            token: Mutex::new(None),
        }
    }

    /// The cached bearer token, refreshed lazily when within the expiry
    /// buffer.
    async fn bearer(&self) -> Result<String, TransferError> {
        {
            let cached = self.token.lock().expect("token lock poisoned");
            if let Some(token) = cached.as_ref() {
                let buffer = ChronoDuration::seconds(TOKEN_EXPIRY_BUFFER_SECS);
                if Utc::now() + buffer < token.expires_at {
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("refreshing transfer service token");
        let response = self
            .http
            .post(&self.credentials.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransferError::Token(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        };
        *self.token.lock().expect("token lock poisoned") = Some(cached);
        Ok(token.access_token)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransferError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl TransferApi for HttpTransferApi {
    async fn initiate(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferInitiation, TransferError> {
        let token = self.bearer().await?;
        let body = InitiateBody {
            source_endpoint: &request.source_endpoint,
            destination_endpoint: &request.dest_endpoint,
            source_path: &request.source_path,
            destination_path: &request.dest_path,
            verify_checksum: request.options.verify_checksum,
            preserve_timestamps: request.options.preserve_timestamps,
            encryption_required: request.options.encryption_required,
        };
        let response = self
            .http
            .post(format!("{}/transfer", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let accepted: InitiateResponse = response.json().await?;
        Ok(TransferInitiation {
            task_id: accepted.task_id,
            submission_id: accepted.submission_id,
        })
    }

    async fn poll(&self, task_id: &str) -> Result<TransferPoll, TransferError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/task/{task_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let poll: PollResponse = response.json().await?;
        let status = match poll.status.as_str() {
            "pending" => TransferStatus::Pending,
            "active" => TransferStatus::Active,
            "succeeded" => TransferStatus::Succeeded,
            "failed" => TransferStatus::Failed,
            "canceled" => TransferStatus::Canceled,
            other => {
                warn!(task_id, status = other, "unrecognised transfer status");
                TransferStatus::Unknown
            }
        };
        Ok(TransferPoll {
            status,
            bytes_transferred: poll.bytes_transferred,
            files_transferred: poll.files_transferred,
            nice_status: poll.nice_status,
        })
    }

    async fn cancel(&self, task_id: &str) -> Result<(), TransferError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .post(format!("{}/task/{task_id}/cancel", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
