//! HTTP remote authority client.
//!
//! Wire contract:
//!
//! - `POST {base}/sync/push` with a [`PushRequest`] body. `200` answers
//!   [`PushResponse`] (accepted); `409` answers [`PushResponse`] carrying the
//!   remote copy (stale).
//! - `GET {base}/sync/pull?since={cursor}` answers [`PullResponse`].
//!
//! The credential travels as a bearer token. `401`/`403` map to
//! [`RemoteError::Unauthorized`]; client-side timeouts map to
//! [`RemoteError::Timeout`]; everything else is [`RemoteError::Transport`].
//! Requests are never retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use scout_core::config::ScoutConfig;
use scout_core::id::DeviceId;
use scout_core::key::NaturalKey;
use scout_core::table::{QueueTable, Table};

use super::{
    Credential, Mutation, PullCursor, PushAck, RemoteAuthority, RemoteDelta, RemoteError,
    RemoteRecord,
};

/// Body of a push request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// Mutation id (idempotency key).
    pub id: String,
    /// Authoring device.
    pub device: String,
    /// Target table.
    pub table: QueueTable,
    /// Natural key fields.
    pub key: Map<String, Value>,
    /// Record payload.
    pub payload: Value,
    /// Last remote version the device observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
}

/// Body of a push response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    /// Remote version of the key after the push.
    pub remote_version: u64,
    /// Remote payload of the key after the push.
    pub payload: Value,
}

/// One record of a pull response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    /// Table of the record.
    pub table: Table,
    /// Natural key fields.
    pub key: Map<String, Value>,
    /// Record payload.
    pub payload: Value,
    /// Remote version of the key.
    pub remote_version: u64,
}

/// Body of a pull response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changed records in change order.
    pub records: Vec<WireRecord>,
    /// Cursor to resume from.
    pub cursor: u64,
}

impl PushRequest {
    /// Decodes the mutation carried by the request, for server
    /// implementations.
    ///
    /// # Errors
    ///
    /// Returns an error if the id, device or key is malformed.
    pub fn into_mutation(self) -> scout_core::Result<Mutation> {
        Ok(Mutation {
            id: self.id.parse()?,
            device: DeviceId::new(self.device)?,
            key: NaturalKey::from_fields(self.table.table(), &self.key)?,
            table: self.table,
            payload: self.payload,
            base_version: self.base_version,
        })
    }
}

impl WireRecord {
    /// Builds the wire form of a remote record.
    #[must_use]
    pub fn from_record(record: &RemoteRecord) -> Self {
        Self {
            table: record.key.table(),
            key: record.key.to_map(),
            payload: record.payload.clone(),
            remote_version: record.remote_version,
        }
    }

    fn into_record(self) -> Result<RemoteRecord, RemoteError> {
        let key = NaturalKey::from_fields(self.table, &self.key)
            .map_err(|e| RemoteError::transport(format!("malformed pull record: {e}")))?;
        Ok(RemoteRecord {
            key,
            payload: self.payload,
            remote_version: self.remote_version,
        })
    }
}

/// Remote authority reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    /// Creates a client for `base_url` with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RemoteError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Creates a client from device configuration.
    ///
    /// Returns `Ok(None)` when no remote URL is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &ScoutConfig) -> Result<Option<Self>, RemoteError> {
        config
            .remote_url
            .as_deref()
            .map(|url| Self::new(url, config.request_timeout, config.connect_timeout))
            .transpose()
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn send_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout {
            message: err.to_string(),
        }
    } else {
        RemoteError::transport(err.to_string())
    }
}

async fn status_error(response: Response) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::unauthorized(format!("{status}: {body}"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout {
            message: format!("{status}: {body}"),
        },
        _ => RemoteError::transport(format!("remote error ({status}): {body}")),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    response
        .json()
        .await
        .map_err(|e| RemoteError::transport(format!("failed to parse response: {e}")))
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    #[tracing::instrument(skip_all, fields(key = %mutation.key, id = %mutation.id))]
    async fn push(
        &self,
        credential: &Credential,
        mutation: &Mutation,
    ) -> Result<PushAck, RemoteError> {
        let url = format!("{}/sync/push", self.base_url);
        let body = PushRequest {
            id: mutation.id.to_string(),
            device: mutation.device.to_string(),
            table: mutation.table,
            key: mutation.key.to_map(),
            payload: mutation.payload.clone(),
            base_version: mutation.base_version,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        match response.status() {
            status if status.is_success() => {
                let ack: PushResponse = decode(response).await?;
                Ok(PushAck::Accepted {
                    remote_version: ack.remote_version,
                    payload: ack.payload,
                })
            }
            StatusCode::CONFLICT => {
                let current: PushResponse = decode(response).await?;
                Ok(PushAck::Stale {
                    remote_version: current.remote_version,
                    payload: current.payload,
                })
            }
            _ => Err(status_error(response).await),
        }
    }

    #[tracing::instrument(skip_all, fields(%since))]
    async fn pull(
        &self,
        credential: &Credential,
        since: PullCursor,
    ) -> Result<RemoteDelta, RemoteError> {
        let url = format!("{}/sync/pull?since={since}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: PullResponse = decode(response).await?;
        let records = body
            .records
            .into_iter()
            .map(WireRecord::into_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RemoteDelta {
            records,
            cursor: PullCursor(body.cursor),
        })
    }
}
