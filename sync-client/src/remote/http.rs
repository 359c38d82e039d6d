//! PostgREST-style HTTP remote store.
//!
//! Every collection is a REST resource:
//! - insert: `POST /{collection}`
//! - update: `PATCH /{collection}?id=eq.{id}`
//! - upsert: `POST /{collection}?on_conflict=a,b` with `resolution=merge-duplicates`
//! - delete: `DELETE /{collection}?id=eq.{id}`
//! - list:   `GET /{collection}?select=*`
//!
//! Mutations ask for `return=representation`, so an update or delete that
//! matched no row comes back as an empty array and maps to
//! [`RemoteError::NotFound`].

use super::RemoteStore;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use sync_types::{Collection, EntityId, EntityRecord, RemoteError};

use crate::config::RemoteConfig;

/// HTTP client for a PostgREST-compatible remote store.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

impl HttpRemote {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    /// Create a client from the `[remote]` config section.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, collection: &Collection) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    fn request(&self, method: Method, collection: &Collection) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url(collection))
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key).bearer_auth(key);
        }
        builder
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Network(err.to_string())
        }
    }

    /// Send a request and decode the returned rows.
    async fn send(&self, builder: RequestBuilder) -> Result<Vec<EntityRecord>, RemoteError> {
        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(parse_error(status, &body));
        }
        decode_rows(status, &body)
    }

    async fn send_one(
        &self,
        builder: RequestBuilder,
        fallback: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        let rows = self.send(builder).await?;
        Ok(rows.into_iter().next().unwrap_or_else(|| fallback.clone()))
    }
}

fn id_filter(id: &EntityId) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

/// Turn an error response into a structured [`RemoteError`].
fn parse_error(status: StatusCode, body: &str) -> RemoteError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => {
            let message = match (parsed.message, parsed.details) {
                (Some(message), Some(details)) => format!("{} ({})", message, details),
                (Some(message), None) => message,
                (None, _) => body.to_string(),
            };
            RemoteError::Api {
                status: status.as_u16(),
                code: parsed.code,
                message,
            }
        }
        Err(_) => RemoteError::Api {
            status: status.as_u16(),
            code: None,
            message: body.trim().to_string(),
        },
    }
}

/// Decode a success body: an array of rows, a single row, or nothing.
fn decode_rows(status: StatusCode, body: &str) -> Result<Vec<EntityRecord>, RemoteError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let invalid = |message: String| RemoteError::Api {
        status: status.as_u16(),
        code: None,
        message: format!("invalid response body: {}", message),
    };

    let value: Value = serde_json::from_str(body).map_err(|e| invalid(e.to_string()))?;
    let rows = match value {
        Value::Array(rows) => rows,
        row @ Value::Object(_) => vec![row],
        other => return Err(invalid(format!("unexpected JSON {}", other))),
    };

    rows.into_iter()
        .map(|row| EntityRecord::from_value(row).map_err(|e| invalid(e.to_string())))
        .collect()
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn insert(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        let builder = self
            .request(Method::POST, collection)
            .header("Prefer", "return=representation")
            .json(&record.to_value());
        self.send_one(builder, record).await
    }

    async fn update(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        let builder = self
            .request(Method::PATCH, collection)
            .query(&id_filter(&record.id))
            .header("Prefer", "return=representation")
            .json(&record.to_value());
        self.send(builder)
            .await?
            .into_iter()
            .next()
            .ok_or(RemoteError::NotFound)
    }

    async fn upsert(
        &self,
        collection: &Collection,
        record: &EntityRecord,
        conflict_key: &[String],
    ) -> Result<EntityRecord, RemoteError> {
        let builder = self
            .request(Method::POST, collection)
            .query(&[("on_conflict", conflict_key.join(","))])
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&record.to_value());
        self.send_one(builder, record).await
    }

    async fn delete(&self, collection: &Collection, id: &EntityId) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::DELETE, collection)
            .query(&id_filter(id))
            .header("Prefer", "return=representation");
        let deleted = self.send(builder).await?;
        if deleted.is_empty() {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<EntityRecord>, RemoteError> {
        let builder = self
            .request(Method::GET, collection)
            .query(&[("select", "*")]);
        self.send(builder).await
    }
}
