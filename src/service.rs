//! The search-service wire contract.
//!
//! Every endpoint the catalog uses is one method on [`SearchService`]. A
//! method returns `Err` only when the round trip itself failed; a service
//! that answered with an error status still yields a [`WireResponse`] whose
//! body the caller decodes with the typed schemas below.

use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::Result;

/// Visibility requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Make the write searchable before the call returns.
    Immediate,
    /// Let the service refresh on its own schedule.
    Deferred,
}

impl Refresh {
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Immediate => "true",
            Self::Deferred => "false",
        }
    }
}

/// A raw service answer: HTTP status plus JSON body bytes.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body into `T`, failing with a single parse error on any
    /// shape mismatch.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The structured error payload, if the body carries one.
    pub fn service_error(&self) -> Option<ServiceError> {
        serde_json::from_slice::<ErrorResponse>(&self.body)
            .ok()
            .map(|r| r.error.into())
    }

    /// A short reason for logging: the structured error when present,
    /// otherwise the (truncated) body text.
    pub fn reason(&self) -> String {
        if let Some(err) = self.service_error() {
            return err.to_string();
        }
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        if text.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            text.chars().take(200).collect()
        }
    }
}

#[async_trait]
pub trait SearchService: Send + Sync {
    /// `GET /`
    async fn info(&self) -> Result<WireResponse>;

    /// `PUT /{index}`
    async fn create_index(&self, index: &str, body: &Value)
    -> Result<WireResponse>;

    /// `PUT /{index}/_doc/{id}`
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        refresh: Refresh,
    ) -> Result<WireResponse>;

    /// `DELETE /{index}/_doc/{id}`
    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> Result<WireResponse>;

    /// `POST /{index}/_search`
    async fn search(
        &self,
        index: &str,
        body: &Value,
        track_total_hits: bool,
    ) -> Result<WireResponse>;
}

// -- Response schemas --

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub version: ServiceVersion,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceVersion {
    #[serde(default)]
    pub number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteResponse {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_version")]
    pub version: u64,
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub took: u64,
    pub hits: HitsEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitsEnvelope {
    pub total: Option<TotalHits>,
    pub max_score: Option<f64>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    #[serde(default)]
    pub relation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: Option<f64>,
    #[serde(rename = "_source")]
    pub source: RecordSource,
}

/// The stored body of a catalog record.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordSource {
    /// Absent when the service returns a filtered `_source`; the name is
    /// then recovered from the hit's `_id`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorPayload,
    #[serde(default)]
    pub status: Option<u16>,
}

/// Older services report some failures as a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Structured(ErrorDetail),
    Plain(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub root_cause: Vec<RootCause>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootCause {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A flattened service error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub kind: String,
    pub reason: String,
    pub root_causes: Vec<String>,
}

impl ServiceError {
    /// True when `kind` is the top-level type or any root cause.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind || self.root_causes.iter().any(|c| c == kind)
    }
}

impl From<ErrorPayload> for ServiceError {
    fn from(payload: ErrorPayload) -> Self {
        match payload {
            ErrorPayload::Structured(detail) => Self {
                reason: detail.reason.unwrap_or_default(),
                root_causes: detail
                    .root_cause
                    .into_iter()
                    .map(|c| c.kind)
                    .collect(),
                kind: detail.kind,
            },
            ErrorPayload::Plain(reason) => Self {
                kind: "unknown".to_string(),
                reason,
                root_causes: Vec::new(),
            },
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.reason)
        }
    }
}
