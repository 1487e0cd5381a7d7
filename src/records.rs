use std::sync::Arc;

use serde::Serialize;

use crate::{
    connection::Connection,
    doc_id::RecordKey,
    error::{Error, Result},
    service::{Refresh, WireResponse, WriteResponse},
};

/// The body stored for each file.
#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    name: &'a str,
    tags: &'a [String],
}

/// What a write did to the stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Deleted,
    NotFound,
    Noop,
    Other(String),
}

impl WriteOutcome {
    fn parse(result: &str) -> Self {
        match result {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "deleted" => Self::Deleted,
            "not_found" => Self::NotFound,
            "noop" => Self::Noop,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::NotFound => "not_found",
            Self::Noop => "noop",
            Self::Other(s) => s,
        }
    }
}

/// Result of a record write or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub status: u16,
    pub result: WriteOutcome,
    /// Per-document counter, bumped by every write.
    pub version: u64,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}; version={}",
            self.status,
            self.result.as_str(),
            self.version
        )
    }
}

/// Upserts and deletes catalog records keyed by file name.
#[derive(Debug, Clone)]
pub struct RecordStore {
    connection: Arc<Connection>,
}

impl RecordStore {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Create or replace the record for `name`.
    ///
    /// The write is refreshed before returning, so the next search sees it.
    pub async fn upsert(
        &self,
        name: &str,
        tags: &[String],
    ) -> Result<VersionInfo> {
        let service = self.connection.service()?;
        let key = RecordKey::new(name);
        let body = serde_json::to_value(RecordBody { name, tags })?;

        let resp = service
            .index_document(
                self.connection.index(),
                key.as_str(),
                &body,
                Refresh::Immediate,
            )
            .await
            .map_err(|e| {
                unreachable_as(e, |status, reason| Error::Write { status, reason })
            })?;

        if !resp.is_success() {
            tracing::warn!(name, status = resp.status, "record write rejected");
            return Err(Error::Write {
                status: resp.status,
                reason: rejection_reason(&resp),
            });
        }

        let info = version_info(&resp)?;
        tracing::debug!(name, key = %key, %info, "record upserted");
        Ok(info)
    }

    /// Delete the record for `name`. The underlying file is left alone.
    ///
    /// A record that does not exist is an error.
    pub async fn remove(&self, name: &str) -> Result<VersionInfo> {
        let service = self.connection.service()?;
        let key = RecordKey::new(name);

        let resp = service
            .delete_document(
                self.connection.index(),
                key.as_str(),
                Refresh::Immediate,
            )
            .await
            .map_err(|e| {
                unreachable_as(e, |status, reason| Error::Delete { status, reason })
            })?;

        if !resp.is_success() {
            tracing::warn!(name, status = resp.status, "record delete rejected");
            return Err(Error::Delete {
                status: resp.status,
                reason: rejection_reason(&resp),
            });
        }

        let info = version_info(&resp)?;
        tracing::debug!(name, key = %key, %info, "record removed");
        Ok(info)
    }
}

/// A write that never reached the service is reported with status 0.
fn unreachable_as(
    err: Error,
    rejected: impl FnOnce(u16, String) -> Error,
) -> Error {
    match err {
        Error::Connection(reason) => {
            tracing::warn!(%reason, "search service unreachable during write");
            rejected(0, reason)
        }
        other => other,
    }
}

fn version_info(resp: &WireResponse) -> Result<VersionInfo> {
    let body: WriteResponse = resp.decode()?;
    Ok(VersionInfo {
        status: resp.status,
        result: WriteOutcome::parse(&body.result),
        version: body.version,
    })
}

/// Prefer the structured error, then a write `result` such as `not_found`.
fn rejection_reason(resp: &WireResponse) -> String {
    if let Some(err) = resp.service_error() {
        return err.to_string();
    }
    match resp.decode::<WriteResponse>() {
        Ok(body) => body.result,
        Err(_) => resp.reason(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        schema::{IndexDefinition, ensure_index},
        tantivy_index::EmbeddedService,
        testing::ScriptedService,
    };

    async fn embedded_store() -> RecordStore {
        let service = Arc::new(EmbeddedService::in_memory());
        ensure_index(service.as_ref(), "documents", &IndexDefinition::default())
            .await
            .unwrap();
        RecordStore::new(Arc::new(Connection::ready("documents", service)))
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn upsert_then_update_bumps_version() {
        let store = embedded_store().await;

        let first = store.upsert("a.txt", &tags(&["x"])).await.unwrap();
        assert_eq!(first.result, WriteOutcome::Created);
        assert_eq!(first.version, 1);
        assert_eq!(first.status, 201);

        let second = store.upsert("a.txt", &tags(&["x", "y"])).await.unwrap();
        assert_eq!(second.result, WriteOutcome::Updated);
        assert_eq!(second.version, 2);
        assert_eq!(second.to_string(), "[200] updated; version=2");
    }

    #[tokio::test]
    async fn remove_existing_then_missing() {
        let store = embedded_store().await;
        store.upsert("a.txt", &tags(&[])).await.unwrap();

        let removed = store.remove("a.txt").await.unwrap();
        assert_eq!(removed.result, WriteOutcome::Deleted);
        assert_eq!(removed.version, 2);

        let err = store.remove("a.txt").await.unwrap_err();
        match err {
            Error::Delete { status, reason } => {
                assert_eq!(status, 404);
                assert_eq!(reason, "not_found");
            }
            other => panic!("expected delete error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn uninitialized_connection_fails_fast() {
        let store = RecordStore::new(Arc::new(Connection::default()));
        assert!(matches!(
            store.upsert("a.txt", &[]).await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            store.remove("a.txt").await,
            Err(Error::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn upsert_sends_key_body_and_refresh() {
        let service = Arc::new(ScriptedService::new(vec![Ok(
            WireResponse::json(
                201,
                &json!({"_index": "documents", "_id": "YS50eHQ=",
                        "_version": 1, "result": "created"}),
            ),
        )]));
        let store = RecordStore::new(Arc::new(Connection::ready(
            "documents",
            service.clone(),
        )));

        store.upsert("a.txt", &tags(&["x", "y"])).await.unwrap();

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].endpoint, "index_document");
        assert_eq!(calls[0].id.as_deref(), Some("YS50eHQ="));
        assert_eq!(calls[0].flag.as_deref(), Some("true"));
        assert_eq!(
            calls[0].body,
            Some(json!({"name": "a.txt", "tags": ["x", "y"]}))
        );
    }

    #[tokio::test]
    async fn rejected_write_carries_service_reason() {
        let service = Arc::new(ScriptedService::new(vec![Ok(
            WireResponse::json(
                429,
                &json!({"error": {"type": "es_rejected_execution_exception",
                                  "reason": "queue full"}}),
            ),
        )]));
        let store =
            RecordStore::new(Arc::new(Connection::ready("documents", service)));

        let err = store.upsert("a.txt", &[]).await.unwrap_err();
        match err {
            Error::Write { status, reason } => {
                assert_eq!(status, 429);
                assert_eq!(reason, "es_rejected_execution_exception: queue full");
            }
            other => panic!("expected write error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_fails_the_write() {
        let service = Arc::new(ScriptedService::new(vec![Err(
            Error::Connection("connection refused".into()),
        )]));
        let store =
            RecordStore::new(Arc::new(Connection::ready("documents", service)));
        match store.upsert("a.txt", &[]).await.unwrap_err() {
            Error::Write { status, reason } => {
                assert_eq!(status, 0);
                assert_eq!(reason, "connection refused");
            }
            other => panic!("expected write error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_fails_the_delete() {
        let service = Arc::new(ScriptedService::new(vec![Err(
            Error::Connection("connection refused".into()),
        )]));
        let store =
            RecordStore::new(Arc::new(Connection::ready("documents", service)));
        assert!(matches!(
            store.remove("a.txt").await,
            Err(Error::Delete { status: 0, .. })
        ));
    }
}
