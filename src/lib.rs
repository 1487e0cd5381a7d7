//! chaindb - a tag-searchable file catalog.
//!
//! Each file in a storage directory gets one record in a full-text search
//! index: its name plus a list of free-form tags. Records are matched on
//! whole words and on n-gram fragments, so partial names find their files.
//! The index lives either in a remote Elasticsearch-compatible service
//! ([`HttpService`]) or in-process on
//! [Tantivy](https://github.com/quickwit-oss/tantivy) ([`EmbeddedService`]).
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chaindb::{Bootstrap, Connection, EmbeddedService, QueryEngine, RecordStore};
//!
//! # async fn run() -> chaindb::Result<()> {
//! let connection = Arc::new(Connection::default());
//! Bootstrap::new(Arc::new(EmbeddedService::in_memory()))
//!     .run(&connection)
//!     .await?;
//!
//! let records = RecordStore::new(connection.clone());
//! records.upsert("reports/q3.pdf", &["finance".into(), "2024".into()]).await?;
//!
//! let results = QueryEngine::new(connection).search("finance").await?;
//! for r in &results {
//!     println!("{} {:?} (score: {:.3})", r.file_name, r.file_tags, r.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod cli;
pub mod connection;
pub mod doc_id;
pub mod error;
pub mod http_service;
pub mod records;
pub mod schema;
pub mod search;
pub mod service;
pub mod storage;
pub mod tantivy_index;
pub mod web;

#[cfg(test)]
mod testing;

pub use bootstrap::{Bootstrap, BootstrapReport, RetryPolicy};
pub use connection::Connection;
pub use doc_id::RecordKey;
pub use error::{Error, Result};
pub use http_service::HttpService;
pub use records::RecordStore;
pub use search::QueryEngine;
pub use service::SearchService;
pub use storage::StorageRoot;
pub use tantivy_index::EmbeddedService;
