use std::sync::{Arc, OnceLock};

use crate::{
    error::{Error, Result},
    service::SearchService,
};

/// Index name used when none is configured.
pub const DEFAULT_INDEX: &str = "documents";

/// The process-wide handle to the search service.
///
/// Bootstrap installs the service exactly once; after that the handle is
/// read-only and shared by every request without locking.
pub struct Connection {
    index: String,
    slot: OnceLock<Arc<dyn SearchService>>,
}

impl Connection {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            slot: OnceLock::new(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    /// The installed service, or `NotInitialized` before bootstrap finished.
    pub fn service(&self) -> Result<&Arc<dyn SearchService>> {
        self.slot.get().ok_or(Error::NotInitialized)
    }

    pub(crate) fn install(&self, service: Arc<dyn SearchService>) -> Result<()> {
        self.slot
            .set(service)
            .map_err(|_| Error::AlreadyInitialized)
    }

    /// Build an already-ready connection, skipping bootstrap.
    ///
    /// Intended for callers that manage the index lifecycle themselves.
    pub fn ready(
        index: impl Into<String>,
        service: Arc<dyn SearchService>,
    ) -> Self {
        let conn = Self::new(index);
        // A fresh OnceLock always accepts the first value.
        let _ = conn.slot.set(service);
        conn
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("index", &self.index)
            .field("ready", &self.is_ready())
            .finish()
    }
}
