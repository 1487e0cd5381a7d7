use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::{Error, Result};

/// The identifier of a catalog record, derived from its file name.
///
/// The key is the standard base64 encoding of the UTF-8 name. It encodes the
/// name, not the file contents, so it is stable across content changes and
/// a rename is a delete followed by a create.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    /// Derive the key for a file name.
    pub fn new(name: &str) -> Self {
        Self(STANDARD.encode(name.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the file name this key was derived from.
    pub fn decode(&self) -> Result<String> {
        let invalid = |reason: String| Error::InvalidKey {
            key: self.0.clone(),
            reason,
        };
        let bytes = STANDARD
            .decode(&self.0)
            .map_err(|e| invalid(format!("not base64: {e}")))?;
        String::from_utf8(bytes).map_err(|e| invalid(format!("not UTF-8: {e}")))
    }

    /// Wrap an identifier received from the search service.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
