use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search service unreachable: {0}")]
    Connection(String),

    #[error("index creation failed [{status}]: {reason}")]
    Schema { status: u16, reason: String },

    /// Status 0 means the service was never reached.
    #[error("record write rejected [{status}]: {reason}")]
    Write { status: u16, reason: String },

    /// Status 0 means the service was never reached.
    #[error("record delete rejected [{status}]: {reason}")]
    Delete { status: u16, reason: String },

    #[error("query rejected [{status}] {kind}: {reason}")]
    Query {
        status: u16,
        kind: String,
        reason: String,
    },

    #[error("invalid record key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("unexpected response shape: {0}")]
    ResponseParse(#[from] serde_json::Error),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("cannot access {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("search service connection is not initialized")]
    NotInitialized,

    #[error("search service connection is already initialized")]
    AlreadyInitialized,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
