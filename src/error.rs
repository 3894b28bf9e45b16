use thiserror::Error;

/// Failures of the proxy core.
///
/// The dispatcher turns these into HTTP status codes; nothing here is ever
/// retried.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("malformed location: {0}")]
    MalformedLocation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown hash algorithm in {0}")]
    UnknownAlgorithm(String),

    #[error("cache file already exists: {0}")]
    AlreadyExists(String),

    #[error("no data to write to {0}")]
    NoData(String),

    #[error("directory is full ({0} entries)")]
    DirectoryFull(usize),

    #[error("forwarding failed: {0}")]
    Forwarding(String),

    #[error("cannot resolve forwarding target: {0}")]
    BadTarget(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;
