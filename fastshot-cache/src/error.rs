use fastshot_types::{Classify, ErrorKind};

/// Meta Cache Manager failure modes (§4.3).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metadata index not found: {0}")]
    NotFound(String),
    #[error("cache entry failed integrity check: {0}")]
    Integrity(String),
    #[error("remote object store not configured")]
    NotConfigured,
    #[error(transparent)]
    ObjectStore(#[from] fastshot_osa::Error),
    #[error(transparent)]
    Codec(#[from] fastshot_codec::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::NotConfigured => ErrorKind::NotConfigured,
            Error::ObjectStore(e) => e.kind(),
            Error::Codec(e) => e.kind(),
            Error::Io(_) | Error::Json(_) => ErrorKind::Fatal,
        }
    }
}
