use fastshot_types::{Classify, ErrorKind};

/// Top-level facade error: every lower-crate error folds in here so a
/// caller of `Facade` only ever matches on one enum, the same way
/// `peoci::ocidist_cache::Error` sits above `ocidist::Error` and
/// `rustix::io::Errno` without re-exposing either.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] fastshot_cache::Error),
    #[error(transparent)]
    ObjectStore(#[from] fastshot_osa::Error),
    #[error(transparent)]
    Codec(#[from] fastshot_codec::Error),
    #[error("{0}")]
    Job(fastshot_ops::JobError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("remote object store is not configured (object_store.bucket / object_store.access_key missing)")]
    NotConfigured,
}

impl From<fastshot_ops::JobError> for Error {
    fn from(err: fastshot_ops::JobError) -> Self {
        Error::Job(err)
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Cache(e) => e.kind(),
            Error::ObjectStore(e) => e.kind(),
            Error::Codec(e) => e.kind(),
            Error::Job(e) => e.kind,
            Error::Config(_) => ErrorKind::Fatal,
            Error::NotConfigured => ErrorKind::NotConfigured,
        }
    }
}
