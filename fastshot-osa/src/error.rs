use fastshot_types::{Classify, ErrorKind};

/// OSA's leaf error type (§4.1's error column), the analogue of
/// `peoci::ocidist::Error` one layer further down the stack.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transient object store error: {0}")]
    Transient(String),
    #[error("object store denied the request: {0}")]
    AuthDenied(String),
    #[error("precondition failed (if_match mismatch)")]
    PreconditionFailed,
    #[error("object store is not configured")]
    NotConfigured,
    #[error("checksum/size mismatch reading object")]
    Integrity,
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient(_) => ErrorKind::Transient,
            Error::AuthDenied(_) => ErrorKind::AuthDenied,
            // a failed CAS on the manifest is expected under concurrent
            // writers and is retried by the caller with backoff, same
            // policy as any other Transient error (§4.3 step 5).
            Error::PreconditionFailed => ErrorKind::Transient,
            Error::NotConfigured => ErrorKind::NotConfigured,
            Error::Integrity => ErrorKind::Integrity,
        }
    }
}
