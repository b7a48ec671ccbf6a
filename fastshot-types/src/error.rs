use std::fmt;

/// The error taxonomy every leaf error in the workspace is classified
/// against. This is policy, not a type hierarchy: callers branch on
/// `ErrorKind`, never on the concrete error type of whichever crate raised
/// it (mirrors how `peoci::ocidist_cache::Error` folds `ocidist::Error`,
/// `rustix::io::Errno` and friends under one enum without losing the
/// original error as a source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Transient,
    AuthDenied,
    NotFound,
    Integrity,
    DecryptionFailed,
    SchemaMismatch,
    Cancelled,
    NotConfigured,
    Fatal,
}

impl ErrorKind {
    /// Whether a worker should retry an operation that failed with this
    /// kind, per the policy table in the error handling design.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::AuthDenied => "auth_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Integrity => "integrity",
            ErrorKind::DecryptionFailed => "decryption_failed",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Implemented by every crate's leaf error enum so upper layers can ask
/// "what kind of problem is this" without matching on each other's variants.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
