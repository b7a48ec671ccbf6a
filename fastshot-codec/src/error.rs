use fastshot_types::{Classify, ErrorKind};

/// Codec failure modes (§4.2 "Failure modes").
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("artifact is missing the FHDR sentinel")]
    CorruptArtifact,
    #[error("decompressed stream is not a valid ZIP (likely wrong passphrase)")]
    DecryptionFailed,
    #[error("session JSON is missing required fields: {0}")]
    SchemaMismatch(String),
    #[error("io error building artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encode/decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::CorruptArtifact => ErrorKind::Integrity,
            Error::DecryptionFailed => ErrorKind::DecryptionFailed,
            Error::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Error::Io(_) | Error::Image(_) | Error::Zip(_) | Error::Json(_) => ErrorKind::Fatal,
        }
    }
}
