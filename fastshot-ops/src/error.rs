use fastshot_types::ErrorKind;

/// What a job closure reports back to the worker that ran it. Every crate
/// above `fastshot-ops` has its own leaf error type; rather than making
/// this crate depend on all of them, a job converts its error into this
/// flat shape at the boundary (the same `.kind()` boundary
/// `fastshot_types::Classify` defines everywhere else).
#[derive(Debug, Clone)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn from_classify<E>(error: &E) -> Self
    where
        E: fastshot_types::Classify + std::fmt::Display,
    {
        Self { kind: error.kind(), message: error.to_string() }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}
