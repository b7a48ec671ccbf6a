//! Async Operation Manager: a bounded worker pool running long operations
//! with progress, cooperative cancellation, retry-with-backoff, and
//! retention-based cleanup (§4.4).

mod cancellation;
mod error;
mod manager;

pub use cancellation::CancellationToken;
pub use error::JobError;
pub use manager::{JobFn, OperationManager, Progress, ProgressSink, RetryPolicy};
