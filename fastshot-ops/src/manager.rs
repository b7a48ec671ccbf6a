use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use fastshot_types::{ErrorKind, OperationId, OperationKind, OperationRecord, OperationState};
use log::warn;
use tokio::sync::mpsc;

use crate::cancellation::CancellationToken;
use crate::error::JobError;

/// One progress update a running job reports (§4.4 "progress sink"), the
/// async analogue of `perunner::worker::run` threading a result channel
/// through instead of mutating shared state directly from a worker thread.
#[derive(Debug, Clone)]
pub struct Progress {
    pub operation_id: OperationId,
    pub progress: f32,
    pub message: Option<String>,
}

pub type ProgressSink = mpsc::UnboundedSender<Progress>;
type JobFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, JobError>> + Send>>;

/// A submitted unit of work. `Fn`, not `FnOnce`: the worker must be able to
/// re-invoke it from scratch on a `Transient`-error retry (§4.4 last
/// bullet).
pub type JobFn = Box<dyn Fn(CancellationToken, ProgressSink) -> JobFuture + Send + Sync>;

struct QueuedJob {
    id: OperationId,
    job: JobFn,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), factor: 2, max_attempts: 5 }
    }
}

/// A bounded worker pool running long operations with progress,
/// cancellation, retention-based cleanup, and retry-with-backoff (§4.4).
/// Ported from `perunner::worker::Pool`'s bounded-channel-plus-fixed-thread
/// shape to tokio tasks, since this crate's work is I/O-bound rather than
/// CPU-pinned like the teacher's VM launches.
pub struct OperationManager {
    records: Arc<Mutex<HashMap<OperationId, OperationRecord>>>,
    tokens: Arc<Mutex<HashMap<OperationId, CancellationToken>>>,
    next_id: AtomicU64,
    sender: mpsc::Sender<QueuedJob>,
    retention: chrono::Duration,
    retry: RetryPolicy,
    _workers: Vec<tokio::task::JoinHandle<()>>,
}

impl OperationManager {
    /// `workers` mirrors `sync.workers` (§6, default 3); `retention` is the
    /// `cleanup()` window for terminal records.
    pub fn new(workers: usize, retention: Duration, retry: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(workers.max(1) * 2);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let records: Arc<Mutex<HashMap<OperationId, OperationRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let tokens: Arc<Mutex<HashMap<OperationId, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers.max(1) {
            let receiver = receiver.clone();
            let records = records.clone();
            let tokens = tokens.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    run_job(worker_id, job, &records, &tokens, retry).await;
                }
            }));
        }

        Self {
            records,
            tokens,
            next_id: AtomicU64::new(1),
            sender,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::seconds(300)),
            retry,
            _workers: handles,
        }
    }

    /// Enqueues `job` and returns immediately (§4.4 "`submit` returns
    /// immediately"). If the bounded queue is momentarily full, the
    /// enqueue itself is handed off to a background task rather than
    /// blocking the caller.
    pub fn submit(&self, kind: OperationKind, job: JobFn) -> OperationId {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.records.lock().unwrap().insert(id, OperationRecord::new(id, kind, Utc::now()));
        self.tokens.lock().unwrap().insert(id, CancellationToken::new());

        let queued = QueuedJob { id, job };
        match self.sender.try_send(queued) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(queued)) => {
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let _ = sender.send(queued).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("operation manager queue closed, dropping submission {id:?}");
            }
        }
        id
    }

    /// Requests cancellation; returns `false` if `id` is unknown or the
    /// operation has already reached a terminal state (§4.4 `cancel`).
    pub fn cancel(&self, id: OperationId) -> bool {
        let Some(token) = self.tokens.lock().unwrap().get(&id).cloned() else {
            return false;
        };
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }
        token.cancel();
        record.transition(OperationState::Cancelling, Utc::now())
    }

    pub fn status(&self, id: OperationId) -> Option<OperationRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    /// Drops terminal records older than `retention`, then trims retained
    /// `result` payloads if their combined size exceeds a soft cap (§4.4
    /// `cleanup`).
    pub fn cleanup(&self) {
        const SOFT_CAP_BYTES: usize = 1_000_000;
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        records.retain(|_, record| match record.finished_at {
            Some(finished) if record.state.is_terminal() => now - finished < self.retention,
            _ => true,
        });

        let mut total: usize = records
            .values()
            .filter_map(|r| r.result.as_ref())
            .map(|v| v.to_string().len())
            .sum();
        if total > SOFT_CAP_BYTES {
            let mut finished: Vec<_> = records
                .iter()
                .filter(|(_, r)| r.state.is_terminal())
                .map(|(id, r)| (*id, r.finished_at))
                .collect();
            finished.sort_by_key(|(_, finished_at)| *finished_at);
            for (id, _) in finished {
                if total <= SOFT_CAP_BYTES {
                    break;
                }
                if let Some(record) = records.get_mut(&id) {
                    if let Some(result) = record.result.take() {
                        total = total.saturating_sub(result.to_string().len());
                    }
                }
            }
        }

        let mut tokens = self.tokens.lock().unwrap();
        tokens.retain(|id, _| records.contains_key(id));
    }
}

async fn run_job(
    worker_id: usize,
    job: QueuedJob,
    records: &Arc<Mutex<HashMap<OperationId, OperationRecord>>>,
    tokens: &Arc<Mutex<HashMap<OperationId, CancellationToken>>>,
    retry: RetryPolicy,
) {
    let QueuedJob { id, job } = job;
    let token = tokens.lock().unwrap().get(&id).cloned().unwrap_or_default();

    {
        let mut records = records.lock().unwrap();
        if let Some(record) = records.get_mut(&id) {
            record.transition(OperationState::Running, Utc::now());
        }
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Progress>();
    let progress_records = records.clone();
    let progress_task = tokio::spawn(async move {
        // The channel is per-job, so `id` (not the `operation_id` a job
        // closure happens to stamp on each update, which it has no way to
        // know ahead of `submit` assigning it) is the authority on which
        // record a given update belongs to.
        while let Some(update) = progress_rx.recv().await {
            if let Some(record) = progress_records.lock().unwrap().get_mut(&id) {
                record.progress = update.progress;
                if update.message.is_some() {
                    record.message = update.message;
                }
            }
        }
    });

    let mut attempt: u32 = 0;
    let mut delay = retry.base;
    let outcome = loop {
        let result = (job)(token.clone(), progress_tx.clone()).await;
        match result {
            Err(ref err) if err.kind == ErrorKind::Transient && attempt + 1 < retry.max_attempts => {
                attempt += 1;
                warn!("worker {worker_id}: operation {id:?} transient failure, retry {attempt}: {err}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {}
                }
                delay *= retry.factor;
                if token.is_cancelled() {
                    break Err(JobError::cancelled());
                }
                continue;
            }
            other => break other,
        }
    };

    drop(progress_tx);
    let _ = progress_task.await;

    let now = Utc::now();
    let mut records = records.lock().unwrap();
    if let Some(record) = records.get_mut(&id) {
        // A job can finish (successfully or not) after a cancel was already
        // requested, racing the cooperative check inside the job body. P5
        // forbids `cancelling -> completed`/`cancelling -> failed`, so a
        // record already sitting in `Cancelling` always finishes as
        // `Cancelled`, regardless of what the job itself returned.
        if record.state == OperationState::Cancelling {
            record.message = Some("operation cancelled".to_string());
            record.transition(OperationState::Cancelled, now);
            return;
        }
        match outcome {
            Ok(value) => {
                record.result = Some(value);
                record.transition(OperationState::Completed, now);
            }
            Err(err) if err.kind == ErrorKind::Cancelled => {
                record.message = Some(err.message);
                record.transition(OperationState::Cancelled, now);
            }
            Err(err) => {
                record.error = Some(err.kind);
                record.message = Some(err.message);
                record.transition(OperationState::Failed, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastshot_types::OperationKind;
    use std::time::Duration as StdDuration;

    fn manager() -> OperationManager {
        OperationManager::new(2, StdDuration::from_secs(60), RetryPolicy::default())
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { base: StdDuration::from_millis(5), factor: 2, max_attempts: 5 }
    }

    #[tokio::test]
    async fn completed_operation_carries_its_result() {
        let mgr = manager();
        let id = mgr.submit(
            OperationKind::SyncWithRemote,
            Box::new(|_token, _progress| Box::pin(async { Ok(serde_json::json!({"fetched": 8})) })),
        );
        for _ in 0..50 {
            if mgr.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        let record = mgr.status(id).unwrap();
        assert_eq!(record.state, OperationState::Completed);
        assert_eq!(record.result, Some(serde_json::json!({"fetched": 8})));
    }

    #[tokio::test]
    async fn cancellation_mid_run_reaches_cancelled_not_completed() {
        let mgr = manager();
        let id = mgr.submit(
            OperationKind::RebuildIndexes,
            Box::new(|token, progress| {
                Box::pin(async move {
                    for i in 0..100u32 {
                        if token.is_cancelled() {
                            return Err(JobError::cancelled());
                        }
                        let _ = progress.send(Progress {
                            operation_id: OperationId(0),
                            progress: i as f32 / 100.0,
                            message: None,
                        });
                        tokio::time::sleep(StdDuration::from_millis(5)).await;
                    }
                    Ok(serde_json::Value::Null)
                })
            }),
        );

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(mgr.cancel(id));

        for _ in 0..100 {
            if mgr.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        let record = mgr.status(id).unwrap();
        assert_eq!(record.state, OperationState::Cancelled);
        assert_ne!(record.state, OperationState::Completed);
    }

    #[tokio::test]
    async fn cancel_racing_a_job_that_finishes_anyway_still_lands_on_cancelled() {
        // The job body never looks at `token` at all, so it always runs to
        // completion; the outcome must still be routed to `Cancelled` once
        // `cancel(id)` has flipped the record to `Cancelling` (P5).
        let mgr = manager();
        let id = mgr.submit(
            OperationKind::SyncWithRemote,
            Box::new(|_token, _progress| {
                Box::pin(async move {
                    tokio::time::sleep(StdDuration::from_millis(30)).await;
                    Ok(serde_json::json!({"done": true}))
                })
            }),
        );

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        assert!(mgr.cancel(id));

        for _ in 0..100 {
            if mgr.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        let record = mgr.status(id).unwrap();
        assert_eq!(record.state, OperationState::Cancelled);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let mgr = OperationManager::new(2, StdDuration::from_secs(60), fast_retry());
        let attempts = Arc::new(AtomicU64::new(0));
        let attempts_clone = attempts.clone();
        let id = mgr.submit(
            OperationKind::PublishSession,
            Box::new(move |_token, _progress| {
                let attempts = attempts_clone.clone();
                Box::pin(async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(JobError::new(ErrorKind::Transient, "simulated timeout"))
                    } else {
                        Ok(serde_json::Value::Bool(true))
                    }
                })
            }),
        );
        for _ in 0..200 {
            if mgr.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert_eq!(mgr.status(id).unwrap().state, OperationState::Completed);
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cleanup_drops_old_terminal_records_but_keeps_recent_ones() {
        let mgr = OperationManager::new(1, StdDuration::from_secs(0), RetryPolicy::default());
        let id = mgr.submit(
            OperationKind::Clear,
            Box::new(|_token, _progress| Box::pin(async { Ok(serde_json::Value::Null) })),
        );
        for _ in 0..50 {
            if mgr.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        mgr.cleanup();
        assert!(mgr.status(id).is_none());
    }
}
