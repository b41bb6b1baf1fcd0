// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print service: the active-job table plus a single background worker.
//
// Callers submit a job and its artifact; the job is registered in a
// mutex-guarded table and its id pushed onto an unbounded FIFO channel. One
// Tokio task drains the channel, one job at a time (printers are serial
// resources), running the blocking backend on the blocking pool and reporting
// back through the job's callbacks. A failing or panicking job is recorded as
// `Failed` and the worker moves on to the next one.
//
// Status transitions and their side effects:
//
//   Pending    --dequeued-->          Processing  (attempts += 1)
//   Processing --execute succeeds-->  Completed   (error cleared)
//   Processing --execute fails-->     Failed      (error stored)
//   Failed     --resubmitted-->       Pending     (only while can_retry)
//   Pending    --cancel / shutdown--> Cancelled
//
// Terminal jobs have their snapshot persisted by the backend and are then
// moved from the table into a bounded in-memory history. A resubmitted id is
// judged by its newest known record (history, then persisted snapshot), never
// by the caller's copy, so a stale clone cannot reset the attempt count.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use orderdesk_core::config::ServiceConfig;
use orderdesk_core::error::{PrintError, Result};
use orderdesk_core::types::{JobId, JobStatus, PrintJob};

use crate::backend::{ExecutionOutcome, PrintBackend, create_backend};
use crate::integrity::hash_bytes;

/// Error reported when a backend fails without saying why.
const GENERIC_FAILURE: &str = "print job failed";
const CANCELLED_BY_CALLER: &str = "print job cancelled before it started";
const CANCELLED_BY_SHUTDOWN: &str = "print service stopped before the job started";

/// Finished job records kept in memory for lookups and resubmission checks.
const FINISHED_HISTORY: usize = 1024;

/// Progress notification: `(current_step, total_steps)`.
pub type ProgressCallback = Box<dyn FnMut(u32, u32) + Send>;

/// Completion notification: `(success, error_message)`.
pub type CompletionCallback = Box<dyn FnOnce(bool, Option<String>) + Send>;

/// Optional notifications for one submitted job.
///
/// Both run on the worker's side, never on the thread that called
/// [`PrintService::submit`]; UI consumers must marshal them onto their own
/// context. `on_complete` fires exactly once per submitted job.
#[derive(Default)]
pub struct JobCallbacks {
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompletionCallback>,
}

impl JobCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(u32, u32) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(bool, Option<String>) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    fn complete(self, success: bool, error: Option<String>) {
        if let Some(f) = self.on_complete {
            f(success, error);
        }
    }
}

impl std::fmt::Debug for JobCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// One entry on the worker's channel.
struct QueuedJob {
    job_id: JobId,
    callbacks: JobCallbacks,
}

/// A job in the active table, tagged with its submission order.
struct ActiveEntry {
    seq: u64,
    job: PrintJob,
}

/// Terminal records of recently finished jobs, oldest evicted first.
#[derive(Default)]
struct History {
    records: HashMap<JobId, PrintJob>,
    order: VecDeque<JobId>,
}

impl History {
    fn get(&self, id: &JobId) -> Option<&PrintJob> {
        self.records.get(id)
    }

    fn record(&mut self, job: PrintJob) {
        let id = job.id();
        if self.records.insert(id, job).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > FINISHED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }
}

/// State shared between the service handle and the worker task.
struct Shared {
    jobs: Mutex<HashMap<JobId, ActiveEntry>>,
    history: Mutex<History>,
    backend: Arc<dyn PrintBackend>,
}

impl Shared {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, ActiveEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Newest record of a job that is no longer in the active table.
    fn finished_record(&self, id: &JobId) -> Option<PrintJob> {
        if let Some(job) = self.history().get(id) {
            return Some(job.clone());
        }
        self.backend.load_snapshot(id)
    }

    /// Persist the terminal snapshot, move the job from the table into the
    /// history, and tell the caller.
    fn finish(&self, job: PrintJob, callbacks: JobCallbacks) {
        let id = job.id();
        if let Err(e) = self.backend.persist_snapshot(&job) {
            warn!(job_id = %id, error = %e, "failed to persist job snapshot");
        }
        // History first: a concurrent submit that no longer finds the id in
        // the table must find it here.
        self.history().record(without_artifact(&job));
        self.jobs().remove(&id);

        let success = job.status == JobStatus::Completed;
        debug!(job_id = %id, status = %job.status, "job finished");
        callbacks.complete(success, job.error_message);
    }
}

/// Handle to the running print service.
///
/// Must be created inside a Tokio runtime. Dropping the handle stops the
/// worker once its current job is done.
pub struct PrintService {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<QueuedJob>,
    stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
    next_seq: AtomicU64,
}

impl PrintService {
    /// Spawn the worker for `backend`.
    pub fn start(backend: Arc<dyn PrintBackend>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            history: Mutex::new(History::default()),
            backend,
        });

        info!(backend = shared.backend.name(), "starting print service");
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), receiver, stop_rx));

        Self {
            shared,
            sender,
            stop,
            worker: Mutex::new(Some(worker)),
            accepting: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Build the configured backend and start the service on it.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(Self::start(create_backend(config)?))
    }

    pub fn backend(&self) -> &Arc<dyn PrintBackend> {
        &self.shared.backend
    }

    pub fn list_printers(&self) -> Vec<String> {
        self.shared.backend.list_printers()
    }

    pub fn default_printer(&self) -> Option<String> {
        self.shared.backend.default_printer()
    }

    /// Queue `job` for printing and return immediately.
    ///
    /// If the id has run before, its newest known record replaces the
    /// caller's copy, so attempts carry forward and a completed or cancelled
    /// job stays that way. A `Failed` job that can still be retried is reset
    /// to `Pending`. Fails with `ServiceStopped` after
    /// [`PrintService::shutdown`] and with `Validation` for an empty
    /// artifact, a job that is not eligible to run, or a job that is already
    /// queued.
    #[instrument(skip_all, fields(job_id = %job.id(), printer = %job.printer_name()))]
    pub fn submit(
        &self,
        job: PrintJob,
        artifact: Vec<u8>,
        callbacks: JobCallbacks,
    ) -> Result<JobId> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PrintError::ServiceStopped);
        }
        if artifact.is_empty() {
            return Err(PrintError::validation("a rendered artifact is required"));
        }

        let id = job.id();
        let digest = hash_bytes(&artifact);
        let persisted = self.shared.backend.load_snapshot(&id);

        // Held from the duplicate check until the id is on the channel.
        let mut jobs = self.shared.jobs();
        if jobs.contains_key(&id) {
            return Err(PrintError::validation(format!("job {id} is already queued")));
        }
        let known = self.shared.history().get(&id).cloned().or(persisted);
        let mut job = match known {
            Some(known) => {
                debug!(status = %known.status, attempts = known.attempts, "using recorded job state");
                known
            }
            None => job,
        };

        if !matches!(job.status, JobStatus::Pending | JobStatus::Failed) {
            return Err(PrintError::validation(format!(
                "job {id} is {} and cannot be submitted",
                job.status
            )));
        }
        if !job.can_retry() {
            return Err(PrintError::validation(format!(
                "job {id} has used all {} attempts",
                job.max_attempts
            )));
        }
        if job.status == JobStatus::Failed {
            info!(attempts = job.attempts, "resubmitting failed job");
            job.update_status(JobStatus::Pending, None);
        }

        job.artifact_sha256 = Some(digest);
        job.artifact = Some(artifact);
        let targets = job.target_ids().len();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        jobs.insert(id, ActiveEntry { seq, job });

        // Enqueue while the table is locked so the worker never sees an id it
        // cannot find.
        if self.sender.send(QueuedJob { job_id: id, callbacks }).is_err() {
            jobs.remove(&id);
            return Err(PrintError::ServiceStopped);
        }
        drop(jobs);

        info!(targets, "print job submitted");
        Ok(id)
    }

    /// Resubmit a failed job from its last recorded state.
    pub fn retry(&self, job_id: &JobId, artifact: Vec<u8>, callbacks: JobCallbacks) -> Result<JobId> {
        if self.shared.jobs().contains_key(job_id) {
            return Err(PrintError::validation(format!("job {job_id} is still active")));
        }
        let job = self
            .shared
            .finished_record(job_id)
            .ok_or(PrintError::UnknownJob(*job_id))?;
        self.submit(job, artifact, callbacks)
    }

    /// Current status: the active table first, then the finished-job
    /// history, then any persisted snapshot.
    pub fn status_of(&self, job_id: &JobId) -> Option<JobStatus> {
        if let Some(entry) = self.shared.jobs().get(job_id) {
            return Some(entry.job.status);
        }
        self.shared.finished_record(job_id).map(|j| j.status)
    }

    /// Copy of the job record (without artifact bytes), looked up like
    /// [`PrintService::status_of`].
    pub fn job(&self, job_id: &JobId) -> Option<PrintJob> {
        if let Some(entry) = self.shared.jobs().get(job_id) {
            return Some(without_artifact(&entry.job));
        }
        self.shared.finished_record(job_id)
    }

    /// Jobs that are pending or processing, in submission order. A job
    /// cancelled while queued drops out at once, before the worker reports it.
    pub fn active_jobs(&self) -> Vec<PrintJob> {
        let jobs = self.shared.jobs();
        let mut entries: Vec<&ActiveEntry> = jobs.values().filter(|e| e.job.is_active()).collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| without_artifact(&e.job)).collect()
    }

    /// Cancel a job that has not started yet.
    ///
    /// Returns `false` for jobs already processing (they always run to the
    /// end), terminal jobs, and unknown ids. The worker delivers the
    /// cancellation through the job's completion callback when it reaches it.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let mut jobs = self.shared.jobs();
        match jobs.get_mut(job_id) {
            Some(entry) if entry.job.status == JobStatus::Pending => {
                entry.job.update_status(JobStatus::Cancelled, Some(CANCELLED_BY_CALLER.into()));
                entry.job.artifact = None;
                info!("print job cancelled");
                true
            }
            Some(entry) => {
                debug!(status = %entry.job.status, "job cannot be cancelled");
                false
            }
            None => false,
        }
    }

    /// Whether the service still accepts jobs and its worker is alive.
    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
            && self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }

    /// Stop accepting jobs and wait for the worker to exit.
    ///
    /// The job in flight (if any) runs to completion; jobs still queued are
    /// cancelled and their callers notified. Returns `false` if `timeout`
    /// elapsed first, in which case the worker keeps finishing in the
    /// background and a later call can wait again.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::Release);
        self.stop.send_replace(true);

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            debug!("print service already stopped");
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("print service stopped");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "print worker terminated abnormally");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "timed out waiting for print worker"
                );
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                false
            }
        }
    }
}

impl Drop for PrintService {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

fn without_artifact(job: &PrintJob) -> PrintJob {
    let mut copy = job.clone();
    copy.artifact = None;
    copy
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker(
    shared: Arc<Shared>,
    mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
    mut stop: watch::Receiver<bool>,
) {
    info!("print worker started");

    loop {
        let next = tokio::select! {
            biased;
            // Fires on the shutdown signal, or when the handle is dropped.
            _ = stop.changed() => None,
            queued = receiver.recv() => queued,
        };
        let Some(queued) = next else { break };
        process_job(&shared, queued).await;
    }

    receiver.close();
    while let Ok(queued) = receiver.try_recv() {
        cancel_queued(&shared, queued);
    }

    info!("print worker shutting down");
}

/// Run one dequeued job through Processing to a terminal status.
async fn process_job(shared: &Arc<Shared>, queued: QueuedJob) {
    let QueuedJob {
        job_id,
        mut callbacks,
    } = queued;

    // Pending -> Processing, or pick up a caller cancellation.
    let started = {
        let mut jobs = shared.jobs();
        match jobs.get_mut(&job_id) {
            None => None,
            Some(entry) if entry.job.status == JobStatus::Cancelled => {
                Some(Err(without_artifact(&entry.job)))
            }
            Some(entry) => {
                entry.job.update_status(JobStatus::Processing, None);
                let artifact = entry.job.artifact.take().unwrap_or_default();
                Some(Ok((without_artifact(&entry.job), artifact)))
            }
        }
    };

    let (job, artifact) = match started {
        Some(Ok(started)) => started,
        Some(Err(cancelled)) => {
            info!(job_id = %job_id, "skipping cancelled job");
            shared.finish(cancelled, callbacks);
            return;
        }
        None => {
            error!(job_id = %job_id, "dequeued job missing from active table");
            callbacks.complete(false, Some(format!("job {job_id} was lost before it ran")));
            return;
        }
    };

    info!(job_id = %job_id, attempt = job.attempts, max = job.max_attempts, "processing print job");

    let backend = Arc::clone(&shared.backend);
    let mut on_progress = callbacks.on_progress.take();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut report = |current: u32, total: u32| {
            if let Some(f) = on_progress.as_mut() {
                f(current, total);
            }
        };
        backend.execute(&job, &artifact, &mut report)
    })
    .await
    .unwrap_or_else(|e| ExecutionOutcome::failed(panic_message(e)));

    // Processing -> Completed | Failed
    let finished = {
        let mut jobs = shared.jobs();
        jobs.get_mut(&job_id).map(|entry| {
            if outcome.success {
                entry.job.output_path = outcome.output_path.clone();
                entry.job.update_status(JobStatus::Completed, None);
            } else {
                let message = outcome.error.clone().unwrap_or_else(|| GENERIC_FAILURE.into());
                entry.job.update_status(JobStatus::Failed, Some(message));
            }
            entry.job.clone()
        })
    };

    match finished {
        Some(job) => {
            if job.status == JobStatus::Completed {
                info!(job_id = %job_id, "print job completed");
            } else {
                warn!(
                    job_id = %job_id,
                    error = job.error_message.as_deref().unwrap_or(GENERIC_FAILURE),
                    retryable = job.can_retry(),
                    "print job failed"
                );
            }
            shared.finish(job, callbacks);
        }
        None => {
            error!(job_id = %job_id, "job vanished while processing");
            callbacks.complete(outcome.success, outcome.error);
        }
    }
}

/// Cancel a job that was still queued when the worker stopped.
fn cancel_queued(shared: &Shared, queued: QueuedJob) {
    let QueuedJob { job_id, callbacks } = queued;
    let job = {
        let mut jobs = shared.jobs();
        jobs.get_mut(&job_id).map(|entry| {
            if entry.job.status == JobStatus::Pending {
                entry.job.update_status(JobStatus::Cancelled, Some(CANCELLED_BY_SHUTDOWN.into()));
            }
            without_artifact(&entry.job)
        })
    };

    match job {
        Some(job) => {
            info!(job_id = %job_id, "cancelling queued job at shutdown");
            shared.finish(job, callbacks);
        }
        None => callbacks.complete(false, Some(CANCELLED_BY_SHUTDOWN.into())),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "print execution was aborted".into();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("print backend panicked: {detail}"),
        None => "print backend panicked".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    use crate::simulation::{FixedRandom, SimulatedPrinter, SimulationBackend};

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Progress(u32, u32),
        Complete(bool, Option<String>),
    }

    fn recording(tx: UnboundedSender<Event>) -> JobCallbacks {
        let progress = tx.clone();
        JobCallbacks::new()
            .on_progress(move |c, t| {
                let _ = progress.send(Event::Progress(c, t));
            })
            .on_complete(move |ok, err| {
                let _ = tx.send(Event::Complete(ok, err));
            })
    }

    async fn next_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn wait_for_completion(rx: &mut UnboundedReceiver<Event>) -> (bool, Option<String>) {
        loop {
            if let Event::Complete(ok, err) = next_event(rx).await {
                return (ok, err);
            }
        }
    }

    fn simulation(dir: &Path, error_rate: f64) -> Arc<dyn PrintBackend> {
        let printers = vec![
            SimulatedPrinter::new("DEV_PDF_Printer", Duration::from_millis(10), error_rate)
                .expect("printer"),
        ];
        Arc::new(SimulationBackend::new(dir, printers).with_random(FixedRandom(0.5)))
    }

    fn job(targets: &[&str]) -> PrintJob {
        PrintJob::new(
            targets.iter().map(|s| s.to_string()).collect(),
            "DEV_PDF_Printer",
        )
        .expect("job")
    }

    /// Backend that holds every job until the test releases it.
    struct GateBackend {
        started: UnboundedSender<JobId>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl GateBackend {
        fn new() -> (Arc<Self>, UnboundedReceiver<JobId>, std::sync::mpsc::Sender<()>) {
            let (started, started_rx) = unbounded_channel();
            let (release_tx, release_rx) = std::sync::mpsc::channel();
            let backend = Arc::new(Self {
                started,
                release: Mutex::new(release_rx),
            });
            (backend, started_rx, release_tx)
        }
    }

    impl PrintBackend for GateBackend {
        fn name(&self) -> &'static str {
            "gate"
        }

        fn list_printers(&self) -> Vec<String> {
            vec!["DEV_PDF_Printer".into()]
        }

        fn default_printer(&self) -> Option<String> {
            None
        }

        fn execute(
            &self,
            job: &PrintJob,
            _artifact: &[u8],
            on_progress: &mut dyn FnMut(u32, u32),
        ) -> ExecutionOutcome {
            let _ = self.started.send(job.id());
            let released = self
                .release
                .lock()
                .expect("release lock")
                .recv_timeout(WAIT)
                .is_ok();
            on_progress(1, 1);
            if released {
                ExecutionOutcome::succeeded()
            } else {
                ExecutionOutcome::failed("gate never opened")
            }
        }
    }

    /// Backend that logs execution starts into a shared journal.
    struct JournalBackend {
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl PrintBackend for JournalBackend {
        fn name(&self) -> &'static str {
            "journal"
        }

        fn list_printers(&self) -> Vec<String> {
            Vec::new()
        }

        fn default_printer(&self) -> Option<String> {
            None
        }

        fn execute(
            &self,
            job: &PrintJob,
            _artifact: &[u8],
            _on_progress: &mut dyn FnMut(u32, u32),
        ) -> ExecutionOutcome {
            let first = &job.target_ids()[0];
            self.journal.lock().expect("journal").push(format!("start {first}"));
            if first == "boom" {
                panic!("printer on fire");
            }
            std::thread::sleep(Duration::from_millis(20));
            ExecutionOutcome::succeeded()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn end_to_end_simulated_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = simulation(dir.path(), 0.0);
        let service = PrintService::start(Arc::clone(&backend));
        let (tx, mut rx) = unbounded_channel();

        let id = service
            .submit(job(&["o1", "o2"]), vec![7u8; 10], recording(tx))
            .expect("submit");

        assert_eq!(next_event(&mut rx).await, Event::Progress(1, 2));
        assert_eq!(next_event(&mut rx).await, Event::Progress(2, 2));
        assert_eq!(next_event(&mut rx).await, Event::Complete(true, None));

        let metadata = dir
            .path()
            .join(format!("print_job_{id}"))
            .join("metadata.json");
        let snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&metadata).expect("metadata"))
                .expect("json");
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["attempts"], 1);
        assert_eq!(snapshot["artifact_sha256"], hash_bytes(&[7u8; 10]));

        assert!(service.active_jobs().is_empty());
        assert_eq!(service.status_of(&id), Some(JobStatus::Completed));
        let record = service.job(&id).expect("record");
        let output = record.output_path.expect("output path");
        assert_eq!(std::fs::read(output).expect("artifact"), vec![7u8; 10]);

        assert!(service.shutdown(WAIT).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_job_can_be_retried_until_budget_is_spent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = PrintService::start(simulation(dir.path(), 1.0));
        let (tx, mut rx) = unbounded_channel();

        let id = service
            .submit(job(&["o1"]), b"%PDF".to_vec(), recording(tx.clone()))
            .expect("submit");
        let (ok, err) = wait_for_completion(&mut rx).await;
        assert!(!ok);
        assert!(err.expect("error").contains("simulated failure"));

        let failed = service.job(&id).expect("snapshot");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!((failed.attempts, failed.max_attempts), (1, 3));
        assert!(failed.can_retry());

        for attempt in 2..=3 {
            service
                .retry(&id, b"%PDF".to_vec(), recording(tx.clone()))
                .expect("retry");
            let (ok, _) = wait_for_completion(&mut rx).await;
            assert!(!ok);
            assert_eq!(service.job(&id).expect("snapshot").attempts, attempt);
        }

        let exhausted = service.job(&id).expect("snapshot");
        assert!(!exhausted.can_retry());
        assert!(matches!(
            service.retry(&id, b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_copy_cannot_reset_attempts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = PrintService::start(simulation(dir.path(), 1.0));
        let (tx, mut rx) = unbounded_channel();
        let original = job(&["o1"]);
        let id = original.id();

        for attempt in 1..=3 {
            service
                .submit(original.clone(), b"%PDF".to_vec(), recording(tx.clone()))
                .expect("submit");
            let (ok, _) = wait_for_completion(&mut rx).await;
            assert!(!ok);
            let record = service.job(&id).expect("record");
            assert_eq!((record.attempts, record.max_attempts), (attempt, 3));
        }

        assert!(matches!(
            service.submit(original.clone(), b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));
        let snapshot = PrintJob::read_snapshot(
            dir.path().join(format!("print_job_{id}")).join("metadata.json"),
        )
        .expect("snapshot");
        assert_eq!(snapshot.attempts, 3);

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completed_job_is_not_printed_again() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let service = PrintService::start(Arc::new(JournalBackend {
            journal: Arc::clone(&journal),
        }));
        let (tx, mut rx) = unbounded_channel();
        let original = job(&["o1"]);

        service
            .submit(original.clone(), b"%PDF".to_vec(), recording(tx))
            .expect("submit");
        assert_eq!(wait_for_completion(&mut rx).await, (true, None));

        assert!(matches!(
            service.submit(original.clone(), b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));
        assert!(matches!(
            service.retry(&original.id(), b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));
        assert_eq!(*journal.lock().expect("journal"), vec!["start o1"]);

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_job_is_persisted_and_final() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printers = vec![
            SimulatedPrinter::new("DEV_PDF_Printer", Duration::from_millis(200), 0.0)
                .expect("printer"),
        ];
        let backend = Arc::new(SimulationBackend::new(dir.path(), printers));
        let service = PrintService::start(Arc::clone(&backend) as Arc<dyn PrintBackend>);
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();

        service
            .submit(job(&["o1", "o2"]), b"%PDF".to_vec(), recording(tx_a))
            .expect("submit first");
        let queued = job(&["o3"]);
        let id = service
            .submit(queued.clone(), b"%PDF".to_vec(), recording(tx_b))
            .expect("submit second");
        assert!(service.cancel(&id));

        assert_eq!(wait_for_completion(&mut rx_a).await, (true, None));
        let (ok, err) = wait_for_completion(&mut rx_b).await;
        assert!(!ok);
        assert_eq!(err.as_deref(), Some(CANCELLED_BY_CALLER));

        let snapshot = backend.load_snapshot(&id).expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(snapshot.attempts, 0);
        assert!(!backend.artifact_path(&id).exists());
        assert_eq!(service.status_of(&id), Some(JobStatus::Cancelled));

        assert!(matches!(
            service.retry(&id, b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));
        assert!(matches!(
            service.submit(queued, b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_of_unknown_job_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = PrintService::start(simulation(dir.path(), 0.0));
        assert!(matches!(
            service.retry(&JobId::new(), b"x".to_vec(), JobCallbacks::new()),
            Err(PrintError::UnknownJob(_))
        ));
        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn never_completed_before_processing() {
        let (backend, mut started, release) = GateBackend::new();
        let service = PrintService::start(backend);
        let (tx, mut rx) = unbounded_channel();

        let id = service
            .submit(job(&["o1"]), b"%PDF".to_vec(), recording(tx))
            .expect("submit");
        let early = service.status_of(&id).expect("tracked");
        assert!(matches!(early, JobStatus::Pending | JobStatus::Processing));

        assert_eq!(next_event(&mut started).await, id);
        assert_eq!(service.status_of(&id), Some(JobStatus::Processing));
        let in_flight = service.job(&id).expect("record");
        assert_eq!(in_flight.attempts, 1);
        assert!(in_flight.artifact.is_none());

        release.send(()).expect("release");
        assert_eq!(wait_for_completion(&mut rx).await, (true, None));
        // The gate backend keeps no snapshots; the history still knows it.
        assert_eq!(service.status_of(&id), Some(JobStatus::Completed));

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn jobs_run_in_submission_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let service = PrintService::start(Arc::new(JournalBackend {
            journal: Arc::clone(&journal),
        }));
        let (tx, mut rx) = unbounded_channel::<()>();

        for name in ["a", "b", "c"] {
            let journal = Arc::clone(&journal);
            let tx = tx.clone();
            let callbacks = JobCallbacks::new().on_complete(move |ok, _| {
                journal.lock().expect("journal").push(format!("complete {name} {ok}"));
                let _ = tx.send(());
            });
            service
                .submit(job(&[name]), b"%PDF".to_vec(), callbacks)
                .expect("submit");
        }

        let queued: Vec<String> = service
            .active_jobs()
            .iter()
            .map(|j| j.target_ids()[0].clone())
            .collect();
        assert!(queued.len() <= 3);
        assert!(["a", "b", "c"].ends_with(&queued.iter().map(String::as_str).collect::<Vec<_>>()));

        for _ in 0..3 {
            next_event(&mut rx).await;
        }
        assert_eq!(
            *journal.lock().expect("journal"),
            vec![
                "start a",
                "complete a true",
                "start b",
                "complete b true",
                "start c",
                "complete c true",
            ]
        );

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_backend_does_not_stop_worker() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let service = PrintService::start(Arc::new(JournalBackend {
            journal: Arc::clone(&journal),
        }));
        let (tx, mut rx) = unbounded_channel();

        let bad = service
            .submit(job(&["boom"]), b"%PDF".to_vec(), recording(tx.clone()))
            .expect("submit bad");
        service
            .submit(job(&["fine"]), b"%PDF".to_vec(), recording(tx))
            .expect("submit good");

        let (ok, err) = wait_for_completion(&mut rx).await;
        assert!(!ok);
        assert!(err.expect("error").contains("printer on fire"));
        assert_eq!(wait_for_completion(&mut rx).await, (true, None));
        assert_eq!(service.status_of(&bad), Some(JobStatus::Failed));

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_submissions_are_rejected_synchronously() {
        let (backend, mut started, release) = GateBackend::new();
        let service = PrintService::start(backend);

        assert!(matches!(
            service.submit(job(&["o1"]), Vec::new(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));
        assert!(service.active_jobs().is_empty());

        let mut done = job(&["o1"]);
        done.update_status(JobStatus::Processing, None);
        done.update_status(JobStatus::Completed, None);
        assert!(matches!(
            service.submit(done, b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));

        let held = job(&["o1"]);
        let again = held.clone();
        service
            .submit(held, b"%PDF".to_vec(), JobCallbacks::new())
            .expect("submit");
        next_event(&mut started).await;
        assert!(matches!(
            service.submit(again, b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::Validation(_))
        ));

        release.send(()).expect("release");
        assert!(service.shutdown(WAIT).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_job_can_be_cancelled() {
        let (backend, mut started, release) = GateBackend::new();
        let service = PrintService::start(backend);
        let (tx, mut rx) = unbounded_channel();

        let first = service
            .submit(job(&["o1"]), b"%PDF".to_vec(), JobCallbacks::new())
            .expect("submit first");
        let second = service
            .submit(job(&["o2"]), b"%PDF".to_vec(), recording(tx))
            .expect("submit second");

        assert_eq!(next_event(&mut started).await, first);
        assert!(!service.cancel(&first));
        assert!(service.cancel(&second));
        assert_eq!(service.status_of(&second), Some(JobStatus::Cancelled));
        let active: Vec<JobId> = service.active_jobs().iter().map(|j| j.id()).collect();
        assert_eq!(active, vec![first]);
        assert!(!service.cancel(&JobId::new()));

        release.send(()).expect("release");
        let (ok, err) = wait_for_completion(&mut rx).await;
        assert!(!ok);
        assert_eq!(err.as_deref(), Some(CANCELLED_BY_CALLER));

        service.shutdown(WAIT).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_when_idle_is_prompt_and_final() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = PrintService::start(simulation(dir.path(), 0.0));
        assert!(service.is_running());

        let begin = Instant::now();
        assert!(service.shutdown(Duration::from_secs(2)).await);
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert!(!service.is_running());

        assert!(matches!(
            service.submit(job(&["o1"]), b"%PDF".to_vec(), JobCallbacks::new()),
            Err(PrintError::ServiceStopped)
        ));
        assert!(service.shutdown(Duration::from_millis(10)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_finishes_current_job_and_cancels_queue() {
        let (backend, mut started, release) = GateBackend::new();
        let service = Arc::new(PrintService::start(backend));
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();

        let a = service
            .submit(job(&["o1"]), b"%PDF".to_vec(), recording(tx_a))
            .expect("submit a");
        service
            .submit(job(&["o2"]), b"%PDF".to_vec(), recording(tx_b))
            .expect("submit b");
        assert_eq!(next_event(&mut started).await, a);

        // The in-flight job outlives a short timeout.
        assert!(!service.shutdown(Duration::from_millis(50)).await);

        let stopper = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.shutdown(WAIT).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.send(()).expect("release");

        assert!(stopper.await.expect("join"));
        assert_eq!(wait_for_completion(&mut rx_a).await, (true, None));
        let (ok, err) = wait_for_completion(&mut rx_b).await;
        assert!(!ok);
        assert_eq!(err.as_deref(), Some(CANCELLED_BY_SHUTDOWN));
        assert!(service.active_jobs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_submitters_are_all_served() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printers =
            vec![SimulatedPrinter::new("DEV_PDF_Printer", Duration::ZERO, 0.0).expect("printer")];
        let backend = Arc::new(SimulationBackend::new(dir.path(), printers));
        let service = Arc::new(PrintService::start(backend));
        let (tx, mut rx) = unbounded_channel();

        let mut submitters = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            let tx = tx.clone();
            submitters.push(std::thread::spawn(move || {
                let order = format!("o{i}");
                service
                    .submit(job(&[order.as_str()]), vec![i as u8 + 1], recording(tx))
                    .expect("submit")
            }));
        }
        let ids: Vec<JobId> = submitters
            .into_iter()
            .map(|h| h.join().expect("submitter"))
            .collect();

        for _ in 0..ids.len() {
            assert!(wait_for_completion(&mut rx).await.0);
        }
        for id in &ids {
            assert_eq!(service.status_of(id), Some(JobStatus::Completed));
        }

        service.shutdown(WAIT).await;
    }
}
