//! Bounded ingestion pipeline.
//!
//! Rules hand extracted records to [`IngestPipeline::submit`], which never
//! waits for storage while the queue has room. A fixed pool of workers drains
//! the queue into a [`RecordSink`]. When the queue is full the caller persists
//! the record itself and gets the storage error back, so a record is never
//! dropped for lack of capacity. Workers log failures and drop the record.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wxbackup_storage::{ArticleKey, Database, NewArticle, NewProfile};

/// Default number of persistence workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default bound on draining the queue at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A record on its way to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Profile(NewProfile),
    Article(NewArticle),
    /// The article could not be captured.
    ArticleFailed(ArticleKey),
}

impl Record {
    fn kind(&self) -> &'static str {
        match self {
            Record::Profile(_) => "profile",
            Record::Article(_) => "article",
            Record::ArticleFailed(_) => "article_failed",
        }
    }
}

/// Destination of ingested records.
pub trait RecordSink: Send + Sync {
    /// Persists one record.
    fn persist(&self, record: &Record) -> wxbackup_storage::Result<()>;
}

impl RecordSink for Database {
    fn persist(&self, record: &Record) -> wxbackup_storage::Result<()> {
        match record {
            Record::Profile(profile) => self.upsert_profile(profile).map(|_| ()),
            Record::Article(article) => self.upsert_article(article).map(|_| ()),
            Record::ArticleFailed(key) => self.mark_article_failed(key).map(|_| ()),
        }
    }
}

/// Pipeline sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of persistence workers.
    pub workers: usize,
    /// Queue capacity.
    pub capacity: usize,
    /// Bound on draining at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the shutdown drain bound.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Clamps zero workers or capacity to one.
    pub fn normalized(mut self) -> Self {
        if self.workers == 0 {
            warn!("Pipeline configured with zero workers, using 1");
            self.workers = 1;
        }
        if self.capacity == 0 {
            warn!("Pipeline configured with zero capacity, using 1");
            self.capacity = 1;
        }
        self
    }
}

#[derive(Default)]
struct PipelineState {
    sender: Option<mpsc::Sender<Record>>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Worker pool draining a bounded queue into a sink.
pub struct IngestPipeline {
    sink: Arc<dyn RecordSink>,
    config: PipelineConfig,
    runtime: Handle,
    state: Mutex<PipelineState>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl IngestPipeline {
    /// Creates a pipeline. Workers start on the first submission and run on
    /// the blocking pool of `runtime`.
    pub fn new(sink: Arc<dyn RecordSink>, config: PipelineConfig, runtime: Handle) -> Self {
        Self {
            sink,
            config: config.normalized(),
            runtime,
            state: Mutex::new(PipelineState::default()),
        }
    }

    /// Creates a pipeline on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn on_current_runtime(sink: Arc<dyn RecordSink>, config: PipelineConfig) -> Self {
        Self::new(sink, config, Handle::current())
    }

    /// Effective configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns true once workers have started and until shutdown.
    pub fn is_running(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Hands a record to the pipeline.
    ///
    /// Returns `Ok(true)` when the record was queued. When the queue is full,
    /// or the pipeline has shut down, the record is persisted before
    /// returning; `Ok(false)` then means it is stored, and a storage failure
    /// is returned to the caller.
    pub fn submit(&self, record: Record) -> wxbackup_storage::Result<bool> {
        let Some(sender) = self.sender() else {
            return self.persist_now(&record).map(|()| false);
        };

        match sender.try_send(record) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(record)) => {
                debug!(kind = record.kind(), "Ingest queue full, persisting synchronously");
                self.persist_now(&record).map(|()| false)
            }
            Err(TrySendError::Closed(record)) => self.persist_now(&record).map(|()| false),
        }
    }

    /// Closes the queue and waits for queued and in-flight records.
    ///
    /// Waits at most the configured shutdown timeout; on timeout the
    /// remaining work is abandoned and a warning is logged.
    pub async fn shutdown(&self) {
        let workers = {
            let mut state = self.state.lock();
            state.closed = true;
            state.sender = None;
            std::mem::take(&mut state.workers)
        };

        if workers.is_empty() {
            return;
        }

        let count = workers.len();
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(workers),
        )
        .await
        {
            Ok(_) => info!(workers = count, "Ingest pipeline drained"),
            Err(_) => warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Ingest pipeline shutdown timed out, queued records may be lost"
            ),
        }
    }

    /// Returns the queue sender, starting the workers on first use.
    fn sender(&self) -> Option<mpsc::Sender<Record>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        if state.sender.is_none() {
            self.start(&mut state);
        }
        state.sender.clone()
    }

    fn start(&self, state: &mut PipelineState) {
        let (tx, rx) = mpsc::channel(self.config.capacity);
        let rx = Arc::new(Mutex::new(rx));

        state.workers = (0..self.config.workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let sink = Arc::clone(&self.sink);
                self.runtime
                    .spawn_blocking(move || run_worker(worker, rx, sink))
            })
            .collect();
        state.sender = Some(tx);

        info!(
            workers = self.config.workers,
            capacity = self.config.capacity,
            "Ingest pipeline started"
        );
    }

    fn persist_now(&self, record: &Record) -> wxbackup_storage::Result<()> {
        self.sink.persist(record).inspect_err(|e| {
            warn!(kind = record.kind(), error = %e, "Synchronous persist failed");
        })
    }
}

fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Record>>>,
    sink: Arc<dyn RecordSink>,
) {
    loop {
        let next = rx.lock().blocking_recv();
        let Some(record) = next else {
            break;
        };

        if let Err(e) = sink.persist(&record) {
            error!(worker, kind = record.kind(), error = %e, "Failed to persist record");
        }
    }
    debug!(worker, "Ingest worker stopped");
}
