//! Bounded-concurrency batch dispatch.
//!
//! A [`SessionFactory`] owns the process event loop. `submit` validates the
//! batch, spawns `worker_count` workers on the loop and blocks until every
//! dispatched session is terminal. Each worker pops the next item, runs one
//! session to completion, then pops again, so at most `worker_count`
//! sessions are ever live.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::event_loop::EventLoop;
use super::item::{InputSource, OutputSink, WorkItem, WorkItemId};
use super::protocol::{Payload, Session, SessionOutcome, SessionSettings};
use crate::config::ClientConfig;
use crate::core::auth::Authenticator;
use crate::core::callback::{LoggingCallback, SessionCallback, TeeCallback};
use crate::core::error::{StreamError, StreamResult};
use crate::core::stt::SessionOptions;
use crate::core::transport;
use crate::core::tts::SynthesizeOptions;
use crate::core::writers::{AudioFileWriter, TranscriptFileWriter};

// =============================================================================
// Policy and options
// =============================================================================

/// What happens to the rest of a batch when one session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop dispatching and cancel in-flight sessions.
    #[default]
    AbortBatch,
    /// Record the failure and keep going.
    Isolate,
}

/// Options shared by every session of one batch.
#[derive(Debug, Clone)]
pub enum ExchangeOptions {
    Recognize(Arc<SessionOptions>),
    Synthesize(Arc<SynthesizeOptions>),
}

impl From<SessionOptions> for ExchangeOptions {
    fn from(options: SessionOptions) -> Self {
        Self::Recognize(Arc::new(options))
    }
}

impl From<Arc<SessionOptions>> for ExchangeOptions {
    fn from(options: Arc<SessionOptions>) -> Self {
        Self::Recognize(options)
    }
}

impl From<SynthesizeOptions> for ExchangeOptions {
    fn from(options: SynthesizeOptions) -> Self {
        Self::Synthesize(Arc::new(options))
    }
}

impl From<Arc<SynthesizeOptions>> for ExchangeOptions {
    fn from(options: Arc<SynthesizeOptions>) -> Self {
        Self::Synthesize(options)
    }
}

impl ExchangeOptions {
    pub(crate) fn endpoint(&self, config: &ClientConfig) -> StreamResult<Url> {
        match self {
            Self::Recognize(options) => transport::endpoint_url(
                &config.stt_base_url()?,
                "/v1/recognize",
                &options.query_params(),
            ),
            Self::Synthesize(options) => transport::endpoint_url(
                &config.tts_base_url()?,
                "/v1/synthesize",
                &options.query_params(),
            ),
        }
    }

    /// Reject items this exchange cannot run, before anything connects.
    pub(crate) fn check_input(&self, input: &InputSource) -> StreamResult<()> {
        match (self, input) {
            (Self::Recognize(_), InputSource::Text(_)) => Err(StreamError::ConfigurationError(
                "Recognition requires an audio input".to_string(),
            )),
            (Self::Recognize(_), InputSource::File(path)) if !path.is_file() => {
                Err(StreamError::ConfigurationError(format!(
                    "Audio file not found: {}",
                    path.display()
                )))
            }
            (Self::Recognize(_), _) => Ok(()),
            (Self::Synthesize(_), InputSource::Text(text)) => SynthesizeOptions::validate_text(text),
            (Self::Synthesize(_), _) => Err(StreamError::ConfigurationError(
                "Synthesis requires a text input".to_string(),
            )),
        }
    }

    pub(crate) fn payload(&self, input: InputSource) -> StreamResult<Payload> {
        match (self, input) {
            (Self::Recognize(options), input) => Ok(Payload::Audio {
                options: Arc::clone(options),
                input,
            }),
            (Self::Synthesize(options), InputSource::Text(text)) => Ok(Payload::Text {
                options: Arc::clone(options),
                text,
            }),
            (Self::Synthesize(_), _) => Err(StreamError::ConfigurationError(
                "Synthesis requires a text input".to_string(),
            )),
        }
    }

    /// Callback for an item's output sink.
    pub(crate) fn sink(&self, label: &str, output: OutputSink) -> Arc<dyn SessionCallback> {
        match output {
            OutputSink::Handler(callback) => callback,
            OutputSink::Discard => Arc::new(LoggingCallback::new(label)),
            OutputSink::File(path) => {
                let writer: Arc<dyn SessionCallback> = match self {
                    Self::Recognize(_) => Arc::new(TranscriptFileWriter::new(label, path)),
                    Self::Synthesize(_) => Arc::new(AudioFileWriter::new(path)),
                };
                Arc::new(TeeCallback::new(vec![
                    Arc::new(LoggingCallback::new(label)),
                    writer,
                ]))
            }
        }
    }
}

// =============================================================================
// Batch report
// =============================================================================

/// Result of one `submit`.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Outcomes of every dispatched session, ordered by item id.
    pub outcomes: Vec<SessionOutcome>,
    /// Items never dispatched because the batch was aborted.
    pub cancelled: Vec<WorkItemId>,
    /// True when a failure stopped the batch early.
    pub aborted: bool,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &SessionOutcome> {
        self.outcomes.iter().filter(|o| o.is_closed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SessionOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn outcome(&self, id: WorkItemId) -> Option<&SessionOutcome> {
        self.outcomes.iter().find(|o| o.item_id == id)
    }

    /// Every item closed cleanly and none was cancelled.
    pub fn is_success(&self) -> bool {
        self.cancelled.is_empty() && self.outcomes.iter().all(SessionOutcome::is_success)
    }
}

// =============================================================================
// Work queue
// =============================================================================

/// FIFO of pending items. Closing drains it atomically with respect to `pop`.
#[derive(Debug, Default)]
struct WorkQueue {
    inner: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

impl WorkQueue {
    fn new(items: Vec<WorkItem>) -> Self {
        Self {
            inner: Mutex::new(QueueState {
                items: items.into(),
                closed: false,
            }),
        }
    }

    fn pop(&self) -> Option<WorkItem> {
        let mut state = self.inner.lock();
        if state.closed {
            return None;
        }
        state.items.pop_front()
    }

    /// Stop handing out items and return whatever was left.
    fn close(&self) -> Vec<WorkItem> {
        let mut state = self.inner.lock();
        state.closed = true;
        state.items.drain(..).collect()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Dispatcher {
    queue: WorkQueue,
    settings: SessionSettings,
    options: ExchangeOptions,
    policy: FailurePolicy,
    cancel: CancellationToken,
    cancelled: Mutex<Vec<WorkItemId>>,
}

impl Dispatcher {
    async fn run_item(self: &Arc<Self>, item: WorkItem) -> SessionOutcome {
        let (id, input, output) = item.into_parts();
        let label = input.label();
        let callback = self.options.sink(&label, output);
        debug!(item_id = id, input = %label, "Dispatching item");

        let mut session = Session::new(id, callback);
        if self.policy == FailurePolicy::AbortBatch {
            // Stop dispatch before the failed session tears down or reports
            let dispatcher = Arc::clone(self);
            session = session.with_failure_hook(Arc::new(move |failed: WorkItemId| {
                dispatcher.abort(failed)
            }));
        }
        match self.options.payload(input) {
            Ok(payload) => session.run(&self.settings, payload, &self.cancel).await,
            Err(err) => session.reject(err).await,
        }
    }

    fn abort(&self, failed: WorkItemId) {
        let remaining = self.queue.close();
        if !self.cancel.is_cancelled() {
            warn!(
                item_id = failed,
                remaining = remaining.len(),
                "Session failed; aborting batch"
            );
            self.cancel.cancel();
        }
        let mut cancelled = self.cancelled.lock();
        for item in remaining {
            warn!(item_id = item.id(), "Cancelled before dispatch");
            cancelled.push(item.id());
        }
    }
}

async fn run_worker(slot: usize, dispatcher: Arc<Dispatcher>) -> Vec<SessionOutcome> {
    let mut outcomes = Vec::new();
    while let Some(item) = dispatcher.queue.pop() {
        outcomes.push(dispatcher.run_item(item).await);
    }
    debug!(worker = slot, sessions = outcomes.len(), "Worker finished");
    outcomes
}

// =============================================================================
// Factory
// =============================================================================

/// Runs a batch of work items with at most `worker_count` live sessions.
///
/// Creating a factory claims the process event loop; a second factory fails
/// with [`StreamError::EventLoopRunning`] until the first is dropped or has
/// finished `submit`.
#[derive(Debug)]
pub struct SessionFactory {
    event_loop: EventLoop,
    config: Arc<ClientConfig>,
    authenticator: Authenticator,
    policy: FailurePolicy,
}

impl SessionFactory {
    pub fn new(config: ClientConfig) -> StreamResult<Self> {
        config.validate()?;
        let authenticator = Authenticator::new(config.auth.clone())?;
        Self::with_authenticator(Arc::new(config), authenticator)
    }

    /// Share an existing authenticator (and its cached token).
    pub fn with_authenticator(
        config: Arc<ClientConfig>,
        authenticator: Authenticator,
    ) -> StreamResult<Self> {
        let event_loop = EventLoop::acquire()?;
        Ok(Self {
            event_loop,
            config,
            authenticator,
            policy: FailurePolicy::default(),
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run every item and block until all dispatched sessions are terminal.
    ///
    /// Configuration problems are returned before any connection is opened.
    /// Session failures are reported through callbacks and the returned
    /// [`BatchReport`], never as an `Err`.
    pub fn submit(
        self,
        items: Vec<WorkItem>,
        options: impl Into<ExchangeOptions>,
        worker_count: usize,
    ) -> StreamResult<BatchReport> {
        let options = options.into();
        if worker_count == 0 {
            return Err(StreamError::ConfigurationError(
                "worker_count must be at least 1".to_string(),
            ));
        }
        let url = options.endpoint(&self.config)?;

        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id()) {
                return Err(StreamError::ConfigurationError(format!(
                    "Duplicate work item id {}",
                    item.id()
                )));
            }
            options.check_input(item.input())?;
            if let OutputSink::File(path) = item.output() {
                check_output_dir(path)?;
            }
        }

        if items.is_empty() {
            info!("Empty batch submitted; nothing to do");
            return Ok(BatchReport::default());
        }

        let workers = worker_count.min(items.len());
        info!(
            items = items.len(),
            workers,
            policy = ?self.policy,
            "Submitting batch"
        );

        let dispatcher = Arc::new(Dispatcher {
            queue: WorkQueue::new(items),
            settings: SessionSettings::new(&self.config, self.authenticator.clone(), url),
            options,
            policy: self.policy,
            cancel: CancellationToken::new(),
            cancelled: Mutex::new(Vec::new()),
        });

        let report = self.event_loop.block_on(run_batch(dispatcher, workers))?;
        info!(
            completed = report.completed().count(),
            failed = report.failed().count(),
            cancelled = report.cancelled.len(),
            "Batch finished"
        );
        Ok(report)
    }
}

fn check_output_dir(path: &Path) -> StreamResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            Err(StreamError::ConfigurationError(format!(
                "Output directory does not exist: {}",
                dir.display()
            )))
        }
        _ => Ok(()),
    }
}

async fn run_batch(dispatcher: Arc<Dispatcher>, workers: usize) -> BatchReport {
    let handles: Vec<_> = (0..workers)
        .map(|slot| tokio::spawn(run_worker(slot, Arc::clone(&dispatcher))))
        .collect();

    let mut outcomes = Vec::new();
    for joined in join_all(handles).await {
        match joined {
            Ok(mut batch) => outcomes.append(&mut batch),
            Err(e) => error!(error = %e, "Worker task failed"),
        }
    }
    outcomes.sort_by_key(|o| o.item_id);

    let mut cancelled = std::mem::take(&mut *dispatcher.cancelled.lock());
    cancelled.sort_unstable();

    BatchReport {
        outcomes,
        cancelled,
        aborted: dispatcher.cancel.is_cancelled(),
    }
}
