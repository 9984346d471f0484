//! Speech-to-Text entry points.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::options::SessionOptions;
use crate::config::ClientConfig;
use crate::core::auth::Authenticator;
use crate::core::callback::SessionCallback;
use crate::core::error::{StreamError, StreamResult};
use crate::core::session::protocol::{Session, SessionSettings};
use crate::core::session::{
    BatchReport, ExchangeOptions, FailurePolicy, InputSource, OutputSink, SessionFactory,
    SessionOutcome, WorkItem,
};
use crate::core::writers::transcript_path;

/// Client for the `/v1/recognize` websocket.
///
/// Cloning is cheap; clones share the IAM token cache.
#[derive(Debug, Clone)]
pub struct SpeechToText {
    config: Arc<ClientConfig>,
    authenticator: Authenticator,
    policy: FailurePolicy,
}

impl SpeechToText {
    pub fn new(config: ClientConfig) -> StreamResult<Self> {
        config.validate()?;
        let authenticator = Authenticator::new(config.auth.clone())?;
        Ok(Self {
            config: Arc::new(config),
            authenticator,
            policy: FailurePolicy::default(),
        })
    }

    /// Policy applied by [`recognize_batch`](Self::recognize_batch).
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one recognition on the caller's runtime.
    ///
    /// Returns `Err` only for problems found before connecting. Everything
    /// after that is delivered to `callback` and summarized in the outcome.
    pub async fn recognize_using_websocket(
        &self,
        input: InputSource,
        options: impl Into<Arc<SessionOptions>>,
        callback: Arc<dyn SessionCallback>,
    ) -> StreamResult<SessionOutcome> {
        let exchange = ExchangeOptions::Recognize(options.into());
        exchange.check_input(&input)?;
        let url = exchange.endpoint(&self.config)?;
        let settings = SessionSettings::new(&self.config, self.authenticator.clone(), url);
        let payload = exchange.payload(input)?;

        Ok(Session::new(0, callback)
            .run(&settings, payload, &CancellationToken::new())
            .await)
    }

    /// Transcribe `files` with at most `worker_count` concurrent sessions,
    /// writing `<stem>.json` for each into `output_dir`.
    ///
    /// Blocks the calling thread; must not be called from inside a runtime.
    pub fn recognize_batch(
        &self,
        files: Vec<PathBuf>,
        options: SessionOptions,
        worker_count: usize,
        output_dir: &Path,
    ) -> StreamResult<BatchReport> {
        std::fs::create_dir_all(output_dir).map_err(|e| {
            StreamError::Io(format!(
                "Failed to create output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        let mut targets = HashSet::with_capacity(files.len());
        let mut items = Vec::with_capacity(files.len());
        for (id, file) in files.into_iter().enumerate() {
            let target = transcript_path(output_dir, &file);
            if !targets.insert(target.clone()) {
                return Err(StreamError::ConfigurationError(format!(
                    "Two inputs map to the same transcript {}",
                    target.display()
                )));
            }
            items.push(WorkItem::new(
                id as u64,
                InputSource::File(file),
                OutputSink::File(target),
            ));
        }

        info!(
            files = items.len(),
            output_dir = %output_dir.display(),
            "Starting recognition batch"
        );
        self.recognize_items(items, options, worker_count)
    }

    /// Run arbitrary work items through one batch.
    pub fn recognize_items(
        &self,
        items: Vec<WorkItem>,
        options: SessionOptions,
        worker_count: usize,
    ) -> StreamResult<BatchReport> {
        SessionFactory::with_authenticator(Arc::clone(&self.config), self.authenticator.clone())?
            .with_failure_policy(self.policy)
            .submit(items, options, worker_count)
    }
}
