//! Text-to-Speech entry points.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::options::SynthesizeOptions;
use crate::config::ClientConfig;
use crate::core::auth::Authenticator;
use crate::core::callback::SessionCallback;
use crate::core::error::{StreamError, StreamResult};
use crate::core::session::protocol::{Session, SessionSettings};
use crate::core::session::{
    BatchReport, ExchangeOptions, FailurePolicy, InputSource, OutputSink, SessionFactory,
    SessionOutcome, WorkItem,
};

/// Client for the `/v1/synthesize` websocket.
#[derive(Debug, Clone)]
pub struct TextToSpeech {
    config: Arc<ClientConfig>,
    authenticator: Authenticator,
    policy: FailurePolicy,
}

impl TextToSpeech {
    pub fn new(config: ClientConfig) -> StreamResult<Self> {
        config.validate()?;
        let authenticator = Authenticator::new(config.auth.clone())?;
        Ok(Self {
            config: Arc::new(config),
            authenticator,
            policy: FailurePolicy::default(),
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Synthesize `text` on the caller's runtime, streaming audio to `callback`.
    pub async fn synthesize_using_websocket(
        &self,
        text: impl Into<String>,
        options: impl Into<Arc<SynthesizeOptions>>,
        callback: Arc<dyn SessionCallback>,
    ) -> StreamResult<SessionOutcome> {
        let exchange = ExchangeOptions::Synthesize(options.into());
        let input = InputSource::Text(text.into());
        exchange.check_input(&input)?;
        let url = exchange.endpoint(&self.config)?;
        let settings = SessionSettings::new(&self.config, self.authenticator.clone(), url);
        let payload = exchange.payload(input)?;

        Ok(Session::new(0, callback)
            .run(&settings, payload, &CancellationToken::new())
            .await)
    }

    /// Synthesize each `(text, path)` pair into its own audio file.
    ///
    /// Blocks the calling thread; must not be called from inside a runtime.
    pub fn synthesize_batch(
        &self,
        jobs: Vec<(String, PathBuf)>,
        options: SynthesizeOptions,
        worker_count: usize,
    ) -> StreamResult<BatchReport> {
        let mut targets = HashSet::with_capacity(jobs.len());
        let mut items = Vec::with_capacity(jobs.len());
        for (id, (text, path)) in jobs.into_iter().enumerate() {
            if !targets.insert(path.clone()) {
                return Err(StreamError::ConfigurationError(format!(
                    "Output path used twice: {}",
                    path.display()
                )));
            }
            items.push(WorkItem::new(
                id as u64,
                InputSource::Text(text),
                OutputSink::File(path),
            ));
        }

        info!(
            jobs = items.len(),
            voice = options.voice(),
            "Starting synthesis batch"
        );
        SessionFactory::with_authenticator(Arc::clone(&self.config), self.authenticator.clone())?
            .with_failure_policy(self.policy)
            .submit(items, options, worker_count)
    }
}
