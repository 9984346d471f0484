//! The single event loop a factory drives its sessions on.
//!
//! Only one may exist per process. It lives on the thread that created it and
//! every session of a batch runs as a task on it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::core::error::{StreamError, StreamResult};

static EVENT_LOOP_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Process-unique current-thread runtime.
#[derive(Debug)]
pub struct EventLoop {
    runtime: Option<Runtime>,
}

impl EventLoop {
    /// Claim the process-wide event loop.
    ///
    /// Fails with [`StreamError::EventLoopRunning`] while another instance is
    /// alive, and with a configuration error when called from inside an
    /// async runtime (blocking there would deadlock it).
    pub fn acquire() -> StreamResult<Self> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(StreamError::ConfigurationError(
                "A batch cannot be submitted from inside an async runtime; call it from a plain thread"
                    .to_string(),
            ));
        }
        if EVENT_LOOP_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::EventLoopRunning);
        }

        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => {
                debug!("Event loop acquired");
                Ok(Self {
                    runtime: Some(runtime),
                })
            }
            Err(e) => {
                EVENT_LOOP_ACTIVE.store(false, Ordering::Release);
                Err(StreamError::Io(format!("Failed to start event loop: {e}")))
            }
        }
    }

    /// True while some `EventLoop` is alive in this process.
    pub fn is_active() -> bool {
        EVENT_LOOP_ACTIVE.load(Ordering::Acquire)
    }

    /// Run `future` to completion on the loop, blocking the calling thread.
    pub fn block_on<F: Future>(&self, future: F) -> StreamResult<F::Output> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(StreamError::Io("Event loop already shut down".to_string())),
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Shut the runtime down before another loop may claim the slot
        if let Some(runtime) = self.runtime.take() {
            drop(runtime);
        }
        EVENT_LOOP_ACTIVE.store(false, Ordering::Release);
        debug!("Event loop released");
    }
}
