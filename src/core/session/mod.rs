//! Streaming sessions and the batch factory that dispatches them.

pub mod event_loop;
pub mod factory;
pub mod item;
pub mod protocol;
pub mod state;

pub use event_loop::EventLoop;
pub use factory::{BatchReport, ExchangeOptions, FailurePolicy, SessionFactory};
pub use item::{AudioFeed, AudioFeeder, InputSource, OutputSink, WorkItem, WorkItemId, audio_feed};
pub use protocol::SessionOutcome;
pub use state::{ConnectionState, StateTracker};
