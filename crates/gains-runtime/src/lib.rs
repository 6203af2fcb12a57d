//! gains-runtime
//!
//! The long-running tasks of the service and the seams between them:
//! - feed transport ([`FeedProducer`] / [`FeedConsumer`], [`memory_feed`])
//! - Ingestion Loop ([`Ingestor`], [`run_ingest_loop`])
//! - Credential Refresh Loop ([`RefreshLoop`])
//! - Poll Loop ([`PollLoop`])
//! - interactive OAuth authorization ([`authorize_interactive`])
//!
//! Each loop takes a `CancellationToken` and returns once it fires.

mod authorize;
mod feed;
mod gate;
mod ingest;
mod metrics;
mod poll;
mod refresh;

pub use authorize::authorize_interactive;
pub use feed::{
    memory_feed, CommitCursor, FeedConsumer, FeedMessage, FeedProducer, MemoryFeedConsumer,
    MemoryFeedProducer,
};
pub use gate::AccountGate;
pub use ingest::{run_ingest_loop, IngestError, Ingestor, MatchRun, MessageReport, RetryPolicy};
pub use metrics::{MetricsSnapshot, RefreshOutcome, RuntimeMetrics};
pub use poll::{OrderSource, PollLoop, PollWindows};
pub use refresh::{refresh_once, RefreshLoop, TokenRefresher, TokenSink};
