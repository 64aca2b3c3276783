//! Build queues — the push/subscribe contract feeding builders.
//!
//! Two interchangeable backends: a bounded in-process channel for
//! single-process deployments and tests, and an at-least-once remote queue
//! over an SQS-compatible service. Callers hold only the trait object.

pub mod memory;
pub mod sqs;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::options::{BuildContext, BuildOptions};

pub use memory::MemoryBuildQueue;
pub use sqs::{SqsBuildQueue, SqsHttpApi};

/// Handler for recoverable consumer errors and recovered panics. When no
/// handler is configured those errors are logged and dropped; panics are
/// still caught either way.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// A queue of build requests.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    /// Enqueue a build request. Safe to call concurrently.
    async fn push(&self, ctx: CancellationToken, options: BuildOptions) -> Result<()>;

    /// Deliver dequeued build contexts to `sink`. Returns only when the
    /// delivery loop terminates; the sink's capacity is the backpressure
    /// knob.
    async fn subscribe(&self, sink: mpsc::Sender<BuildContext>) -> Result<()>;
}

/// Which backend to construct.
#[derive(Debug, Clone)]
pub enum QueueConfig {
    /// Bounded single-process queue.
    Memory { capacity: usize },
    /// SQS-compatible remote queue.
    Sqs { queue_url: String },
}

/// Build a queue from its config. The error handler applies to remote
/// consumers; the in-memory backend has no recoverable error path.
pub fn from_config(
    config: QueueConfig,
    err_handler: Option<ErrorHandler>,
) -> Arc<dyn BuildQueue> {
    match config {
        QueueConfig::Memory { capacity } => Arc::new(MemoryBuildQueue::new(capacity)),
        QueueConfig::Sqs { queue_url } => {
            let mut queue = SqsBuildQueue::new(Arc::new(SqsHttpApi::new()), queue_url);
            if let Some(handler) = err_handler {
                queue = queue.with_error_handler(handler);
            }
            Arc::new(queue)
        }
    }
}
