//! Bounded in-process build queue.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::BuildQueue;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::options::{BuildContext, BuildOptions};

/// FIFO queue over a bounded tokio channel. `push` blocks when the buffer
/// is full; ordering is strict and nothing is ever delivered twice.
pub struct MemoryBuildQueue {
    tx: mpsc::Sender<BuildContext>,
    rx: Mutex<mpsc::Receiver<BuildContext>>,
}

impl MemoryBuildQueue {
    /// Capacity is fixed at construction and clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl BuildQueue for MemoryBuildQueue {
    async fn push(&self, ctx: CancellationToken, options: BuildOptions) -> Result<()> {
        self.tx
            .send(BuildContext { options, ctx })
            .await
            .map_err(|_| Error::Queue("in-memory queue closed".to_string()))?;
        metrics::queue_message_sent("memory");
        Ok(())
    }

    async fn subscribe(&self, sink: mpsc::Sender<BuildContext>) -> Result<()> {
        let mut rx = self.rx.lock().await;
        while let Some(item) = rx.recv().await {
            metrics::queue_message_received("memory");
            if sink.send(item).await.is_err() {
                // Consumer went away; nothing left to deliver to.
                return Ok(());
            }
        }
        Ok(())
    }
}
