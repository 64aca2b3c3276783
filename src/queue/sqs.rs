//! Remote build queue over an SQS-compatible message service.
//!
//! At-least-once delivery: messages are hidden for the provider's
//! visibility timeout once received and re-delivered unless acknowledged,
//! so the consumer issues one batch delete per received batch after every
//! message has been accepted by the sink. Downstream tolerates duplicates
//! via the coordinator's artifact short-circuit.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BuildQueue, ErrorHandler};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::options::{BuildContext, BuildOptions};

/// Provider batch ceiling per receive call.
const MAX_BATCH: u32 = 10;
/// Long-poll wait per receive call, in seconds.
const WAIT_TIME_SECS: u32 = 20;

/// One received delivery: the receipt handle is the per-delivery token
/// required to delete exactly this delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SqsMessage {
    #[serde(rename = "ReceiptHandle", default)]
    pub receipt_handle: String,
    #[serde(rename = "Body", default)]
    pub body: String,
}

/// One entry of a batch delete: a synthetic batch-position id paired with
/// the delivery's receipt handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqsDeleteEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "ReceiptHandle")]
    pub receipt_handle: String,
}

/// The narrow queue-service surface the consumer needs. Kept as a trait so
/// tests can script the transport.
#[async_trait]
pub trait SqsApi: Send + Sync {
    async fn send_message(&self, queue_url: &str, body: &str) -> Result<()>;

    async fn receive_message(&self, queue_url: &str) -> Result<Vec<SqsMessage>>;

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsDeleteEntry>,
    ) -> Result<()>;
}

#[derive(Deserialize, Default)]
struct ReceiveMessageOutput {
    #[serde(rename = "Messages", default)]
    messages: Vec<SqsMessage>,
}

#[derive(Deserialize, Default)]
struct DeleteMessageBatchOutput {
    #[serde(rename = "Failed", default)]
    failed: Vec<serde_json::Value>,
}

/// [`SqsApi`] over the `x-amz-json-1.0` wire protocol, for SQS-compatible
/// endpoints (ElasticMQ, LocalStack). Request signing is the deployment's
/// concern, not this client's.
pub struct SqsHttpApi {
    http: reqwest::Client,
}

impl SqsHttpApi {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn call(
        &self,
        queue_url: &str,
        target: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(queue_url)
            .header("X-Amz-Target", format!("AmazonSQS.{target}"))
            .header("Content-Type", "application/x-amz-json-1.0")
            .body(payload.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api { status, message });
        }

        Ok(resp.json().await.unwrap_or(serde_json::Value::Null))
    }
}

impl Default for SqsHttpApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqsApi for SqsHttpApi {
    async fn send_message(&self, queue_url: &str, body: &str) -> Result<()> {
        self.call(
            queue_url,
            "SendMessage",
            serde_json::json!({
                "QueueUrl": queue_url,
                "MessageBody": body,
            }),
        )
        .await?;
        Ok(())
    }

    async fn receive_message(&self, queue_url: &str) -> Result<Vec<SqsMessage>> {
        let value = self
            .call(
                queue_url,
                "ReceiveMessage",
                serde_json::json!({
                    "QueueUrl": queue_url,
                    "MaxNumberOfMessages": MAX_BATCH,
                    "WaitTimeSeconds": WAIT_TIME_SECS,
                }),
            )
            .await?;

        if value.is_null() {
            return Ok(Vec::new());
        }

        let output: ReceiveMessageOutput = serde_json::from_value(value)?;
        Ok(output.messages)
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsDeleteEntry>,
    ) -> Result<()> {
        let value = self
            .call(
                queue_url,
                "DeleteMessageBatch",
                serde_json::json!({
                    "QueueUrl": queue_url,
                    "Entries": entries,
                }),
            )
            .await?;

        if value.is_null() {
            return Ok(());
        }

        let output: DeleteMessageBatchOutput = serde_json::from_value(value)?;
        if !output.failed.is_empty() {
            return Err(Error::Queue(format!(
                "{} messages failed to delete",
                output.failed.len()
            )));
        }
        Ok(())
    }
}

/// At-least-once build queue over an [`SqsApi`] transport.
pub struct SqsBuildQueue {
    api: Arc<dyn SqsApi>,
    queue_url: String,
    err_handler: Option<ErrorHandler>,
    shutdown: CancellationToken,
}

impl SqsBuildQueue {
    pub fn new(api: Arc<dyn SqsApi>, queue_url: impl Into<String>) -> Self {
        Self {
            api,
            queue_url: queue_url.into(),
            err_handler: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Route recoverable errors and recovered panics to `handler` instead
    /// of the log.
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.err_handler = Some(handler);
        self
    }

    /// Ask running subscribers to stop after their current iteration.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// A handle a supervisor can hold to stop subscribers remotely.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[async_trait]
impl BuildQueue for SqsBuildQueue {
    async fn push(&self, _ctx: CancellationToken, options: BuildOptions) -> Result<()> {
        // Cancellation does not survive serialization; consumers attach a
        // fresh context on dequeue.
        let body = serde_json::to_string(&options)?;
        self.api.send_message(&self.queue_url, &body).await?;
        metrics::queue_message_sent("sqs");
        Ok(())
    }

    async fn subscribe(&self, sink: mpsc::Sender<BuildContext>) -> Result<()> {
        loop {
            // Each iteration runs in its own task so a panic anywhere in
            // receive/deliver/ack is contained to the iteration instead of
            // unwinding through the hosting process.
            let mut iteration = tokio::spawn(run_iteration(
                Arc::clone(&self.api),
                self.queue_url.clone(),
                sink.clone(),
                self.err_handler.clone(),
            ));

            let outcome = tokio::select! {
                res = &mut iteration => res,
                _ = self.shutdown.cancelled() => {
                    iteration.abort();
                    tracing::info!(queue_url = %self.queue_url, "Queue consumer shutting down");
                    return Ok(());
                }
            };

            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::SinkClosed) => return Ok(()),
                Err(e) if e.is_panic() => {
                    let payload = panic_payload(e.into_panic());
                    report(&self.err_handler, Error::Panic(payload));
                    return Ok(());
                }
                Err(_) => return Ok(()),
            }
        }
    }
}

enum Flow {
    Continue,
    SinkClosed,
}

/// One consumer iteration: long-poll receive, deliver the batch to the
/// sink in provider order, then acknowledge the whole batch with a single
/// delete call. Only deleted messages escape re-delivery.
async fn run_iteration(
    api: Arc<dyn SqsApi>,
    queue_url: String,
    sink: mpsc::Sender<BuildContext>,
    err_handler: Option<ErrorHandler>,
) -> Flow {
    let messages = match api.receive_message(&queue_url).await {
        Ok(messages) => messages,
        Err(e) => {
            report(&err_handler, e);
            return Flow::Continue;
        }
    };

    if messages.is_empty() {
        return Flow::Continue;
    }

    let mut entries = Vec::with_capacity(messages.len());
    for (i, message) in messages.into_iter().enumerate() {
        entries.push(SqsDeleteEntry {
            id: i.to_string(),
            receipt_handle: message.receipt_handle.clone(),
        });

        let options = match serde_json::from_str::<BuildOptions>(&message.body) {
            Ok(options) => options,
            Err(e) => {
                // Acked with the rest of the batch: redelivering a poison
                // message forever helps nobody.
                report(&err_handler, Error::Json(e));
                continue;
            }
        };

        let delivery = BuildContext {
            options,
            ctx: CancellationToken::new(),
        };
        if sink.send(delivery).await.is_err() {
            return Flow::SinkClosed;
        }
        metrics::queue_message_received("sqs");
    }

    let count = entries.len();
    match api.delete_message_batch(&queue_url, entries).await {
        Ok(()) => metrics::queue_messages_deleted(count),
        Err(e) => report(&err_handler, e),
    }

    Flow::Continue
}

fn report(handler: &Option<ErrorHandler>, err: Error) {
    metrics::consumer_error();
    match handler {
        Some(handler) => handler(err),
        None => tracing::warn!("queue consumer error: {err}"),
    }
}

fn panic_payload(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    const QUEUE_URL: &str = "https://sqs.example.com/123/builds";

    enum ReceiveStep {
        Batch(Vec<SqsMessage>),
        Error(&'static str),
        Panic(&'static str),
    }

    struct MockSqsApi {
        sent: Mutex<Vec<(String, String)>>,
        script: Mutex<VecDeque<ReceiveStep>>,
        deleted: Mutex<Vec<(String, Vec<SqsDeleteEntry>)>>,
    }

    impl MockSqsApi {
        fn new(script: Vec<ReceiveStep>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                script: Mutex::new(VecDeque::from(script)),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqsApi for MockSqsApi {
        async fn send_message(&self, queue_url: &str, body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((queue_url.to_string(), body.to_string()));
            Ok(())
        }

        async fn receive_message(&self, _queue_url: &str) -> Result<Vec<SqsMessage>> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(ReceiveStep::Batch(messages)) => Ok(messages),
                Some(ReceiveStep::Error(msg)) => Err(Error::Queue(msg.to_string())),
                Some(ReceiveStep::Panic(msg)) => panic!("{msg}"),
                None => {
                    // Script exhausted: behave like an idle long poll.
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn delete_message_batch(
            &self,
            queue_url: &str,
            entries: Vec<SqsDeleteEntry>,
        ) -> Result<()> {
            self.deleted
                .lock()
                .unwrap()
                .push((queue_url.to_string(), entries));
            Ok(())
        }
    }

    fn message(receipt_handle: &str, repository: &str) -> SqsMessage {
        SqsMessage {
            receipt_handle: receipt_handle.to_string(),
            body: format!(
                r#"{{"Repository":"{repository}","Sha":"abcd","Branch":"master","NoCache":false}}"#
            ),
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn push_sends_the_canonical_message_body() {
        let api = Arc::new(MockSqsApi::new(Vec::new()));
        let queue = SqsBuildQueue::new(api.clone(), QUEUE_URL);

        let options = BuildOptions {
            id: "01234567-89ab-cdef-0123-456789abcdef".to_string(),
            repository: "remind101/acme-inc".to_string(),
            sha: "abcd".to_string(),
            branch: "master".to_string(),
            no_cache: false,
        };
        queue.push(CancellationToken::new(), options).await.unwrap();

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, QUEUE_URL);
        assert_eq!(
            sent[0].1,
            r#"{"ID":"01234567-89ab-cdef-0123-456789abcdef","Repository":"remind101/acme-inc","Sha":"abcd","Branch":"master","NoCache":false}"#
        );
    }

    #[tokio::test]
    async fn subscribe_delivers_batch_in_order_and_acks_once() {
        let api = Arc::new(MockSqsApi::new(vec![ReceiveStep::Batch(vec![
            message("a", "remind101/acme-inc-1"),
            message("b", "remind101/acme-inc-2"),
        ])]));
        let queue = Arc::new(SqsBuildQueue::new(api.clone(), QUEUE_URL));

        let (tx, mut rx) = mpsc::channel(2);
        let task = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.subscribe(tx).await }
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.options.repository, "remind101/acme-inc-1");
        assert_eq!(first.options.sha, "abcd");
        assert!(!first.ctx.is_cancelled());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.options.repository, "remind101/acme-inc-2");

        wait_for(|| !api.deleted.lock().unwrap().is_empty()).await;
        {
            let deleted = api.deleted.lock().unwrap();
            assert_eq!(deleted.len(), 1);
            assert_eq!(deleted[0].0, QUEUE_URL);
            assert_eq!(
                deleted[0].1,
                vec![
                    SqsDeleteEntry {
                        id: "0".to_string(),
                        receipt_handle: "a".to_string(),
                    },
                    SqsDeleteEntry {
                        id: "1".to_string(),
                        receipt_handle: "b".to_string(),
                    },
                ]
            );
        }

        queue.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receive_panic_reports_once_and_stops_the_loop() {
        let api = Arc::new(MockSqsApi::new(vec![ReceiveStep::Panic("boom")]));
        let (err_tx, mut err_rx) = mpsc::channel(4);
        let handler: ErrorHandler = Arc::new(move |err: Error| {
            let _ = err_tx.try_send(err.to_string());
        });

        let queue = SqsBuildQueue::new(api, QUEUE_URL).with_error_handler(handler);
        let (tx, _rx) = mpsc::channel(1);

        // Returns instead of unwinding.
        queue.subscribe(tx).await.unwrap();

        assert_eq!(err_rx.recv().await.unwrap(), "panic: boom");
        assert!(err_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn receive_errors_are_reported_and_the_loop_continues() {
        let api = Arc::new(MockSqsApi::new(vec![
            ReceiveStep::Error("receive failed"),
            ReceiveStep::Batch(vec![message("a", "remind101/acme-inc")]),
        ]));
        let (err_tx, mut err_rx) = mpsc::channel(4);
        let handler: ErrorHandler = Arc::new(move |err: Error| {
            let _ = err_tx.try_send(err.to_string());
        });
        let queue = Arc::new(
            SqsBuildQueue::new(api.clone(), QUEUE_URL).with_error_handler(handler),
        );

        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.subscribe(tx).await }
        });

        assert_eq!(
            err_rx.recv().await.unwrap(),
            "queue unavailable: receive failed"
        );

        // The batch after the failed receive still arrives.
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.options.repository, "remind101/acme-inc");

        queue.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn undecodable_bodies_are_reported_and_acked_with_the_batch() {
        let bad = SqsMessage {
            receipt_handle: "a".to_string(),
            body: "not json".to_string(),
        };
        let api = Arc::new(MockSqsApi::new(vec![ReceiveStep::Batch(vec![
            bad,
            message("b", "remind101/acme-inc-2"),
        ])]));
        let (err_tx, mut err_rx) = mpsc::channel(4);
        let handler: ErrorHandler = Arc::new(move |err: Error| {
            let _ = err_tx.try_send(err.to_string());
        });
        let queue = Arc::new(
            SqsBuildQueue::new(api.clone(), QUEUE_URL).with_error_handler(handler),
        );

        let (tx, mut rx) = mpsc::channel(2);
        let task = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.subscribe(tx).await }
        });

        // Only the valid message reaches the sink.
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.options.repository, "remind101/acme-inc-2");
        assert!(err_rx.recv().await.is_some());

        // Both receipt handles are acknowledged, in batch order.
        wait_for(|| !api.deleted.lock().unwrap().is_empty()).await;
        {
            let deleted = api.deleted.lock().unwrap();
            assert_eq!(deleted[0].1.len(), 2);
            assert_eq!(deleted[0].1[0].id, "0");
            assert_eq!(deleted[0].1[0].receipt_handle, "a");
            assert_eq!(deleted[0].1[1].id, "1");
            assert_eq!(deleted[0].1[1].receipt_handle, "b");
        }

        queue.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_sink_ends_the_subscription() {
        let api = Arc::new(MockSqsApi::new(vec![ReceiveStep::Batch(vec![message(
            "a",
            "remind101/acme-inc",
        )])]));
        let queue = SqsBuildQueue::new(api, QUEUE_URL);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        queue.subscribe(tx).await.unwrap();
    }
}
