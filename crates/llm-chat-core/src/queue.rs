//! FIFO request queue with one request in flight.
//!
//! ```text
//!   QueueHandle (Clone)        mpsc        worker task
//!   ┌──────────────────┐   ──────────▶   ┌─────────────────────┐
//!   │ .submit()        │                 │ RequestBridge       │
//!   │ .submit_with()   │   ◀──────────   │ one send at a time  │
//!   │ .flush()         │ oneshot/callback│ delivers in order   │
//!   └──────────────────┘                 └─────────────────────┘
//! ```
//!
//! Jobs are ordered by the moment they are submitted. The worker hands each
//! result to its reply before starting the next job, so replies are delivered
//! in send order. The worker exits once every handle is dropped and the queue
//! has drained.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::bridge::RequestBridge;
use crate::config::ConnectionConfig;
use crate::error::{ChatError, Result};

type Callback = Box<dyn FnOnce(Result<String>) + Send>;

enum Reply {
    Channel(oneshot::Sender<Result<String>>),
    Callback(Callback),
}

impl Reply {
    fn deliver(self, result: Result<String>) {
        match self {
            // The submitter may have stopped waiting; the reply is just dropped.
            Reply::Channel(tx) => {
                let _ = tx.send(result);
            }
            Reply::Callback(callback) => callback(result),
        }
    }
}

enum Job {
    Send {
        text: String,
        /// A config that failed to resolve still takes its place in line.
        config: Result<ConnectionConfig>,
        reply: Reply,
    },
    Barrier(oneshot::Sender<()>),
}

/// Send handle to a running request queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Job>,
}

/// A queued job's eventual reply.
pub struct PendingReply {
    rx: oneshot::Receiver<Result<String>>,
}

impl PendingReply {
    pub async fn wait(self) -> Result<String> {
        self.rx.await.map_err(|_| ChatError::QueueClosed)?
    }
}

pub struct RequestQueue;

impl RequestQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(bridge: RequestBridge) -> QueueHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(bridge, rx));
        QueueHandle { tx }
    }
}

async fn run_worker(bridge: RequestBridge, mut rx: mpsc::UnboundedReceiver<Job>) {
    debug!("request queue started");
    while let Some(job) = rx.recv().await {
        match job {
            Job::Send { text, config, reply } => {
                let result = match config {
                    Ok(config) => bridge.send_message(&text, &config).await,
                    Err(e) => Err(e),
                };
                reply.deliver(result);
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("request queue stopped");
}

impl QueueHandle {
    /// Enqueue a message. Position in the queue is fixed by this call.
    pub fn submit(&self, text: &str, config: ConnectionConfig) -> Result<PendingReply> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(text, Ok(config), Reply::Channel(reply))?;
        Ok(PendingReply { rx })
    }

    /// Enqueue a message whose result is handed to `on_reply` by the worker,
    /// before the next job starts.
    pub fn submit_with<F>(
        &self,
        text: &str,
        config: Result<ConnectionConfig>,
        on_reply: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.enqueue(text, config, Reply::Callback(Box::new(on_reply)))
    }

    pub async fn send(&self, text: &str, config: ConnectionConfig) -> Result<String> {
        self.submit(text, config)?.wait().await
    }

    /// Wait until every job submitted before this call has been delivered.
    pub async fn flush(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Job::Barrier(done))
            .map_err(|_| ChatError::QueueClosed)?;
        rx.await.map_err(|_| ChatError::QueueClosed)
    }

    fn enqueue(&self, text: &str, config: Result<ConnectionConfig>, reply: Reply) -> Result<()> {
        self.tx
            .send(Job::Send {
                text: text.to_string(),
                config,
                reply,
            })
            .map_err(|_| ChatError::QueueClosed)
    }
}
