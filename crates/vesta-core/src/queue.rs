//! Single-concurrency FIFO request queue.
//!
//! A `RequestQueue` owns one dispatcher task that pulls submitted operations
//! off a channel and runs them one at a time, in submission order. Each
//! submitter gets back a [`Submission`] future that resolves to the result of
//! its own operation only.
//!
//! ```text
//! submit(op1) ──┐
//! submit(op2) ──┼──► mpsc channel ──► dispatcher loop ──► op1 → op2 → op3
//! submit(op3) ──┘                          │
//!                                          └──► oneshot reply per item
//! ```
//!
//! Failures are isolated: an operation that returns `Err`, or panics while
//! building or polling its future, is reported to its own submitter and the
//! loop moves on to the next item.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

type Operation<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// A queued operation with its reply channel. Never leaves this module.
struct QueueItem<T> {
    operation: Operation<T>,
    reply: oneshot::Sender<Result<T>>,
}

/// Serializes asynchronous operations so at most one is in flight.
pub struct RequestQueue<T> {
    tx: mpsc::UnboundedSender<QueueItem<T>>,
}

impl<T: Send + 'static> RequestQueue<T> {
    /// Create a queue and spawn its dispatcher on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx));
        Self { tx }
    }

    /// Submit an operation.
    ///
    /// The operation is enqueued before this call returns, so the order of
    /// `submit` calls is the order of execution. If the queue is idle the
    /// dispatcher picks it up right away. Dropping the returned
    /// [`Submission`] does not cancel the operation.
    pub fn submit<F, Fut>(&self, operation: F) -> Submission<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let item = QueueItem {
            operation: Box::new(move || Box::pin(operation()) as BoxFuture<'static, Result<T>>),
            reply,
        };

        if let Err(mpsc::error::SendError(item)) = self.tx.send(item) {
            let _ = item.reply.send(Err(Error::QueueClosed));
        }

        Submission { rx }
    }
}

impl<T: Send + 'static> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher loop: one operation at a time until every sender is dropped.
async fn dispatch<T: Send + 'static>(mut rx: mpsc::UnboundedReceiver<QueueItem<T>>) {
    while let Some(QueueItem { operation, reply }) = rx.recv().await {
        // Run on its own task so a panic in the operation is contained.
        let outcome = match tokio::spawn(async move { operation().await }).await {
            Ok(result) => result,
            Err(join_error) => {
                tracing::warn!("Queued operation panicked: {}", join_error);
                Err(Error::Execution(format!(
                    "queued operation panicked: {}",
                    join_error
                )))
            }
        };

        if reply.send(outcome).is_err() {
            tracing::debug!("Queue submitter went away before completion");
        }
    }

    tracing::debug!("Request queue dispatcher stopped");
}

/// Eventual result of a submitted operation.
pub struct Submission<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Submission<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::QueueClosed)))
    }
}
