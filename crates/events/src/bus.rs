//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes lifecycle notifications to any number of consumers
//! (the logging task, status pollers, tests). It is:
//!
//! - **Transport-agnostic**: the in-memory implementation uses channels; nothing in the
//!   trait assumes a process boundary
//! - **Broadcast**: every subscription receives every message published after it was created
//! - **Best-effort**: no persistence; the job store stays the source of truth
//!
//! `publish` is synchronous so the scheduler can emit while it holds its state lock,
//! which keeps per-job event order identical to the order of state transitions.
//! Consumers receive asynchronously.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError as ChannelTryRecvError;

/// Error returned by [`Subscription::try_recv`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("no message available")]
    Empty,
    #[error("bus closed")]
    Disconnected,
}

/// Error returned by [`Subscription::recv_timeout`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("bus closed")]
    Disconnected,
}

/// A subscription to an event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut subscription = bus.subscribe();
///
/// while let Some(event) = subscription.recv().await {
///     handle(event);
/// }
/// ```
///
/// A subscription is meant for a single consumer task. Messages arrive in the order the
/// bus published them.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv().map_err(|e| match e {
            ChannelTryRecvError::Empty => TryRecvError::Empty,
            ChannelTryRecvError::Disconnected => TryRecvError::Disconnected,
        })
    }

    /// Wait for up to `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RecvTimeoutError::Disconnected),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// SchedulerCore (state transition) → EventBus (publish) → Consumers
///                                                          ├─ event logger task
///                                                          ├─ status pollers
///                                                          └─ tests
/// ```
///
/// The trait requires `Send + Sync`; multiple threads may publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
