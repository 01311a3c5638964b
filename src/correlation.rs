//! Correlation of inbound responses with outstanding requests.
//!
//! A single actor task owns the table of pending requests and their deadlines.
//! Registration, delivery and cancellation arrive through its mailbox and
//! deadlines fire from a [`DelayQueue`] polled by the same task, so each event
//! is applied one at a time and a response racing its own timeout resolves in
//! favour of whichever the actor sees first. The loser observes an
//! absent entry: a late response becomes
//! [`CorrelationError::UnexpectedResponse`] and a late expiry is a no-op.
//!
//! ```
//! use wirehop::{correlation::CorrelationHandle, message::Message};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let correlation = CorrelationHandle::spawn();
//! let response = correlation.register(1, None).await?;
//! correlation.deliver(Message::new("PONG", "").in_reply_to(1)).await?;
//! assert_eq!(response.await?.code, "PONG");
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, hash_map::Entry},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::StreamExt;
use log::warn;
use tokio::sync::{mpsc, oneshot};
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::debug;

use crate::{message::Message, metrics};

const MAILBOX_CAPACITY: usize = 64;

/// Errors reported by the correlation manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// A request with this id is already pending.
    #[error("request id {0} is already pending")]
    DuplicateId(u64),
    /// No pending request matches the response's `in_response_to`.
    #[error("unexpected response: no pending request with id {0}")]
    UnexpectedResponse(u64),
    /// The manager task is no longer running.
    #[error("correlation manager has stopped")]
    ManagerStopped,
}

/// Outcome observed by a waiter whose request ended without a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No response arrived before the request's timeout.
    #[error("request {id} timed out")]
    TimedOut {
        /// Identifier of the request.
        id: u64,
    },
    /// The request was cancelled, typically because the socket closed.
    #[error("request {id} was cancelled")]
    Cancelled {
        /// Identifier of the request.
        id: u64,
    },
}

type Outcome = Result<Message, RequestError>;

enum Command {
    Register {
        id: u64,
        timeout: Option<Duration>,
        target: oneshot::Sender<Outcome>,
        ack: oneshot::Sender<Result<(), CorrelationError>>,
    },
    Unregister {
        id: u64,
    },
    Deliver {
        message: Message,
        ack: oneshot::Sender<Result<(), CorrelationError>>,
    },
    CancelAll {
        ack: oneshot::Sender<usize>,
    },
    PendingCount {
        ack: oneshot::Sender<usize>,
    },
    #[cfg(test)]
    ArmedTimers {
        ack: oneshot::Sender<usize>,
    },
}

struct PendingRequest {
    target: oneshot::Sender<Outcome>,
    timeout: Option<Duration>,
    /// Slot in the actor's deadline queue, if the request can expire.
    deadline: Option<delay_queue::Key>,
}

/// Future resolving to the response for one registered request.
///
/// Resolves exactly once, to the matching response, to
/// [`RequestError::TimedOut`], or to [`RequestError::Cancelled`].
#[derive(Debug)]
#[must_use = "a registered request resolves only when awaited"]
pub struct ResponseFuture {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl ResponseFuture {
    /// Identifier of the request this future waits on.
    pub fn id(&self) -> u64 { self.id }
}

impl Future for ResponseFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Cancelled { id })))
    }
}

/// Cloneable handle to the correlation manager task.
#[derive(Clone, Debug)]
pub struct CorrelationHandle {
    tx: mpsc::Sender<Command>,
}

impl CorrelationHandle {
    /// Spawn a manager task on the current Tokio runtime.
    ///
    /// The task runs until every handle has been dropped, then cancels any
    /// requests still pending.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = CorrelationActor {
            pending: HashMap::new(),
            deadlines: DelayQueue::new(),
            mailbox: rx,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    /// Register `id` as awaiting a response.
    ///
    /// When `timeout` is non-zero the request expires after that long and its
    /// waiter observes [`RequestError::TimedOut`].
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::DuplicateId`] if `id` is already pending or
    /// [`CorrelationError::ManagerStopped`] if the manager has exited.
    pub async fn register(
        &self,
        id: u64,
        timeout: Option<Duration>,
    ) -> Result<ResponseFuture, CorrelationError> {
        let (target, rx) = oneshot::channel();
        let (ack, acked) = oneshot::channel();
        self.command(Command::Register {
            id,
            timeout,
            target,
            ack,
        })
        .await?;
        acked
            .await
            .map_err(|_| CorrelationError::ManagerStopped)??;
        Ok(ResponseFuture { id, rx })
    }

    /// Remove `id` if pending, waking its waiter with
    /// [`RequestError::Cancelled`]. Absent ids are ignored.
    pub async fn unregister(&self, id: u64) {
        let _ = self.command(Command::Unregister { id }).await;
    }

    /// Hand `message` to the request named by its `in_response_to`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::UnexpectedResponse`] if no request with that
    /// id is pending.
    pub async fn deliver(&self, message: Message) -> Result<(), CorrelationError> {
        let (ack, acked) = oneshot::channel();
        self.command(Command::Deliver { message, ack }).await?;
        acked.await.map_err(|_| CorrelationError::ManagerStopped)?
    }

    /// Cancel every pending request, returning how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let (ack, acked) = oneshot::channel();
        if self.command(Command::CancelAll { ack }).await.is_err() {
            return 0;
        }
        acked.await.unwrap_or(0)
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        let (ack, acked) = oneshot::channel();
        if self.command(Command::PendingCount { ack }).await.is_err() {
            return 0;
        }
        acked.await.unwrap_or(0)
    }

    /// Number of deadlines still armed in the actor.
    #[cfg(test)]
    async fn armed_timers(&self) -> usize {
        let (ack, acked) = oneshot::channel();
        if self.command(Command::ArmedTimers { ack }).await.is_err() {
            return 0;
        }
        acked.await.unwrap_or(0)
    }

    async fn command(&self, command: Command) -> Result<(), CorrelationError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CorrelationError::ManagerStopped)
    }
}

/// Owner of the pending table. Only the actor task touches `pending`.
///
/// Every entry in `deadlines` names a request still in `pending`; removing a
/// request removes its deadline.
struct CorrelationActor {
    pending: HashMap<u64, PendingRequest>,
    deadlines: DelayQueue<u64>,
    mailbox: mpsc::Receiver<Command>,
}

impl CorrelationActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(expired) = self.deadlines.next(), if !self.deadlines.is_empty() => {
                    self.expire(expired.into_inner());
                }
            }
        }
        let cancelled = self.cancel_all();
        debug!(cancelled, "correlation manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register {
                id,
                timeout,
                target,
                ack,
            } => {
                let _ = ack.send(self.register(id, timeout, target));
            }
            Command::Unregister { id } => self.unregister(id),
            Command::Deliver { message, ack } => {
                let _ = ack.send(self.deliver(message));
            }
            Command::CancelAll { ack } => {
                let _ = ack.send(self.cancel_all());
            }
            Command::PendingCount { ack } => {
                let _ = ack.send(self.pending.len());
            }
            #[cfg(test)]
            Command::ArmedTimers { ack } => {
                let _ = ack.send(self.deadlines.len());
            }
        }
    }

    fn register(
        &mut self,
        id: u64,
        timeout: Option<Duration>,
        target: oneshot::Sender<Outcome>,
    ) -> Result<(), CorrelationError> {
        let timeout = timeout.filter(|limit| !limit.is_zero());
        match self.pending.entry(id) {
            Entry::Occupied(_) => {
                warn!("duplicate request id registered: id={id}");
                metrics::inc_errors();
                Err(CorrelationError::DuplicateId(id))
            }
            Entry::Vacant(slot) => {
                let deadline = timeout.map(|limit| self.deadlines.insert(id, limit));
                slot.insert(PendingRequest {
                    target,
                    timeout,
                    deadline,
                });
                metrics::set_pending(self.pending.len());
                Ok(())
            }
        }
    }

    /// Remove `id` from the table and disarm its deadline.
    fn take(&mut self, id: u64) -> Option<PendingRequest> {
        let pending = self.pending.remove(&id)?;
        if let Some(key) = &pending.deadline {
            self.deadlines.remove(key);
        }
        metrics::set_pending(self.pending.len());
        Some(pending)
    }

    fn unregister(&mut self, id: u64) {
        if let Some(pending) = self.take(id) {
            let _ = pending.target.send(Err(RequestError::Cancelled { id }));
        }
    }

    /// Time out `id`, whose deadline the queue has already yielded.
    fn expire(&mut self, id: u64) {
        let Some(pending) = self.pending.remove(&id) else {
            return;
        };
        metrics::set_pending(self.pending.len());
        debug!(id, timeout = ?pending.timeout, "request timed out");
        metrics::inc_timeouts();
        let _ = pending.target.send(Err(RequestError::TimedOut { id }));
    }

    fn deliver(&mut self, message: Message) -> Result<(), CorrelationError> {
        let id = message.in_response_to;
        let Some(pending) = self.take(id) else {
            return Err(CorrelationError::UnexpectedResponse(id));
        };
        if pending.target.send(Ok(message)).is_err() {
            debug!(id, "response arrived after its waiter was dropped");
        }
        Ok(())
    }

    fn cancel_all(&mut self) -> usize {
        self.deadlines.clear();
        let cancelled = self.pending.len();
        for (id, pending) in self.pending.drain() {
            let _ = pending.target.send(Err(RequestError::Cancelled { id }));
        }
        metrics::set_pending(0);
        cancelled
    }
}
