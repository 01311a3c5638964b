//! Connection facade.
//!
//! A [`Socket`] is a cheap, cloneable handle to one live connection. It owns
//! the exclusive writer, allocates message ids, registers correlated requests
//! and controls the dispatch task reading from the peer.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::SinkExt;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use crate::{
    codec::{Unit, UnitReader, UnitWriter},
    correlation::{CorrelationHandle, ResponseFuture},
    dispatch::{DispatchLoop, Handlers},
    envelope::EnvelopeCodec,
    error::{Result, SocketError},
    hooks::{Hook, HookTable},
    message::Message,
    metrics::{self, Direction},
};

tokio::task_local! {
    static IN_DISPATCH: ();
}

/// How long `close` waits for buffered outbound bytes to drain.
const CLOSE_FLUSH_GRACE: Duration = Duration::from_millis(250);

/// Details about the peer a socket talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    peer_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// Create connection info for a peer.
    #[must_use]
    pub const fn new(peer_addr: Option<SocketAddr>) -> Self { Self { peer_addr } }

    /// Remote address, if the transport has one.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }
}

/// Everything needed to start a socket over an established transport.
pub(crate) struct SocketParts {
    pub(crate) writer: UnitWriter,
    pub(crate) reader: UnitReader,
    pub(crate) codec: Arc<dyn EnvelopeCodec>,
    pub(crate) hooks: HookTable,
    pub(crate) handlers: Handlers,
    pub(crate) info: ConnectionInfo,
    pub(crate) span: Span,
}

enum DispatchTask {
    NotStarted,
    Running(JoinHandle<Result<()>>),
    Finished(Option<SocketError>),
}

struct Shared {
    /// Taken by `close`; `None` afterwards.
    writer: Mutex<Option<UnitWriter>>,
    codec: Arc<dyn EnvelopeCodec>,
    correlation: CorrelationHandle,
    hooks: Arc<HookTable>,
    next_id: AtomicU64,
    live: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    dispatch: Mutex<DispatchTask>,
    info: ConnectionInfo,
    span: Span,
}

impl Shared {
    /// Mark the socket not live, returning true on the first transition.
    fn mark_dead(&self) -> bool {
        let was_live = self.live.swap(false, Ordering::AcqRel);
        if was_live {
            metrics::dec_sockets();
        }
        was_live
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.mark_dead();
        self.shutdown.cancel();
    }
}

/// Handle to a live connection.
///
/// Clones share the same connection. The dispatch loop stops when
/// [`close`](Self::close) is called, when the peer closes the transport, on a
/// terminal error, or once every handle has been dropped.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<Shared>,
}

/// Non-owning reference held by the dispatch loop.
#[derive(Clone)]
pub(crate) struct WeakSocket(Weak<Shared>);

impl WeakSocket {
    #[cfg(test)]
    pub(crate) fn dangling() -> Self { Self(Weak::new()) }

    pub(crate) fn upgrade(&self) -> Option<Socket> {
        self.0.upgrade().map(|shared| Socket { shared })
    }
}

impl Socket {
    /// Mark the socket live and spawn its dispatch loop.
    pub(crate) async fn start(parts: SocketParts) -> Self {
        let SocketParts {
            writer,
            reader,
            codec,
            hooks,
            handlers,
            info,
            span,
        } = parts;
        let shared = Arc::new(Shared {
            writer: Mutex::new(Some(writer)),
            codec: Arc::clone(&codec),
            correlation: CorrelationHandle::spawn(),
            hooks: Arc::new(hooks),
            next_id: AtomicU64::new(1),
            live: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            dispatch: Mutex::new(DispatchTask::NotStarted),
            info,
            span,
        });
        metrics::inc_sockets();
        let socket = Self { shared };

        let dispatch = DispatchLoop::new(
            reader,
            codec,
            socket.shared.correlation.clone(),
            Arc::clone(&socket.shared.hooks),
            handlers,
            socket.shared.shutdown.clone(),
            socket.downgrade(),
        );
        let weak = socket.downgrade();
        let task = async move {
            let outcome = IN_DISPATCH.scope((), dispatch.run()).await;
            if let Err(e) = &outcome {
                warn!(error = %e, "dispatch loop terminated");
            }
            if let Some(socket) = weak.upgrade() {
                socket.shared.mark_dead();
                let cancelled = socket.shared.correlation.cancel_all().await;
                if cancelled > 0 {
                    debug!(cancelled, "cancelled pending requests after dispatch exit");
                }
            }
            outcome
        };
        let handle = tokio::spawn(task.instrument(socket.shared.span.clone()));
        *socket.shared.dispatch.lock().await = DispatchTask::Running(handle);
        debug!(parent: &socket.shared.span, peer = ?socket.peer_addr(), "socket started");
        socket
    }

    pub(crate) fn downgrade(&self) -> WeakSocket { WeakSocket(Arc::downgrade(&self.shared)) }

    /// Returns true until the socket is closed or its dispatch loop ends.
    #[must_use]
    pub fn is_live(&self) -> bool { self.shared.live.load(Ordering::Acquire) }

    /// Remote address, if known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.shared.info.peer_addr() }

    /// Details about the peer.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo { &self.shared.info }

    /// Number of requests awaiting a response.
    pub async fn pending_requests(&self) -> usize { self.shared.correlation.pending_count().await }

    /// Register `hook` for messages with `code`.
    ///
    /// Replaces any previous hook for the code. Takes effect for messages
    /// dispatched after the call returns.
    pub fn add_hook(&self, code: impl Into<String>, hook: Hook) {
        let code = code.into();
        if self.shared.hooks.insert(code.clone(), hook) {
            debug!(parent: &self.shared.span, %code, "hook replaced");
        }
    }

    /// Remove the hook for `code`, returning true if one was registered.
    pub fn remove_hook(&self, code: &str) -> bool { self.shared.hooks.remove(code) }

    /// Send a message that expects no response, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] if the socket is not live, a
    /// [`SocketError::Protocol`] if encoding fails, or the write error.
    pub async fn send<P>(&self, code: &str, payload: &P) -> Result<u64>
    where
        P: Serialize + ?Sized,
    {
        self.send_message(Message::with_payload(code, payload)?).await
    }

    /// Send a prepared message, assigning it a fresh id.
    ///
    /// The message's `in_response_to` is sent unchanged.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub async fn send_message(&self, mut message: Message) -> Result<u64> {
        self.ensure_live()?;
        message.id = self.next_id();
        let text = self.shared.codec.encode(&message)?;
        self.write_unit(Unit::Text(text)).await?;
        Ok(message.id)
    }

    /// Send a response correlated with `to`.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub async fn reply<P>(&self, to: &Message, code: &str, payload: &P) -> Result<u64>
    where
        P: Serialize + ?Sized,
    {
        let message = Message::with_payload(code, payload)?.in_reply_to(to.id);
        self.send_message(message).await
    }

    /// Send a data-class unit.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] if the socket is not live, or the write
    /// error.
    pub async fn send_binary(&self, bytes: impl Into<bytes::Bytes>) -> Result<()> {
        self.ensure_live()?;
        self.write_unit(Unit::Binary(bytes.into())).await
    }

    /// Send a request and return a future resolving to its response.
    ///
    /// The request is registered before it is written, so a response cannot
    /// overtake its registration. A `timeout` of `None` or zero waits until
    /// the response arrives or the socket closes.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] if the socket is not live, a
    /// [`SocketError::Correlation`] if registration fails, or the write error.
    /// A failed write cancels the registration.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    ///
    /// use wirehop::socket::Socket;
    ///
    /// # async fn demo(socket: Socket) -> Result<(), Box<dyn std::error::Error>> {
    /// let pending = socket
    ///     .send_request("PING", &(), Some(Duration::from_secs(5)))
    ///     .await?;
    /// let response = pending.await?;
    /// assert_eq!(response.code, "PONG");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send_request<P>(
        &self,
        code: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<ResponseFuture>
    where
        P: Serialize + ?Sized,
    {
        self.ensure_live()?;
        let mut message = Message::with_payload(code, payload)?;
        let id = self.next_id();
        message.id = id;
        let text = self.shared.codec.encode(&message)?;

        let correlation = &self.shared.correlation;
        let response = correlation.register(id, timeout).await?;
        if !self.is_live() {
            correlation.unregister(id).await;
            return Err(SocketError::Closed);
        }
        if let Err(e) = self.write_unit(Unit::Text(text)).await {
            correlation.unregister(id).await;
            return Err(e);
        }
        Ok(response)
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// As for [`send_request`](Self::send_request), plus
    /// [`SocketError::Request`] if the request times out or is cancelled.
    pub async fn request<P>(
        &self,
        code: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<Message>
    where
        P: Serialize + ?Sized,
    {
        let response = self.send_request(code, payload, timeout).await?;
        Ok(response.await?)
    }

    /// Close the connection.
    ///
    /// Marks the socket not live, stops the dispatch loop, cancels every
    /// pending request and closes the writer. When called from outside the
    /// dispatch loop it also waits for the loop to exit. Subsequent calls
    /// return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// Returns the error raised while closing the writer.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.mark_dead();
        self.shared.shutdown.cancel();
        let cancelled = self.shared.correlation.cancel_all().await;
        debug!(parent: &self.shared.span, cancelled, "closing socket");
        // Writers blocked on back-pressure see the cancelled token and release
        // the lock.
        let writer = self.shared.writer.lock().await.take();
        let closed = match writer {
            Some(mut writer) => match tokio::time::timeout(CLOSE_FLUSH_GRACE, writer.close()).await {
                Ok(closed) => closed,
                Err(_) => {
                    debug!(
                        parent: &self.shared.span,
                        "peer not draining; dropping unflushed units"
                    );
                    Ok(())
                }
            },
            None => Ok(()),
        };
        if IN_DISPATCH.try_with(|_| ()).is_err() {
            drop(self.join_dispatch().await);
        }
        closed.map_err(SocketError::from)
    }

    /// Wait for the dispatch loop to exit.
    ///
    /// The first caller receives the loop's terminal error, if any; later
    /// callers receive `Ok(())`. Must not be awaited from inside a hook.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the dispatch loop.
    pub async fn wait(&self) -> Result<()> {
        let mut slot = self.join_dispatch().await;
        match &mut *slot {
            DispatchTask::Finished(error) => error.take().map_or(Ok(()), Err),
            DispatchTask::NotStarted | DispatchTask::Running(_) => Ok(()),
        }
    }

    async fn join_dispatch(&self) -> tokio::sync::MutexGuard<'_, DispatchTask> {
        let mut slot = self.shared.dispatch.lock().await;
        if let DispatchTask::Running(handle) = &mut *slot {
            let error = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(SocketError::Dispatch(e)),
            };
            *slot = DispatchTask::Finished(error);
        }
        slot
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(SocketError::Closed)
        }
    }

    /// Allocate the next message id, skipping zero on wrap-around.
    fn next_id(&self) -> u64 {
        loop {
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Write one unit, giving up with [`SocketError::Closed`] once the socket
    /// shuts down.
    async fn write_unit(&self, unit: Unit) -> Result<()> {
        let shutdown = &self.shared.shutdown;
        let mut slot = tokio::select! {
            biased;

            () = shutdown.cancelled() => return Err(SocketError::Closed),
            slot = self.shared.writer.lock() => slot,
        };
        let Some(writer) = slot.as_mut() else {
            return Err(SocketError::Closed);
        };
        tokio::select! {
            biased;

            () = shutdown.cancelled() => return Err(SocketError::Closed),
            sent = writer.send(unit) => sent?,
        }
        metrics::inc_units(Direction::Outbound);
        Ok(())
    }

    #[cfg(test)]
    fn set_next_id(&self, id: u64) { self.shared.next_id.store(id, Ordering::Relaxed); }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("peer_addr", &self.peer_addr())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
