//! Inbound dispatch loop.
//!
//! One loop runs per [`Socket`](crate::socket::Socket). It reads a unit at a
//! time, racing the read against the socket's shutdown token, and routes the
//! unit to the correlation manager, a registered hook, or the binary handler.
//! Handlers run inline, so inbound order is preserved.

use std::{io, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    codec::{Unit, UnitReader},
    correlation::CorrelationHandle,
    envelope::EnvelopeCodec,
    error::{Result, SocketError},
    hooks::{BinaryHandler, ErrorHandler, HookTable, Inbound},
    message::Message,
    metrics::{self, Direction},
    socket::WeakSocket,
};

/// Lifecycle of the dispatch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    /// Units are being read and routed.
    Running,
    /// The loop has decided to exit and is winding down.
    Stopping,
    /// The loop has returned.
    Stopped,
}

/// Something the loop must react to.
enum Event {
    Shutdown,
    Unit(Unit),
    ReadError(io::Error),
    Eof,
}

/// Callbacks the loop routes units to.
#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub(crate) binary: Option<BinaryHandler>,
    pub(crate) error: Option<ErrorHandler>,
}

pub(crate) struct DispatchLoop {
    reader: UnitReader,
    codec: Arc<dyn EnvelopeCodec>,
    correlation: CorrelationHandle,
    hooks: Arc<HookTable>,
    handlers: Handlers,
    shutdown: CancellationToken,
    socket: WeakSocket,
    state: RunState,
}

impl DispatchLoop {
    pub(crate) fn new(
        reader: UnitReader,
        codec: Arc<dyn EnvelopeCodec>,
        correlation: CorrelationHandle,
        hooks: Arc<HookTable>,
        handlers: Handlers,
        shutdown: CancellationToken,
        socket: WeakSocket,
    ) -> Self {
        Self {
            reader,
            codec,
            correlation,
            hooks,
            handlers,
            shutdown,
            socket,
            state: RunState::Running,
        }
    }

    /// Run until shutdown, end of stream, or a terminal error.
    ///
    /// End of stream and shutdown both end the loop with `Ok(())`.
    pub(crate) async fn run(mut self) -> Result<()> {
        let mut outcome = Ok(());
        while self.state == RunState::Running {
            let event = self.next_event().await;
            if let Err(e) = self.handle_event(event).await {
                outcome = Err(e);
                self.state = RunState::Stopping;
            }
        }
        self.state = RunState::Stopped;
        debug!(ok = outcome.is_ok(), "dispatch loop stopped");
        outcome
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => Event::Shutdown,
            next = self.reader.next() => match next {
                Some(Ok(unit)) => Event::Unit(unit),
                Some(Err(e)) => Event::ReadError(e),
                None => Event::Eof,
            },
        }
    }

    async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Shutdown => {
                debug!("dispatch loop received shutdown");
                self.state = RunState::Stopping;
            }
            Event::Eof => {
                debug!("peer closed the transport");
                self.state = RunState::Stopping;
            }
            Event::ReadError(e) => self.handle_read_error(e)?,
            Event::Unit(unit) => {
                metrics::inc_units(Direction::Inbound);
                match unit {
                    Unit::Text(text) => self.handle_text(&text).await,
                    Unit::Binary(bytes) => self.handle_binary(bytes).await?,
                }
            }
        }
        Ok(())
    }

    fn handle_read_error(&self, error: io::Error) -> Result<()> {
        metrics::inc_errors();
        let error = SocketError::Transport(error);
        match &self.handlers.error {
            Some(handler) => handler(error),
            None => Err(error),
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::inc_errors();
                warn!(error = %e, "discarding malformed envelope");
                return;
            }
        };
        if message.is_response() {
            if let Err(e) = self.correlation.deliver(message).await {
                metrics::inc_errors();
                warn!(error = %e, "failed to deliver response");
            }
            return;
        }
        self.run_hook(message).await;
    }

    async fn run_hook(&mut self, message: Message) {
        let Some(hook) = self.hooks.get(&message.code) else {
            metrics::inc_errors();
            warn!(
                code = %message.code,
                id = message.id,
                "unexpected message: no hook registered"
            );
            return;
        };
        let Some(socket) = self.socket.upgrade() else {
            debug!("socket dropped; stopping dispatch");
            self.state = RunState::Stopping;
            return;
        };
        let code = message.code.clone();
        let id = message.id;
        if let Err(e) = hook(Inbound::new(message, socket)).await {
            metrics::inc_errors();
            warn!(%code, id, error = %e, "hook failed");
        }
    }

    async fn handle_binary(&mut self, bytes: Bytes) -> Result<()> {
        let Some(handler) = &self.handlers.binary else {
            debug!(len = bytes.len(), "dropping binary unit: no handler configured");
            return Ok(());
        };
        handler(bytes).await.map_err(|e| {
            metrics::inc_errors();
            SocketError::BinaryHandler(e)
        })
    }
}
