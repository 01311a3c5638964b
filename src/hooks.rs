//! Callbacks invoked by the dispatch loop.
//!
//! [`HookTable`] maps message codes to [`Hook`]s for unsolicited inbound
//! messages. The [`BinaryHandler`] consumes data-class units and the
//! [`ErrorHandler`] decides whether a read error ends the dispatch loop.
//!
//! Error handling is asymmetric: a hook's error is logged and
//! swallowed, while a binary handler's error terminates the dispatch loop.

use std::{future::Future, sync::Arc};

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::{
    error::{HandlerError, Result, SocketError},
    message::Message,
    socket::Socket,
};

/// Handler registered for a message code.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use wirehop::hooks::Hook;
///
/// let hook: Hook = Arc::new(|inbound| {
///     Box::pin(async move {
///         inbound.reply("PONG", &()).await?;
///         Ok(())
///     })
/// });
/// ```
pub type Hook = Arc<dyn Fn(Inbound) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// Result returned by hooks and binary handlers.
pub type HookResult = std::result::Result<(), HandlerError>;

/// Handler invoked for every binary unit.
pub type BinaryHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// Handler deciding whether a read error terminates the dispatch loop.
///
/// Returning `Ok(())` keeps the loop running; returning an error ends it with
/// that error.
pub type ErrorHandler = Arc<dyn Fn(SocketError) -> Result<()> + Send + Sync>;

/// Box an async closure into a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(Inbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    Arc::new(move |inbound| Box::pin(f(inbound)))
}

/// Box an async closure into a [`BinaryHandler`].
pub fn binary_handler<F, Fut>(f: F) -> BinaryHandler
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    Arc::new(move |bytes| Box::pin(f(bytes)))
}

/// An unsolicited message handed to a [`Hook`], together with the socket it
/// arrived on.
pub struct Inbound {
    message: Message,
    socket: Socket,
}

impl Inbound {
    pub(crate) fn new(message: Message, socket: Socket) -> Self { Self { message, socket } }

    /// The received message.
    #[must_use]
    pub fn message(&self) -> &Message { &self.message }

    /// The socket the message arrived on.
    #[must_use]
    pub fn socket(&self) -> &Socket { &self.socket }

    /// Consume the context, returning the message.
    #[must_use]
    pub fn into_message(self) -> Message { self.message }

    /// Send a response correlated with the received message.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError`] if the payload cannot be encoded or the write
    /// fails.
    pub async fn reply<P>(&self, code: &str, payload: &P) -> Result<u64>
    where
        P: Serialize + ?Sized,
    {
        self.socket.reply(&self.message, code, payload).await
    }
}

/// Concurrent map from message code to [`Hook`].
///
/// Lookups from the dispatch loop and registrations from application tasks may
/// run concurrently. The last registration for a code wins.
#[derive(Default)]
pub struct HookTable(DashMap<String, Hook>);

impl HookTable {
    /// Register `hook` for `code`, returning true if a previous hook was
    /// replaced.
    pub fn insert(&self, code: impl Into<String>, hook: Hook) -> bool {
        self.0.insert(code.into(), hook).is_some()
    }

    /// Look up the hook for `code`.
    ///
    /// The returned `Arc` is detached from the map so the caller can await the
    /// hook without holding a shard lock.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<Hook> {
        self.0.get(code).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the hook for `code`, returning true if one was registered.
    pub fn remove(&self, code: &str) -> bool { self.0.remove(code).is_some() }

    /// Number of registered codes.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns true if no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
