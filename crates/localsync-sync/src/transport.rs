//! Transport collaborator.
//!
//! A transport only moves message batches; it never inspects them. The
//! receiving side hands each server message to
//! [`ClientSession::handle_message`](crate::ClientSession::handle_message).

use localsync_core::Crdt;
use localsync_proto::ClientMessage;
use tokio::sync::mpsc::UnboundedSender;

/// Identifier of a connected client session.
pub type SessionId = String;

/// Sends message batches towards the other side.
pub trait Transport<M> {
    /// Send a batch of messages.
    ///
    /// # Errors
    ///
    /// Returns error if the batch could not be handed off; the caller keeps
    /// ownership of the data it was built from.
    fn send(&mut self, messages: Vec<M>) -> Result<(), TransportError>;
}

/// A batch of client messages tagged with its sender.
#[derive(Debug, Clone)]
pub struct Envelope<C: Crdt> {
    /// Sending session
    pub from: SessionId,
    /// Messages in send order
    pub messages: Vec<ClientMessage<C>>,
}

/// Client-side transport over a tokio unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport<C: Crdt> {
    session: SessionId,
    tx: UnboundedSender<Envelope<C>>,
}

impl<C: Crdt> ChannelTransport<C> {
    /// Wrap the sending half of an authority inbox.
    #[must_use]
    pub fn new(session: impl Into<SessionId>, tx: UnboundedSender<Envelope<C>>) -> Self {
        Self {
            session: session.into(),
            tx,
        }
    }

    /// Session this transport sends for.
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }
}

impl<C: Crdt> Transport<ClientMessage<C>> for ChannelTransport<C> {
    fn send(&mut self, messages: Vec<ClientMessage<C>>) -> Result<(), TransportError> {
        let count = messages.len();
        self.tx
            .send(Envelope {
                from: self.session.clone(),
                messages,
            })
            .map_err(|_| TransportError::Closed)?;
        tracing::debug!(session = %self.session, count, "Sent client messages");
        Ok(())
    }
}

/// Errors raised by transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The receiving side has gone away
    #[error("transport closed")]
    Closed,

    /// The batch was refused
    #[error("send failed: {0}")]
    Failed(String),
}
