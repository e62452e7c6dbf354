//! In-process runtime routing messages between sessions and the authority.
//!
//! A delta batch the authority rejects is answered with a full snapshot of
//! its collection, sent to the sender only. The sender's replica takes in
//! the authority state; the rejected deltas stay local to it.

use crate::authority::Authority;
use crate::store::Store;
use crate::transport::{ChannelTransport, Envelope, SessionId};
use localsync_core::Crdt;
use localsync_proto::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// Both ends a client needs to talk to an [`AuthorityRuntime`].
#[derive(Debug)]
pub struct ClientLink<C: Crdt> {
    /// Sends client messages to the authority
    pub transport: ChannelTransport<C>,
    /// Receives server messages for this session
    pub inbox: UnboundedReceiver<ServerMessage<C>>,
}

/// Owns an [`Authority`] and drives it from a tokio task.
pub struct AuthorityRuntime<C: Crdt, S: Store<C>> {
    authority: Authority<C, S>,
    inbox_tx: UnboundedSender<Envelope<C>>,
    inbox_rx: UnboundedReceiver<Envelope<C>>,
    outboxes: HashMap<SessionId, UnboundedSender<ServerMessage<C>>>,
}

impl<C: Crdt, S: Store<C>> AuthorityRuntime<C, S> {
    /// Wrap an authority.
    #[must_use]
    pub fn new(authority: Authority<C, S>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            authority,
            inbox_tx,
            inbox_rx,
            outboxes: HashMap::new(),
        }
    }

    /// Connect a session and return its link.
    pub fn connect(&mut self, session: impl Into<SessionId>) -> ClientLink<C> {
        let session = session.into();
        let (tx, inbox) = mpsc::unbounded_channel();
        self.authority.connect(session.clone());
        self.outboxes.insert(session.clone(), tx);
        ClientLink {
            transport: ChannelTransport::new(session, self.inbox_tx.clone()),
            inbox,
        }
    }

    /// Route messages until `shutdown` fires, then hand the authority back.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Authority<C, S> {
        tracing::info!(sessions = self.outboxes.len(), "Starting authority runtime");

        loop {
            tokio::select! {
                Some(envelope) = self.inbox_rx.recv() => {
                    self.dispatch(envelope);
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        self.authority
    }

    fn dispatch(&mut self, envelope: Envelope<C>) {
        let Envelope { from, messages } = envelope;
        tracing::debug!(session = %from, count = messages.len(), "Received client messages");

        for message in messages {
            let collection = message.collection().to_string();
            let resync = matches!(message, ClientMessage::Delta { .. });
            let outgoing = match self.authority.handle_message(&from, message) {
                Ok(outgoing) => outgoing,
                Err(err) if resync => {
                    tracing::warn!(session = %from, collection = %collection, error = %err, "Rejected client deltas, sending snapshot");
                    match self
                        .authority
                        .handle_message(&from, ClientMessage::RequestFull { collection })
                    {
                        Ok(outgoing) => outgoing,
                        Err(err) => {
                            tracing::warn!(session = %from, error = %err, "Failed to build snapshot");
                            continue;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(session = %from, collection = %collection, error = %err, "Rejected client message");
                    continue;
                }
            };

            for out in outgoing {
                let Some(tx) = self.outboxes.get(&out.to) else {
                    continue;
                };
                if tx.send(out.message).is_err() {
                    tracing::warn!(session = %out.to, "Session inbox closed, disconnecting");
                    self.outboxes.remove(&out.to);
                    self.authority.disconnect(&out.to);
                }
            }
        }
    }
}
