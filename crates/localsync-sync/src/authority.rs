//! The authority replica held by the server.
//!
//! The authority applies each incoming batch to its [`Store`], forwards the
//! batch to every other connected session and answers full-state requests.

use crate::error::{Result, SyncError};
use crate::store::{Store, StoreLoader};
use crate::transport::SessionId;
use localsync_core::{Crdt, Hlc};
use localsync_proto::{max_delta_stamp, ClientMessage, NodeDelta, ServerMessage};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

/// A server message addressed to one session.
#[derive(Debug, Clone)]
pub struct Outgoing<C: Crdt> {
    /// Receiving session
    pub to: SessionId,
    /// Message to deliver
    pub message: ServerMessage<C>,
}

/// Server-held replica of one user's collections.
#[derive(Debug)]
pub struct Authority<C: Crdt, S: Store<C>> {
    store: S,
    clock: Hlc,
    sessions: BTreeSet<SessionId>,
    _crdt: PhantomData<fn() -> C>,
}

impl<C: Crdt, S: Store<C>> Authority<C, S> {
    /// Create an authority over `store`.
    #[must_use]
    pub fn new(store: S, clock: Hlc) -> Self {
        Self {
            store,
            clock,
            sessions: BTreeSet::new(),
            _crdt: PhantomData,
        }
    }

    /// Create an authority over the store `loader` keeps for `user_path`.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened.
    pub fn open<L>(loader: &mut L, user_path: &str, clock: Hlc) -> Result<Self>
    where
        L: StoreLoader<C, Store = S>,
    {
        let store = loader.load(user_path)?;
        tracing::info!(user_path, site = clock.site(), "Opened authority");
        Ok(Self::new(store, clock))
    }

    /// Register a session. Returns `false` if it was already connected.
    pub fn connect(&mut self, session: impl Into<SessionId>) -> bool {
        let session = session.into();
        tracing::info!(session = %session, "Session connected");
        self.sessions.insert(session)
    }

    /// Forget a session. Returns `false` if it was not connected.
    pub fn disconnect(&mut self, session: &str) -> bool {
        tracing::info!(session, "Session disconnected");
        self.sessions.remove(session)
    }

    /// Connected sessions.
    pub fn sessions(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(String::as_str)
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The authority clock.
    #[must_use]
    pub fn clock(&self) -> &Hlc {
        &self.clock
    }

    /// Handle one message from session `from`.
    ///
    /// A delta batch is applied all-or-nothing; on success it is forwarded
    /// to every other connected session.
    ///
    /// # Errors
    ///
    /// Returns error if a document rejects a delta, a stamp is malformed or
    /// the store fails.
    pub fn handle_message(&mut self, from: &str, message: ClientMessage<C>) -> Result<Vec<Outgoing<C>>> {
        match message {
            ClientMessage::Delta { collection, deltas } => {
                if deltas.is_empty() {
                    return Ok(Vec::new());
                }
                self.receive(&collection, &deltas)?;
                tracing::debug!(
                    session = from,
                    collection = %collection,
                    count = deltas.len(),
                    "Applied client deltas"
                );
                Ok(self
                    .sessions
                    .iter()
                    .filter(|session| session.as_str() != from)
                    .map(|session| Outgoing {
                        to: session.clone(),
                        message: ServerMessage::Sync {
                            collection: collection.clone(),
                            deltas: deltas.clone(),
                        },
                    })
                    .collect())
            }
            ClientMessage::RequestFull { collection } => {
                let data = self.store.all(&collection)?;
                tracing::debug!(session = from, collection = %collection, documents = data.len(), "Serving full snapshot");
                Ok(vec![Outgoing {
                    to: from.to_string(),
                    message: ServerMessage::Full { collection, data },
                }])
            }
        }
    }

    fn receive(&mut self, collection: &str, deltas: &[NodeDelta<C::Delta>]) -> Result<()> {
        let mut staged: BTreeMap<&str, C> = BTreeMap::new();
        for NodeDelta { node, delta } in deltas {
            let doc = match staged.entry(node.as_str()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let current = self.store.get(collection, node)?;
                    entry.insert(current.unwrap_or_else(C::create_empty))
                }
            };
            doc.apply_delta(delta)
                .map_err(|err| SyncError::document(collection, node, err))?;
        }

        let mut clock = self.clock.clone();
        if let Some(latest) = max_delta_stamp::<C>(deltas) {
            clock.observe(&latest)?;
        }
        for (id, doc) in staged {
            self.store.put(collection, id, doc)?;
        }
        self.clock = clock;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryLoader, MemoryStore};
    use localsync_core::{DeltaOps, NestedValue, Stamp, Timestamp, ValueDelta};
    use serde_json::json;

    type Doc = NestedValue;

    fn stamp(physical_ms: u64, site: &str) -> Stamp {
        Timestamp {
            physical_ms,
            logical: 0,
            site: site.to_string(),
        }
        .pack()
    }

    fn authority() -> Authority<Doc, MemoryStore<Doc>> {
        let mut authority = Authority::new(MemoryStore::new(), Hlc::init("server", 0));
        authority.connect("alice");
        authority.connect("bob");
        authority.connect("carol");
        authority
    }

    fn save(id: &str, raw: serde_json::Value, at: u64) -> NodeDelta<ValueDelta> {
        NodeDelta::new(id, ValueDelta::set(Vec::new(), Doc::create_deep_map(&raw, &stamp(at, "alice"))))
    }

    fn deltas(deltas: Vec<NodeDelta<ValueDelta>>) -> ClientMessage<Doc> {
        ClientMessage::Delta {
            collection: "recipes".to_string(),
            deltas,
        }
    }

    #[test]
    fn deltas_fan_out_to_other_sessions() {
        let mut authority = authority();
        let out = authority
            .handle_message("alice", deltas(vec![save("r1", json!({ "title": "Soup" }), 5)]))
            .unwrap();

        let targets: Vec<&str> = out.iter().map(|o| o.to.as_str()).collect();
        assert_eq!(targets, vec!["bob", "carol"]);
        assert!(matches!(&out[0].message, ServerMessage::Sync { deltas, .. } if deltas.len() == 1));

        let stored = authority.store().get("recipes", "r1").unwrap().unwrap();
        assert_eq!(stored.value(), Some(json!({ "title": "Soup" })));
        assert!(authority.clock().current().pack() > stamp(5, "alice"));
    }

    #[test]
    fn request_full_answers_sender_only() {
        let mut authority = authority();
        authority
            .handle_message(
                "alice",
                deltas(vec![
                    save("r1", json!({ "title": "Soup" }), 1),
                    save("r2", json!({ "title": "Stew" }), 2),
                ]),
            )
            .unwrap();

        let out = authority
            .handle_message("bob", ClientMessage::RequestFull { collection: "recipes".into() })
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, "bob");
        let ServerMessage::Full { data, .. } = &out[0].message else {
            panic!("expected full snapshot");
        };
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["r1", "r2"]);
    }

    #[test]
    fn rejected_batch_leaves_store_untouched() {
        let mut source = Doc::create_deep_map(&json!({}), &stamp(1, "alice"));
        let body = localsync_core::TextTree::from_text("abc", &stamp(1, "alice")).unwrap();
        let create = ValueDelta::set(vec!["body".into()], Doc::create_embedded(body, &stamp(1, "alice")));
        source.apply_delta(&create).unwrap();
        let insert = source
            .insert_text(&["body".into()], 3, "def", &stamp(2, "alice"))
            .unwrap();
        let delete = source
            .delete_text(&["body".into()], 3, 3, &stamp(3, "alice"))
            .unwrap();

        let mut authority = authority();
        authority
            .handle_message("alice", deltas(vec![NodeDelta::new("r1", create)]))
            .unwrap();
        let before = authority.store().get("recipes", "r1").unwrap();

        // the deletion refers to characters the authority never saw
        let result = authority.handle_message(
            "alice",
            deltas(vec![
                save("r2", json!({ "title": "Stew" }), 4),
                NodeDelta::new("r1", delete),
            ]),
        );
        assert!(matches!(result, Err(SyncError::Document { .. })));
        assert_eq!(authority.store().get("recipes", "r1").unwrap(), before);
        assert!(authority.store().get("recipes", "r2").unwrap().is_none());

        authority
            .handle_message("alice", deltas(vec![NodeDelta::new("r1", insert)]))
            .unwrap();
        let stored = authority.store().get("recipes", "r1").unwrap().unwrap();
        assert_eq!(stored.value(), Some(json!({ "body": "abcdef" })));
    }

    #[test]
    fn open_uses_loader_store() {
        let mut loader: MemoryLoader<Doc> = MemoryLoader::new();
        let mut authority = Authority::open(&mut loader, "users/alice", Hlc::init("server", 0)).unwrap();
        authority.connect("alice");
        authority
            .handle_message("alice", deltas(vec![save("r1", json!({ "title": "Soup" }), 1)]))
            .unwrap();

        let reopened = Authority::open(&mut loader, "users/alice", Hlc::init("server", 0)).unwrap();
        assert!(reopened.store().get("recipes", "r1").unwrap().is_some());
    }

    #[test]
    fn sessions_connect_and_disconnect() {
        let mut authority = authority();
        assert!(!authority.connect("alice"));
        assert!(authority.disconnect("bob"));
        assert!(!authority.disconnect("bob"));
        assert_eq!(authority.sessions().collect::<Vec<_>>(), vec!["alice", "carol"]);

        let out = authority
            .handle_message("alice", deltas(vec![save("r1", json!({ "title": "Soup" }), 1)]))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, "carol");
    }
}
