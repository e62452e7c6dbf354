//! Client session: local replicas of every collection plus the outgoing
//! delta queue.
//!
//! Local edits are applied synchronously and queued; [`ClientSession::flush`]
//! hands the queue to a [`Transport`]. Messages from the authority are fed to
//! [`ClientSession::handle_message`]. Listeners fire after every change,
//! local or remote, once per batch.

use crate::config::SessionConfig;
use crate::error::{Result, SyncError};
use crate::transport::Transport;
use localsync_core::schema::FieldPath;
use localsync_core::{
    Crdt, DeltaOps, Hlc, NestedValue, Schema, SchemaError, Stamp, TextTree,
};
use localsync_proto::{max_delta_stamp, ClientMessage, NodeDelta, ServerMessage};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};

/// A document whose materialized value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Document id
    pub id: String,
    /// New value; `None` once deleted
    pub value: Option<Json>,
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Called with every batch of changes to a collection.
pub type ChangeListener = Box<dyn FnMut(&[Change]) + Send>;

/// Called with the new value of one document.
pub type ItemListener = Box<dyn FnMut(Option<&Json>) + Send>;

struct CollectionState<C: Crdt> {
    clock: Hlc,
    data: BTreeMap<String, C>,
    outbox: Vec<NodeDelta<C::Delta>>,
    schema: Option<Schema>,
    listeners: Vec<(ListenerId, ChangeListener)>,
    item_listeners: BTreeMap<String, Vec<(ListenerId, ItemListener)>>,
}

impl<C: Crdt> CollectionState<C> {
    fn new(clock: Hlc) -> Self {
        Self {
            clock,
            data: BTreeMap::new(),
            outbox: Vec::new(),
            schema: None,
            listeners: Vec::new(),
            item_listeners: BTreeMap::new(),
        }
    }

    /// Apply one delta, dropping a document the delta failed to create.
    fn apply(&mut self, name: &str, id: &str, delta: &C::Delta) -> Result<()> {
        let created = !self.data.contains_key(id);
        let doc = self.data.entry(id.to_string()).or_insert_with(C::create_empty);
        if let Err(err) = doc.apply_delta(delta) {
            if created {
                self.data.remove(id);
            }
            return Err(SyncError::document(name, id, err));
        }
        Ok(())
    }

    fn apply_remote(&mut self, name: &str, deltas: &[NodeDelta<C::Delta>]) -> Result<()> {
        let mut touched = Vec::with_capacity(deltas.len());
        let mut outcome = Ok(());
        for NodeDelta { node, delta } in deltas {
            if let Err(err) = self.apply(name, node, delta) {
                outcome = Err(err);
                break;
            }
            touched.push(node.clone());
        }

        let latest = max_delta_stamp::<C>(&deltas[..touched.len()]);
        if let Some(stamp) = latest {
            if let Err(err) = self.clock.observe(&stamp) {
                outcome = outcome.and(Err(err.into()));
            }
        }
        tracing::debug!(collection = name, applied = touched.len(), "Applied sync batch");
        self.notify(&touched);
        outcome
    }

    fn merge_full(&mut self, name: &str, data: BTreeMap<String, C>) -> Result<()> {
        let latest = data.values().map(Crdt::latest_stamp).max();
        let mut touched = Vec::with_capacity(data.len());
        let mut outcome = Ok(());
        for (id, snapshot) in data {
            if let Some(doc) = self.data.get_mut(&id) {
                if let Err(err) = doc.merge(&snapshot) {
                    outcome = Err(SyncError::document(name, &id, err));
                    break;
                }
            } else {
                self.data.insert(id.clone(), snapshot);
            }
            touched.push(id);
        }

        if let Some(stamp) = latest {
            if let Err(err) = self.clock.observe(&stamp) {
                outcome = outcome.and(Err(err.into()));
            }
        }
        tracing::info!(collection = name, documents = touched.len(), "Merged full snapshot");
        self.notify(&touched);
        outcome
    }

    fn notify(&mut self, ids: &[String]) {
        let mut seen = BTreeSet::new();
        let changes: Vec<Change> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| Change {
                id: id.clone(),
                value: self.data.get(id).and_then(Crdt::value),
            })
            .collect();
        if changes.is_empty() {
            return;
        }

        for (_, listener) in &mut self.listeners {
            listener(&changes);
        }
        for change in &changes {
            if let Some(listeners) = self.item_listeners.get_mut(&change.id) {
                for (_, listener) in listeners {
                    listener(change.value.as_ref());
                }
            }
        }
    }
}

/// All local collections of one client.
pub struct ClientSession<C: Crdt> {
    config: SessionConfig,
    collections: BTreeMap<String, CollectionState<C>>,
    next_listener: u64,
}

impl<C: Crdt> ClientSession<C> {
    /// Create a session with no collections.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(site = %config.site, "Created client session");
        Ok(Self {
            config,
            collections: BTreeMap::new(),
            next_listener: 0,
        })
    }

    /// Site id stamped into local edits.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.config.site
    }

    /// Build documents of `collection` from `schema` on save.
    pub fn register_schema(&mut self, collection: &str, schema: Schema) {
        self.state(collection).schema = Some(schema);
    }

    /// Handle to one collection, created on first use.
    pub fn collection(&mut self, name: &str) -> Collection<'_, C> {
        let config = &self.config;
        let state = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| CollectionState::new(config.clock()));
        Collection {
            name: name.to_string(),
            state,
            next_listener: &mut self.next_listener,
        }
    }

    /// Number of deltas waiting to be sent.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.collections.values().map(|state| state.outbox.len()).sum()
    }

    /// Apply a message from the authority.
    ///
    /// Every delta applied before a failure stays applied and is reported
    /// to listeners.
    ///
    /// # Errors
    ///
    /// Returns error if a document rejects a change or a stamp is malformed.
    pub fn handle_message(&mut self, message: ServerMessage<C>) -> Result<()> {
        match message {
            ServerMessage::Sync { collection, deltas } => {
                self.state(&collection).apply_remote(&collection, &deltas)
            }
            ServerMessage::Full { collection, data } => {
                self.state(&collection).merge_full(&collection, data)
            }
        }
    }

    /// Send every queued delta, one message per collection.
    ///
    /// Returns the number of deltas sent. On failure the queue is kept for
    /// the next flush.
    ///
    /// # Errors
    ///
    /// Returns error if the transport refuses the batch.
    pub fn flush<T>(&mut self, transport: &mut T) -> Result<usize>
    where
        T: Transport<ClientMessage<C>>,
    {
        let messages: Vec<ClientMessage<C>> = self
            .collections
            .iter()
            .filter(|(_, state)| !state.outbox.is_empty())
            .map(|(name, state)| ClientMessage::Delta {
                collection: name.clone(),
                deltas: state.outbox.clone(),
            })
            .collect();
        if messages.is_empty() {
            return Ok(0);
        }

        let count = self.pending();
        if let Err(err) = transport.send(messages) {
            tracing::warn!(site = %self.config.site, error = %err, pending = count, "Flush failed, keeping deltas");
            return Err(err.into());
        }
        for state in self.collections.values_mut() {
            state.outbox.clear();
        }
        tracing::debug!(site = %self.config.site, count, "Flushed deltas");
        Ok(count)
    }

    /// Ask the authority for every document of `collection`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport refuses the request.
    pub fn request_full<T>(&mut self, transport: &mut T, collection: &str) -> Result<()>
    where
        T: Transport<ClientMessage<C>>,
    {
        transport.send(vec![ClientMessage::RequestFull {
            collection: collection.to_string(),
        }])?;
        Ok(())
    }

    fn state(&mut self, name: &str) -> &mut CollectionState<C> {
        let config = &self.config;
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| CollectionState::new(config.clock()))
    }
}

/// Mutable view of one collection of a [`ClientSession`].
pub struct Collection<'a, C: Crdt> {
    name: String,
    state: &'a mut CollectionState<C>,
    next_listener: &'a mut u64,
}

impl<C: Crdt> Collection<'_, C> {
    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace document `id` with `raw`.
    ///
    /// With a registered schema the document is validated and shaped by it;
    /// otherwise every JSON object becomes a mergeable map.
    ///
    /// # Errors
    ///
    /// Returns error if `raw` does not match the schema.
    pub fn save(&mut self, id: &str, raw: &Json) -> Result<()> {
        let state = &mut *self.state;
        let stamp = state.clock.next_stamp();
        let value = match &state.schema {
            Some(schema) => {
                let clock = &mut state.clock;
                C::create_with_schema(raw, &stamp, &mut || clock.next_stamp(), schema)
                    .map_err(|err| SyncError::document(&self.name, id, err))?
            }
            None => C::create_deep_map(raw, &stamp),
        };
        self.commit(id, C::Delta::set(Vec::new(), value))
    }

    /// Write `raw` at `path` inside document `id`.
    ///
    /// # Errors
    ///
    /// Returns error if the path or value does not match the schema.
    pub fn set_attribute(&mut self, id: &str, path: &[&str], raw: &Json) -> Result<()> {
        let state = &mut *self.state;
        let stamp = state.clock.next_stamp();
        let value = match &state.schema {
            Some(schema) => {
                let field = field_schema(schema, path)?;
                let clock = &mut state.clock;
                C::create_with_schema(raw, &stamp, &mut || clock.next_stamp(), field)
                    .map_err(|err| SyncError::document(&self.name, id, err))?
            }
            None => C::create_value(raw, &stamp),
        };
        let path = path.iter().map(ToString::to_string).collect();
        self.commit(id, C::Delta::set(path, value))
    }

    /// Delete document `id`.
    ///
    /// # Errors
    ///
    /// Returns error if the document rejects the removal.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        let stamp = self.state.clock.next_stamp();
        self.commit(id, C::Delta::remove(stamp))
    }

    /// Run an in-place edit on document `id` and queue the delta it returns.
    ///
    /// `edit` receives a fresh stamp from the collection clock.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not exist or the edit fails.
    pub fn edit<F>(&mut self, id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut C, &Stamp) -> std::result::Result<C::Delta, C::Error>,
    {
        let state = &mut *self.state;
        let Some(doc) = state.data.get_mut(id) else {
            return Err(SyncError::UnknownDocument {
                collection: self.name.clone(),
                id: id.to_string(),
            });
        };
        let stamp = state.clock.next_stamp();
        let delta = edit(doc, &stamp).map_err(|err| SyncError::document(&self.name, id, err))?;
        tracing::debug!(collection = %self.name, id, %stamp, "Created delta (edit)");
        state.outbox.push(NodeDelta::new(id, delta));
        state.notify(&[id.to_string()]);
        Ok(())
    }

    /// Materialized document, `None` if absent or deleted.
    #[must_use]
    pub fn load(&self, id: &str) -> Option<Json> {
        self.state.data.get(id).and_then(Crdt::value)
    }

    /// Every live document.
    #[must_use]
    pub fn load_all(&self) -> BTreeMap<String, Json> {
        self.state
            .data
            .iter()
            .filter_map(|(id, doc)| Some((id.clone(), doc.value()?)))
            .collect()
    }

    /// Replicated state of document `id`.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<&C> {
        self.state.data.get(id)
    }

    /// Deltas of this collection waiting to be sent.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.outbox.len()
    }

    /// Listen to every batch of changes.
    pub fn on_changes<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&[Change]) + Send + 'static,
    {
        let id = self.listener_id();
        self.state.listeners.push((id, Box::new(listener)));
        id
    }

    /// Listen to changes of document `id`.
    pub fn on_item_change<F>(&mut self, id: &str, listener: F) -> ListenerId
    where
        F: FnMut(Option<&Json>) + Send + 'static,
    {
        let listener_id = self.listener_id();
        self.state
            .item_listeners
            .entry(id.to_string())
            .or_default()
            .push((listener_id, Box::new(listener)));
        listener_id
    }

    /// Remove a listener. Returns `false` if it was not registered here.
    pub fn unsubscribe(&mut self, listener: ListenerId) -> bool {
        let before = self.state.listeners.len();
        self.state.listeners.retain(|(id, _)| *id != listener);
        if self.state.listeners.len() != before {
            return true;
        }

        let mut removed = false;
        self.state.item_listeners.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(id, _)| *id != listener);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    fn listener_id(&mut self) -> ListenerId {
        *self.next_listener += 1;
        ListenerId(*self.next_listener)
    }

    fn commit(&mut self, id: &str, delta: C::Delta) -> Result<()> {
        self.state.apply(&self.name, id, &delta)?;
        tracing::debug!(collection = %self.name, id, stamp = %delta.stamp(), "Created delta");
        self.state.outbox.push(NodeDelta::new(id, delta));
        self.state.notify(&[id.to_string()]);
        Ok(())
    }
}

impl Collection<'_, NestedValue<TextTree>> {
    /// Insert `text` at `pos` into the rich-text field at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the document is unknown, the field holds no text or
    /// `pos` is out of bounds.
    pub fn insert_text(&mut self, id: &str, path: &[&str], pos: usize, text: &str) -> Result<()> {
        let path: Vec<String> = path.iter().map(ToString::to_string).collect();
        self.edit(id, |doc, stamp| doc.insert_text(&path, pos, text, stamp))
    }

    /// Delete `len` characters at `pos` from the rich-text field at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the document is unknown, the field holds no text or
    /// the range is out of bounds.
    pub fn delete_text(&mut self, id: &str, path: &[&str], pos: usize, len: usize) -> Result<()> {
        let path: Vec<String> = path.iter().map(ToString::to_string).collect();
        self.edit(id, |doc, stamp| doc.delete_text(&path, pos, len, stamp))
    }
}

fn field_schema<'s>(schema: &'s Schema, path: &[&str]) -> Result<&'s Schema> {
    path.iter()
        .enumerate()
        .try_fold(schema, |current, (depth, key)| {
            current.field(key).ok_or_else(|| {
                let at = path[..=depth].iter().map(ToString::to_string).collect();
                SchemaError::ExtraAttribute(FieldPath(at))
            })
        })
        .map_err(SyncError::from)
}
