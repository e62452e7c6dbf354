//! Persistence collaborator for the authority replica.
//!
//! The authority never touches storage directly; it reads and writes
//! documents through [`Store`], and obtains one store per user through
//! [`StoreLoader`]. [`MemoryStore`] keeps everything in process.

use localsync_core::Crdt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Document storage scoped to one user.
pub trait Store<C: Crdt> {
    /// Fetch a document.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn get(&self, collection: &str, id: &str) -> Result<Option<C>, StoreError>;

    /// Write a document, replacing any previous state.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written.
    fn put(&mut self, collection: &str, id: &str, value: C) -> Result<(), StoreError>;

    /// Every document of a collection.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn all(&self, collection: &str) -> Result<BTreeMap<String, C>, StoreError>;
}

/// Opens the store belonging to a user.
pub trait StoreLoader<C: Crdt> {
    /// Store type handed out by this loader.
    type Store: Store<C>;

    /// Open (or create) the store at `user_path`.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened.
    fn load(&mut self, user_path: &str) -> Result<Self::Store, StoreError>;
}

type Collections<C> = HashMap<String, BTreeMap<String, C>>;

/// In-memory store; clones share the same documents.
#[derive(Debug)]
pub struct MemoryStore<C> {
    inner: Arc<Mutex<Collections<C>>>,
}

impl<C> Clone for MemoryStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for MemoryStore<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<C> MemoryStore<C> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections<C>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl<C: Crdt> Store<C> for MemoryStore<C> {
    fn get(&self, collection: &str, id: &str) -> Result<Option<C>, StoreError> {
        Ok(self
            .lock()?
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn put(&mut self, collection: &str, id: &str, value: C) -> Result<(), StoreError> {
        self.lock()?
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    fn all(&self, collection: &str) -> Result<BTreeMap<String, C>, StoreError> {
        Ok(self.lock()?.get(collection).cloned().unwrap_or_default())
    }
}

/// Hands out one [`MemoryStore`] per user path.
#[derive(Debug)]
pub struct MemoryLoader<C> {
    stores: HashMap<String, MemoryStore<C>>,
}

impl<C> Default for MemoryLoader<C> {
    fn default() -> Self {
        Self {
            stores: HashMap::new(),
        }
    }
}

impl<C> MemoryLoader<C> {
    /// Create a loader with no stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Crdt> StoreLoader<C> for MemoryLoader<C> {
    type Store = MemoryStore<C>;

    fn load(&mut self, user_path: &str) -> Result<Self::Store, StoreError> {
        if user_path.is_empty() {
            return Err(StoreError::InvalidPath(user_path.to_string()));
        }
        let store = self.stores.entry(user_path.to_string()).or_default();
        tracing::debug!(user_path, "Loaded memory store");
        Ok(store.clone())
    }
}

/// Errors raised by stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A writer panicked while holding the store
    #[error("store lock poisoned")]
    Poisoned,

    /// The user path cannot name a store
    #[error("invalid store path: {0:?}")]
    InvalidPath(String),

    /// Backend-specific failure
    #[error("store backend error: {0}")]
    Backend(String),
}
