//! A single replicated document with its own clock.
//!
//! [`Replica`] stamps local edits from its [`Hlc`] and folds the stamps of
//! remote deltas back into it, so a local edit made after applying a remote
//! one always wins over it.

use crate::crdt::{Crdt, DeltaOps, EmbeddedCrdt};
use crate::hlc::{ClockError, Hlc};
use crate::text::TextTree;
use crate::value::{NestedValue, ValueDelta, ValueError};

/// A document replica: structured value plus clock.
#[derive(Debug, Clone)]
pub struct Replica<E: EmbeddedCrdt = TextTree> {
    /// Document identifier
    pub id: String,
    /// CRDT state
    pub state: NestedValue<E>,
    /// Hybrid logical clock for this replica
    pub clock: Hlc,
}

fn owned(path: &[&str]) -> Vec<String> {
    path.iter().map(ToString::to_string).collect()
}

impl<E: EmbeddedCrdt> Replica<E> {
    /// Create a new empty document.
    #[must_use]
    pub fn new(id: impl Into<String>, clock: Hlc) -> Self {
        Self {
            id: id.into(),
            state: NestedValue::create_empty(),
            clock,
        }
    }

    /// Write `raw` at `path`; JSON objects become mergeable maps.
    ///
    /// # Errors
    ///
    /// Returns error if the write cannot be merged.
    pub fn set(&mut self, path: &[&str], raw: &serde_json::Value) -> Result<ValueDelta<E>, ValueError> {
        let stamp = self.clock.next_stamp();
        let delta = ValueDelta::set(owned(path), NestedValue::create_deep_map(raw, &stamp));
        self.state.apply_delta(&delta)?;
        tracing::debug!(doc_id = %self.id, ?path, %stamp, "Created delta (set)");
        Ok(delta)
    }

    /// Remove the field at `path`, or the whole document for an empty path.
    ///
    /// # Errors
    ///
    /// Returns error if the removal cannot be applied.
    pub fn remove(&mut self, path: &[&str]) -> Result<ValueDelta<E>, ValueError> {
        let stamp = self.clock.next_stamp();
        let delta = if path.is_empty() {
            ValueDelta::remove(stamp.clone())
        } else {
            ValueDelta::remove_at(owned(path), stamp.clone())
        };
        self.state.apply_delta(&delta)?;
        tracing::debug!(doc_id = %self.id, ?path, %stamp, "Created delta (remove)");
        Ok(delta)
    }

    /// Apply a delta from another replica.
    ///
    /// # Errors
    ///
    /// Returns error if the delta carries a malformed stamp or cannot be
    /// applied; the clock is untouched in either case.
    pub fn apply_delta(&mut self, delta: &ValueDelta<E>) -> Result<(), ReplicaError> {
        let stamp = delta.stamp();
        let mut clock = self.clock.clone();
        clock.observe(&stamp)?;
        self.state.apply_delta(delta)?;
        self.clock = clock;
        tracing::debug!(doc_id = %self.id, path = ?delta.path(), %stamp, "Applied delta");
        Ok(())
    }

    /// Merge with another replica's state.
    ///
    /// # Errors
    ///
    /// Returns error if either state is corrupt; the clock is untouched
    /// in that case.
    pub fn merge(&mut self, other: &Self) -> Result<(), ReplicaError> {
        let mut clock = self.clock.clone();
        clock.observe(&other.state.latest_stamp())?;
        self.state.merge(&other.state)?;
        self.clock = clock;
        Ok(())
    }

    /// Materialized document, `None` once removed.
    #[must_use]
    pub fn value(&self) -> Option<serde_json::Value> {
        self.state.value()
    }

    /// Materialized field at `path`.
    #[must_use]
    pub fn get(&self, path: &[&str]) -> Option<serde_json::Value> {
        let mut value = self.value()?;
        for key in path {
            value = value.as_object_mut()?.remove(*key)?;
        }
        Some(value)
    }
}

impl Replica<TextTree> {
    /// Create a rich-text field at `path` holding `text`.
    ///
    /// # Errors
    ///
    /// Returns error if the text cannot be created.
    pub fn set_text(&mut self, path: &[&str], text: &str) -> Result<ValueDelta, ReplicaError> {
        let stamp = self.clock.next_stamp();
        let tree = TextTree::from_text(text, &stamp).map_err(ValueError::from_embedded)?;
        let delta = ValueDelta::set(owned(path), NestedValue::create_embedded(tree, &stamp));
        self.state.apply_delta(&delta)?;
        tracing::debug!(doc_id = %self.id, ?path, %stamp, "Created delta (set text)");
        Ok(delta)
    }

    /// Insert into the rich-text field at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the field holds no text or `pos` is out of bounds.
    pub fn insert_text(&mut self, path: &[&str], pos: usize, text: &str) -> Result<ValueDelta, ValueError> {
        let stamp = self.clock.next_stamp();
        self.state.insert_text(&owned(path), pos, text, &stamp)
    }

    /// Delete from the rich-text field at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the field holds no text or the range is out of
    /// bounds.
    pub fn delete_text(&mut self, path: &[&str], pos: usize, len: usize) -> Result<ValueDelta, ValueError> {
        let stamp = self.clock.next_stamp();
        self.state.delete_text(&owned(path), pos, len, &stamp)
    }
}

/// Errors for replica operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// The delta's stamp could not be read
    #[error(transparent)]
    Clock(#[from] ClockError),
    /// The delta could not be applied
    #[error(transparent)]
    Value(#[from] ValueError),
}
