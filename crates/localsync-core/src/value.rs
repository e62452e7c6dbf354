//! Nested-object CRDT with per-field conflict resolution.
//!
//! A [`NestedValue`] is a tree of per-path [`LwwRegister`]s. Every node holds
//! the last write to its path (a map, a scalar, an embedded CRDT, or a
//! removal) and keeps its children regardless of what that write was. Merging
//! is register-wise LWW plus a key-wise union of children, so it is
//! commutative, associative and idempotent.
//!
//! Visibility is decided when materializing: a map written at stamp `t` only
//! shows children written at or after `t`, so saving a whole object replaces
//! the fields an older save had, while fields written concurrently with (or
//! after) it survive.

use crate::crdt::{Crdt, DeltaOps, EmbeddedCrdt, LwwRegister};
use crate::hlc::Stamp;
use crate::schema::{FieldPath, MergePolicy, Schema, SchemaError};
use crate::text::TextTree;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// What the last write to a path was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
#[serde(bound = "")]
pub enum Kind<E: EmbeddedCrdt> {
    /// A container; children written after it are visible
    Map,
    /// A value replaced as a whole
    Scalar(Json),
    /// An embedded CRDT
    Embedded(E),
    /// A removal
    Removed,
}

/// The structured-value CRDT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NestedValue<E: EmbeddedCrdt = TextTree> {
    write: LwwRegister<Kind<E>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<String, NestedValue<E>>,
}

/// An operation on a [`NestedValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[serde(bound = "")]
pub enum ValueDelta<E: EmbeddedCrdt = TextTree> {
    /// Merge `value` in at `path`
    Set {
        /// Field path, empty for the whole value
        path: Vec<String>,
        /// Value written there
        value: NestedValue<E>,
    },
    /// Remove the field at `path`
    RemoveAt {
        /// Field path
        path: Vec<String>,
        /// Stamp of the removal
        stamp: Stamp,
    },
    /// Remove the whole value
    Remove {
        /// Stamp of the removal
        stamp: Stamp,
    },
    /// Edit the embedded CRDT at `path`
    Embedded {
        /// Field path
        path: Vec<String>,
        /// Register stamp of the embedded value the edit was made against
        target: Stamp,
        /// The embedded edit
        delta: E::Delta,
    },
}

impl<E: EmbeddedCrdt> ValueDelta<E> {
    /// Build an embedded edit.
    #[must_use]
    pub fn embedded(path: Vec<String>, target: Stamp, delta: E::Delta) -> Self {
        ValueDelta::Embedded {
            path,
            target,
            delta,
        }
    }

    /// Field path the delta touches (empty for the whole value).
    #[must_use]
    pub fn path(&self) -> &[String] {
        match self {
            ValueDelta::Set { path, .. }
            | ValueDelta::RemoveAt { path, .. }
            | ValueDelta::Embedded { path, .. } => path,
            ValueDelta::Remove { .. } => &[],
        }
    }
}

impl<E: EmbeddedCrdt> DeltaOps<NestedValue<E>> for ValueDelta<E> {
    fn set(path: Vec<String>, value: NestedValue<E>) -> Self {
        ValueDelta::Set { path, value }
    }

    fn remove_at(path: Vec<String>, stamp: Stamp) -> Self {
        ValueDelta::RemoveAt { path, stamp }
    }

    fn remove(stamp: Stamp) -> Self {
        ValueDelta::Remove { stamp }
    }

    fn stamp(&self) -> Stamp {
        match self {
            ValueDelta::Set { value, .. } => value.latest_stamp(),
            ValueDelta::RemoveAt { stamp, .. } | ValueDelta::Remove { stamp } => stamp.clone(),
            ValueDelta::Embedded { delta, .. } => E::delta_stamp(delta).clone(),
        }
    }
}

impl<E: EmbeddedCrdt> NestedValue<E> {
    fn node(kind: Kind<E>, stamp: Stamp) -> Self {
        Self {
            write: LwwRegister::new(kind, stamp),
            children: BTreeMap::new(),
        }
    }

    /// Wrap an embedded CRDT written at `stamp`.
    #[must_use]
    pub fn create_embedded(inner: E, stamp: &Stamp) -> Self {
        Self::node(Kind::Embedded(inner), stamp.clone())
    }

    /// The last write to this node.
    #[must_use]
    pub fn kind(&self) -> &Kind<E> {
        &self.write.value
    }

    /// Stamp of the last write to this node.
    #[must_use]
    pub fn stamp(&self) -> &Stamp {
        &self.write.stamp
    }

    /// Node at `path`, visible or not.
    #[must_use]
    pub fn get(&self, path: &[String]) -> Option<&Self> {
        path.iter().try_fold(self, |node, key| node.children.get(key))
    }

    fn get_mut(&mut self, path: &[String]) -> Option<&mut Self> {
        let mut node = self;
        for key in path {
            node = node.children.get_mut(key)?;
        }
        Some(node)
    }

    /// Node at `path`, creating implicit containers on the way.
    fn entry(&mut self, path: &[String]) -> &mut Self {
        let mut node = self;
        for key in path {
            node = node
                .children
                .entry(key.clone())
                .or_insert_with(Self::create_empty);
        }
        node
    }

    /// The embedded CRDT at `path`, if that path holds one.
    #[must_use]
    pub fn embedded_at(&self, path: &[String]) -> Option<&E> {
        match self.get(path)?.kind() {
            Kind::Embedded(inner) => Some(inner),
            _ => None,
        }
    }

    /// Edit the embedded CRDT at `path` and return the delta describing it.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::NotEmbedded`] if the path holds no embedded
    /// value, or the embedded CRDT's own error.
    pub fn edit_embedded<F>(&mut self, path: &[String], edit: F) -> Result<ValueDelta<E>, ValueError>
    where
        F: FnOnce(&mut E) -> Result<E::Delta, E::Error>,
    {
        let node = self
            .get_mut(path)
            .ok_or_else(|| ValueError::NotEmbedded(FieldPath(path.to_vec())))?;
        let target = node.write.stamp.clone();
        let Kind::Embedded(inner) = &mut node.write.value else {
            return Err(ValueError::NotEmbedded(FieldPath(path.to_vec())));
        };
        let delta = edit(inner).map_err(ValueError::from_embedded)?;
        Ok(ValueDelta::embedded(path.to_vec(), target, delta))
    }

    fn build(
        raw: &Json,
        stamp: &Stamp,
        stamp_gen: &mut dyn FnMut() -> Stamp,
        schema: &Schema,
    ) -> Result<Self, ValueError> {
        if let Schema::Optional(inner) = schema {
            return match raw {
                Json::Null => Ok(Self::create_value(raw, stamp)),
                _ => Self::build(raw, stamp, stamp_gen, inner),
            };
        }

        match (schema.merge_policy(), raw) {
            (MergePolicy::PerField, Json::Object(entries)) => {
                let mut node = Self::node(Kind::Map, stamp.clone());
                for (key, value) in entries {
                    let field = schema.field(key).ok_or_else(|| {
                        SchemaError::ExtraAttribute(FieldPath(vec![key.clone()]))
                    })?;
                    let child_stamp = stamp_gen();
                    node.children.insert(
                        key.clone(),
                        Self::build(value, &child_stamp, stamp_gen, field)?,
                    );
                }
                Ok(node)
            }
            (MergePolicy::Delegated, _) => {
                let inner = E::create(raw, stamp).map_err(ValueError::from_embedded)?;
                Ok(Self::node(Kind::Embedded(inner), stamp.clone()))
            }
            _ => Ok(Self::create_value(raw, stamp)),
        }
    }

    fn merge_node(&mut self, other: &Self) -> Result<(), ValueError> {
        let mut tie = Ok(());
        self.write.merge_with(&other.write, |mine, theirs| {
            if let (Kind::Embedded(mine), Kind::Embedded(theirs)) = (mine, theirs) {
                tie = mine.merge(theirs).map_err(ValueError::from_embedded);
            }
        });
        tie?;

        for (key, theirs) in &other.children {
            match self.children.get_mut(key) {
                Some(mine) => mine.merge_node(theirs)?,
                None => {
                    self.children.insert(key.clone(), theirs.clone());
                }
            }
        }
        Ok(())
    }

    fn materialize(&self, floor: &Stamp) -> Option<Json> {
        let stamp = &self.write.stamp;
        if stamp < floor {
            return self.implicit_map(floor);
        }
        match &self.write.value {
            Kind::Map => Some(Json::Object(self.fields(stamp))),
            Kind::Scalar(value) => self.implicit_map(stamp).or_else(|| Some(value.clone())),
            Kind::Embedded(inner) => self.implicit_map(stamp).or_else(|| Some(inner.value())),
            Kind::Removed => self.implicit_map(stamp),
        }
    }

    fn fields(&self, floor: &Stamp) -> serde_json::Map<String, Json> {
        self.children
            .iter()
            .filter_map(|(key, child)| Some((key.clone(), child.materialize(floor)?)))
            .collect()
    }

    /// Children written after `floor`, if any.
    fn implicit_map(&self, floor: &Stamp) -> Option<Json> {
        let fields = self.fields(floor);
        (!fields.is_empty()).then_some(Json::Object(fields))
    }

    fn apply(&mut self, delta: &ValueDelta<E>) -> Result<(), ValueError> {
        match delta {
            ValueDelta::Set { path, value } => self.entry(path).merge_node(value),
            ValueDelta::RemoveAt { path, stamp } => {
                self.entry(path)
                    .write
                    .merge(&LwwRegister::new(Kind::Removed, stamp.clone()));
                Ok(())
            }
            ValueDelta::Remove { stamp } => {
                self.write
                    .merge(&LwwRegister::new(Kind::Removed, stamp.clone()));
                Ok(())
            }
            ValueDelta::Embedded {
                path,
                target,
                delta,
            } => {
                let missing = || ValueError::MissingTarget {
                    path: FieldPath(path.clone()),
                    target: target.clone(),
                };
                let node = self.get_mut(path).ok_or_else(missing)?;
                if node.write.stamp > *target {
                    // the edited value was overwritten by a newer write
                    tracing::warn!(
                        path = %FieldPath(path.clone()),
                        target = %target,
                        current = %node.write.stamp,
                        "Dropping embedded delta for replaced value"
                    );
                    return Ok(());
                }
                let current = node.write.stamp == *target;
                match &mut node.write.value {
                    Kind::Embedded(inner) if current => {
                        inner.apply(delta).map_err(ValueError::from_embedded)
                    }
                    _ => Err(missing()),
                }
            }
        }
    }
}

impl<E: EmbeddedCrdt> Crdt for NestedValue<E> {
    type Delta = ValueDelta<E>;
    type Error = ValueError;

    fn create_empty() -> Self {
        Self::node(Kind::Map, Stamp::zero())
    }

    fn create_with_schema(
        raw: &Json,
        stamp: &Stamp,
        stamp_gen: &mut dyn FnMut() -> Stamp,
        schema: &Schema,
    ) -> Result<Self, Self::Error> {
        schema.validate(raw)?;
        Self::build(raw, stamp, stamp_gen, schema)
    }

    fn create_deep_map(raw: &Json, stamp: &Stamp) -> Self {
        match raw {
            Json::Object(entries) => {
                let mut node = Self::node(Kind::Map, stamp.clone());
                node.children = entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::create_deep_map(value, stamp)))
                    .collect();
                node
            }
            _ => Self::create_value(raw, stamp),
        }
    }

    fn create_value(raw: &Json, stamp: &Stamp) -> Self {
        Self::node(Kind::Scalar(raw.clone()), stamp.clone())
    }

    fn apply_delta(&mut self, delta: &Self::Delta) -> Result<(), Self::Error> {
        // embedded edits are atomic on their own; merges may touch many
        // registers, so stage them
        match delta {
            ValueDelta::Set { .. } => {
                let mut staged = self.clone();
                staged.apply(delta)?;
                *self = staged;
                Ok(())
            }
            _ => self.apply(delta),
        }
    }

    fn merge(&mut self, other: &Self) -> Result<(), Self::Error> {
        let mut staged = self.clone();
        staged.merge_node(other)?;
        *self = staged;
        Ok(())
    }

    fn value(&self) -> Option<Json> {
        self.materialize(&Stamp::zero())
    }

    fn latest_stamp(&self) -> Stamp {
        let mut latest = self.write.stamp.clone();
        if let Kind::Embedded(inner) = &self.write.value {
            latest = latest.max(inner.latest_stamp());
        }
        self.children
            .values()
            .map(Crdt::latest_stamp)
            .fold(latest, Ord::max)
    }
}

impl NestedValue<TextTree> {
    /// Text at `path`, if that path holds rich text.
    #[must_use]
    pub fn text_at(&self, path: &[String]) -> Option<&TextTree> {
        self.embedded_at(path)
    }

    /// Insert text into the rich-text field at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the path holds no text or `pos` is out of bounds.
    pub fn insert_text(
        &mut self,
        path: &[String],
        pos: usize,
        text: &str,
        stamp: &Stamp,
    ) -> Result<ValueDelta<TextTree>, ValueError> {
        self.edit_embedded(path, |tree| tree.insert_at(pos, text, stamp))
    }

    /// Delete text from the rich-text field at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the path holds no text or the range is out of bounds.
    pub fn delete_text(
        &mut self,
        path: &[String],
        pos: usize,
        len: usize,
        stamp: &Stamp,
    ) -> Result<ValueDelta<TextTree>, ValueError> {
        self.edit_embedded(path, |tree| tree.delete(pos, len, stamp))
    }
}

/// Errors for structured values.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// Raw data does not match the schema
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),
    /// The path does not hold an embedded value
    #[error("{0}: not an embedded value")]
    NotEmbedded(FieldPath),
    /// The embedded value an edit was made against has not arrived yet
    #[error("{path}: embedded value written at {target} not present")]
    MissingTarget {
        /// Field path of the edit
        path: FieldPath,
        /// Register stamp the edit expects
        target: Stamp,
    },
    /// The embedded CRDT rejected an operation
    #[error("embedded value: {0}")]
    Embedded(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ValueError {
    /// Wrap an error raised by an embedded CRDT.
    pub fn from_embedded<T: std::error::Error + Send + Sync + 'static>(err: T) -> Self {
        ValueError::Embedded(Box::new(err))
    }
}
