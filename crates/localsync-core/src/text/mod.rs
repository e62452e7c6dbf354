//! Tree-structured rich-text CRDT.
//!
//! Text is a forest of runs. A run ([`TextNode`]) is the text of one insert;
//! character `i` of a run whose id is `(counter, site)` has id
//! `(counter + i, site)`. A run is a child of the run holding the character it
//! was typed after, so a pre-order walk of the forest yields the document.
//!
//! Runs are never removed. Deleting marks them as tombstones, and inserting
//! or deleting in the middle of a run splits it: the tail becomes a new run
//! (keeping its characters' ids) that takes over the head's children and
//! becomes the head's only child. Every node caches `size`, the number of live
//! characters in its own text and all descendants, which is what position
//! lookups descend by.
//!
//! Siblings are ordered descending by `(counter, site)`. New ids are Lamport
//! counters (`max seen + 1`), so a later insert at the same anchor sorts first
//! and concurrent inserts at one anchor are ordered by site.

mod loc;

pub use loc::Loc;

use crate::crdt::EmbeddedCrdt;
use crate::hlc::Stamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Site name reserved for the document start/end sentinels.
pub const ROOT_SITE: &str = "root";

/// Formatting attributes attached to a run.
pub type Format = BTreeMap<String, serde_json::Value>;

/// Identifier of a character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
    /// Lamport counter, unique per site
    pub counter: u64,
    /// Site that minted the id
    pub site: String,
}

impl Id {
    /// Create an identifier.
    #[must_use]
    pub fn new(counter: u64, site: impl Into<String>) -> Self {
        Self {
            counter,
            site: site.into(),
        }
    }

    fn offset(&self, by: usize) -> Self {
        Self::new(self.counter + by as u64, self.site.clone())
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.site.cmp(&other.site))
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.counter, self.site)
    }
}

/// A run of text inserted by one operation (or a fragment of one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    /// Id of the first character
    pub id: Id,
    /// Run this one was inserted after; `None` for roots
    pub parent: Option<Id>,
    /// Content of the run
    pub text: String,
    /// Formatting attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub format: Format,
    /// Tombstone flag
    pub deleted: bool,
    /// Runs inserted after this run's last character
    pub children: Vec<Id>,
    /// Live characters in this run and all descendants
    pub size: usize,
}

impl TextNode {
    /// Number of characters in the run, live or not.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Characters this run contributes to the document.
    #[must_use]
    pub fn live_len(&self) -> usize {
        if self.deleted {
            0
        } else {
            self.char_len()
        }
    }

    fn last_id(&self) -> Id {
        self.id.offset(self.char_len().saturating_sub(1))
    }

    fn covers(&self, counter: u64) -> bool {
        counter >= self.id.counter && counter < self.id.counter + self.char_len() as u64
    }
}

/// A range of consecutive character ids from one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// First character
    pub id: Id,
    /// Number of characters
    pub len: usize,
}

/// A text operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TextDelta {
    /// Insert a run after a character (`None` = document start)
    Insert {
        /// Id of the run's first character
        id: Id,
        /// Character the run follows
        after: Option<Id>,
        /// Run content
        text: String,
        /// Formatting attributes
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        format: Format,
        /// Clock stamp of the edit
        stamp: Stamp,
    },
    /// Tombstone characters
    Delete {
        /// Character ranges to delete
        spans: Vec<Span>,
        /// Clock stamp of the edit
        stamp: Stamp,
    },
}

impl TextDelta {
    /// The clock stamp of this edit.
    #[must_use]
    pub fn stamp(&self) -> &Stamp {
        match self {
            TextDelta::Insert { stamp, .. } | TextDelta::Delete { stamp, .. } => stamp,
        }
    }
}

/// A live run of text with its formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    /// Content
    pub text: String,
    /// Formatting attributes
    pub format: Format,
}

/// The text CRDT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TextTreeRepr", into = "TextTreeRepr")]
pub struct TextTree {
    roots: Vec<Id>,
    /// Arena: site -> counter of first character -> run
    nodes: BTreeMap<String, BTreeMap<u64, TextNode>>,
    max_counter: u64,
    stamp: Stamp,
}

impl TextTree {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document holding `text`, minted for `stamp`'s site.
    ///
    /// # Errors
    ///
    /// Returns error if the stamp carries no usable site.
    pub fn from_text(text: &str, stamp: &Stamp) -> Result<Self, TextError> {
        let mut tree = Self::new();
        if !text.is_empty() {
            tree.insert_at(0, text, stamp)?;
        }
        tree.observe(stamp);
        Ok(tree)
    }

    /// Number of live characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots
            .iter()
            .filter_map(|id| self.node(id))
            .map(|node| node.size)
            .sum()
    }

    /// Returns `true` if no live characters remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a run by the id of its first character.
    #[must_use]
    pub fn node(&self, id: &Id) -> Option<&TextNode> {
        self.nodes.get(&id.site)?.get(&id.counter)
    }

    /// Number of runs, including tombstones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }

    /// Highest stamp of any edit applied to this document.
    #[must_use]
    pub fn latest_stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// The live text.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.len());
        self.for_each_live(|node| out.push_str(&node.text));
        out
    }

    /// Live runs in document order, adjacent runs with equal format joined.
    #[must_use]
    pub fn spans(&self) -> Vec<TextSpan> {
        let mut spans: Vec<TextSpan> = Vec::new();
        self.for_each_live(|node| match spans.last_mut() {
            Some(last) if last.format == node.format => last.text.push_str(&node.text),
            _ => spans.push(TextSpan {
                text: node.text.clone(),
                format: node.format.clone(),
            }),
        });
        spans
    }

    /// Insert `text` after the character `after` anchors.
    ///
    /// A `pre` location names the character to insert after; a `post`
    /// location is resolved to its position first.
    ///
    /// # Errors
    ///
    /// Returns error if the location does not resolve, the text is empty, or
    /// the stamp has no usable site. Nothing is modified on error.
    pub fn insert(
        &mut self,
        after: &Loc,
        text: &str,
        stamp: &Stamp,
    ) -> Result<(Id, TextDelta), TextError> {
        self.insert_formatted(after, text, Format::new(), stamp)
    }

    /// [`TextTree::insert`] with formatting attributes.
    ///
    /// # Errors
    ///
    /// See [`TextTree::insert`].
    pub fn insert_formatted(
        &mut self,
        after: &Loc,
        text: &str,
        format: Format,
        stamp: &Stamp,
    ) -> Result<(Id, TextDelta), TextError> {
        if text.is_empty() {
            return Err(TextError::EmptyInsert);
        }
        let site = stamp
            .site()
            .ok_or_else(|| TextError::InvalidStamp(stamp.clone()))?;
        if site == ROOT_SITE {
            return Err(TextError::ReservedSite);
        }

        let anchor = self.anchor_for(after)?;
        let id = Id::new(self.max_counter + 1, site);
        let delta = TextDelta::Insert {
            id: id.clone(),
            after: anchor,
            text: text.to_string(),
            format,
            stamp: stamp.clone(),
        };
        self.apply_delta(&delta)?;

        tracing::debug!(id = %id, len = text.chars().count(), "Created delta (text insert)");
        Ok((id, delta))
    }

    /// Insert `text` so that it starts at position `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::PositionOutOfBounds`] if `pos > len()`.
    pub fn insert_at(
        &mut self,
        pos: usize,
        text: &str,
        stamp: &Stamp,
    ) -> Result<TextDelta, TextError> {
        let after = self.pos_to_loc(pos, true)?;
        self.insert(&after, text, stamp).map(|(_, delta)| delta)
    }

    /// Delete `len` characters starting at `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::PositionOutOfBounds`] if the range extends past
    /// the end. Nothing is modified on error.
    pub fn delete(&mut self, pos: usize, len: usize, stamp: &Stamp) -> Result<TextDelta, TextError> {
        let total = self.len();
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= total)
            .ok_or(TextError::PositionOutOfBounds {
                pos: pos.saturating_add(len),
                len: total,
            })?;

        let spans = self.live_spans(pos, end)?;
        let delta = TextDelta::Delete {
            spans,
            stamp: stamp.clone(),
        };
        self.apply_delta(&delta)?;

        tracing::debug!(pos, len, "Created delta (text delete)");
        Ok(delta)
    }

    /// Apply a local or remote delta. Applying a delta twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the delta references characters this replica has
    /// never seen. Nothing is modified on error.
    pub fn apply_delta(&mut self, delta: &TextDelta) -> Result<(), TextError> {
        match delta {
            TextDelta::Insert {
                id,
                after,
                text,
                format,
                stamp,
            } => {
                self.integrate_insert(id, after.as_ref(), text, format)?;
                self.observe(stamp);
            }
            TextDelta::Delete { spans, stamp } => {
                for span in spans {
                    self.ensure_covered(span)?;
                }
                for span in spans {
                    self.delete_span(&span.id, span.len)?;
                }
                self.observe(stamp);
            }
        }
        Ok(())
    }

    /// Merge another replica's full state into this one.
    ///
    /// # Errors
    ///
    /// Returns error if `other` is structurally inconsistent.
    pub fn merge(&mut self, other: &TextTree) -> Result<(), TextError> {
        let order = other.ordered_ids()?;
        for id in &order {
            let node = other.expect_node(id)?;
            let after = match &node.parent {
                None => None,
                Some(parent) => Some(other.expect_node(parent)?.last_id()),
            };
            self.integrate_insert(&node.id, after.as_ref(), &node.text, &node.format)?;
        }
        for id in &order {
            let node = other.expect_node(id)?;
            if node.deleted {
                self.delete_span(&node.id, node.char_len())?;
            }
        }
        self.observe(&other.stamp);
        Ok(())
    }

    /// Verify arena membership, parent links and size caches.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::StructuralInconsistency`] describing the first
    /// violation found.
    pub fn check_invariants(&self) -> Result<(), TextError> {
        let order = self.ordered_ids()?;
        if order.len() != self.node_count() {
            return Err(TextError::StructuralInconsistency(format!(
                "{} runs in arena but {} reachable",
                self.node_count(),
                order.len()
            )));
        }
        for root in &self.roots {
            if self.expect_node(root)?.parent.is_some() {
                return Err(TextError::StructuralInconsistency(format!(
                    "root {root} has a parent"
                )));
            }
        }

        // reverse pre-order visits children before parents
        let mut sizes: HashMap<&Id, usize> = HashMap::with_capacity(order.len());
        for id in order.iter().rev() {
            let node = self.expect_node(id)?;
            let mut size = node.live_len();
            for child in &node.children {
                if self.expect_node(child)?.parent.as_ref() != Some(&node.id) {
                    return Err(TextError::StructuralInconsistency(format!(
                        "{child} is listed under {id} but points elsewhere"
                    )));
                }
                size += sizes.get(child).copied().unwrap_or_default();
            }
            if size != node.size {
                return Err(TextError::StructuralInconsistency(format!(
                    "cached size {} of {id} should be {size}",
                    node.size
                )));
            }
            sizes.insert(id, size);
        }
        Ok(())
    }

    fn node_mut(&mut self, id: &Id) -> Option<&mut TextNode> {
        self.nodes.get_mut(&id.site)?.get_mut(&id.counter)
    }

    fn expect_node(&self, id: &Id) -> Result<&TextNode, TextError> {
        self.node(id).ok_or_else(|| TextError::MissingNode(id.clone()))
    }

    fn expect_node_mut(&mut self, id: &Id) -> Result<&mut TextNode, TextError> {
        self.node_mut(id).ok_or_else(|| TextError::MissingNode(id.clone()))
    }

    /// The run containing character `(counter, site)`.
    fn owner(&self, counter: u64, site: &str) -> Option<&TextNode> {
        let (_, node) = self.nodes.get(site)?.range(..=counter).next_back()?;
        node.covers(counter).then_some(node)
    }

    fn children_of(&self, parent: Option<&Id>) -> Result<&[Id], TextError> {
        match parent {
            None => Ok(&self.roots),
            Some(id) => Ok(&self.expect_node(id)?.children),
        }
    }

    /// Ids of all runs in document order.
    fn ordered_ids(&self) -> Result<Vec<Id>, TextError> {
        let limit = self.node_count();
        let mut out = Vec::with_capacity(limit);
        let mut stack: Vec<&Id> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if out.len() == limit {
                return Err(TextError::StructuralInconsistency(
                    "run reachable more than once".to_string(),
                ));
            }
            out.push(id.clone());
            stack.extend(self.expect_node(id)?.children.iter().rev());
        }
        Ok(out)
    }

    fn for_each_live<F: FnMut(&TextNode)>(&self, mut f: F) {
        let mut stack: Vec<&Id> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            if node.size == 0 {
                continue;
            }
            if !node.deleted {
                f(node);
            }
            stack.extend(node.children.iter().rev());
        }
    }

    /// Live character ranges covering positions `start..end`.
    fn live_spans(&self, start: usize, end: usize) -> Result<Vec<Span>, TextError> {
        let mut spans = Vec::new();
        if start == end {
            return Ok(spans);
        }
        let mut cursor = 0;
        for id in self.ordered_ids()? {
            let node = self.expect_node(&id)?;
            if node.deleted {
                continue;
            }
            let lo = cursor;
            let hi = cursor + node.char_len();
            cursor = hi;
            if hi <= start {
                continue;
            }
            if lo >= end {
                break;
            }
            let from = start.max(lo) - lo;
            let to = end.min(hi) - lo;
            spans.push(Span {
                id: node.id.offset(from),
                len: to - from,
            });
        }
        Ok(spans)
    }

    /// Resolve the character an insert at `loc` follows.
    fn anchor_for(&self, loc: &Loc) -> Result<Option<Id>, TextError> {
        if loc.is_start() {
            return Ok(None);
        }
        if loc.pre && loc.site != ROOT_SITE {
            let id = Id::new(loc.id, loc.site.clone());
            return match self.owner(id.counter, &id.site) {
                Some(_) => Ok(Some(id)),
                None => Err(TextError::MissingNode(id)),
            };
        }
        let pre = self.pos_to_loc(self.loc_to_pos(loc)?, true)?;
        if pre.is_start() {
            Ok(None)
        } else {
            Ok(Some(Id::new(pre.id, pre.site)))
        }
    }

    /// Returns `false` if the run was already present.
    fn integrate_insert(
        &mut self,
        id: &Id,
        after: Option<&Id>,
        text: &str,
        format: &Format,
    ) -> Result<bool, TextError> {
        if self.owner(id.counter, &id.site).is_some() {
            return Ok(false);
        }
        let len = text.chars().count();
        if len == 0 {
            return Err(TextError::EmptyInsert);
        }

        let parent = match after {
            None => None,
            Some(anchor) => {
                let owner = self
                    .owner(anchor.counter, &anchor.site)
                    .ok_or_else(|| TextError::MissingNode(anchor.clone()))?;
                let base = owner.id.clone();
                let split_at = to_usize(anchor.counter - base.counter) + 1;
                if split_at < owner.char_len() {
                    self.split(&base, split_at)?;
                }
                Some(base)
            }
        };

        let siblings = match &parent {
            None => &mut self.roots,
            Some(parent) => &mut self.expect_node_mut(parent)?.children,
        };
        let idx = siblings
            .iter()
            .position(|sibling| sibling < id)
            .unwrap_or(siblings.len());
        siblings.insert(idx, id.clone());

        self.nodes.entry(id.site.clone()).or_default().insert(
            id.counter,
            TextNode {
                id: id.clone(),
                parent: parent.clone(),
                text: text.to_string(),
                format: format.clone(),
                deleted: false,
                children: Vec::new(),
                size: len,
            },
        );
        self.grow(parent, len)?;
        self.max_counter = self.max_counter.max(id.counter + len as u64 - 1);
        Ok(true)
    }

    /// Split the run `base` so its first `at` characters stay in place and
    /// the rest become its only child. Returns the tail's id.
    fn split(&mut self, base: &Id, at: usize) -> Result<Id, TextError> {
        let head = self.expect_node_mut(base)?;
        let byte_at = head
            .text
            .char_indices()
            .nth(at)
            .map(|(i, _)| i)
            .filter(|_| at > 0)
            .ok_or_else(|| {
                TextError::StructuralInconsistency(format!("cannot split {base} at {at}"))
            })?;

        let tail_id = base.offset(at);
        let tail_text = head.text.split_off(byte_at);
        let head_live = if head.deleted { 0 } else { at };
        let tail = TextNode {
            id: tail_id.clone(),
            parent: Some(base.clone()),
            text: tail_text,
            format: head.format.clone(),
            deleted: head.deleted,
            children: std::mem::replace(&mut head.children, vec![tail_id.clone()]),
            size: head.size - head_live,
        };

        for child in &tail.children {
            self.expect_node_mut(child)?.parent = Some(tail_id.clone());
        }
        self.nodes
            .entry(tail_id.site.clone())
            .or_default()
            .insert(tail_id.counter, tail);
        Ok(tail_id)
    }

    fn ensure_covered(&self, span: &Span) -> Result<(), TextError> {
        let mut counter = span.id.counter;
        let end = counter + span.len as u64;
        while counter < end {
            let owner = self
                .owner(counter, &span.id.site)
                .ok_or_else(|| TextError::MissingNode(Id::new(counter, span.id.site.clone())))?;
            counter = owner.id.counter + owner.char_len() as u64;
        }
        Ok(())
    }

    fn delete_span(&mut self, start: &Id, len: usize) -> Result<(), TextError> {
        let mut counter = start.counter;
        let mut remaining = len;
        while remaining > 0 {
            let owner = self
                .owner(counter, &start.site)
                .ok_or_else(|| TextError::MissingNode(Id::new(counter, start.site.clone())))?;
            let offset = to_usize(counter - owner.id.counter);
            let available = owner.char_len() - offset;
            let take = remaining.min(available);

            if !owner.deleted {
                let mut target = owner.id.clone();
                if offset > 0 {
                    target = self.split(&target, offset)?;
                }
                if take < available {
                    self.split(&target, take)?;
                }
                self.mark_deleted(&target)?;
            }

            counter += take as u64;
            remaining -= take;
        }
        Ok(())
    }

    fn mark_deleted(&mut self, id: &Id) -> Result<(), TextError> {
        let node = self.expect_node_mut(id)?;
        if node.deleted {
            return Ok(());
        }
        let own = node.char_len();
        node.deleted = true;
        node.size -= own;
        let parent = node.parent.clone();
        self.shrink(parent, own)
    }

    fn grow(&mut self, mut cursor: Option<Id>, by: usize) -> Result<(), TextError> {
        while let Some(id) = cursor {
            let node = self.expect_node_mut(&id)?;
            node.size += by;
            cursor = node.parent.clone();
        }
        Ok(())
    }

    fn shrink(&mut self, mut cursor: Option<Id>, by: usize) -> Result<(), TextError> {
        while let Some(id) = cursor {
            let node = self.expect_node_mut(&id)?;
            node.size = node.size.checked_sub(by).ok_or_else(|| {
                TextError::StructuralInconsistency(format!("size cache of {id} underflowed"))
            })?;
            cursor = node.parent.clone();
        }
        Ok(())
    }

    fn observe(&mut self, stamp: &Stamp) {
        if *stamp > self.stamp {
            self.stamp = stamp.clone();
        }
    }
}

impl EmbeddedCrdt for TextTree {
    type Delta = TextDelta;
    type Error = TextError;

    fn create(raw: &serde_json::Value, stamp: &Stamp) -> Result<Self, Self::Error> {
        match raw {
            serde_json::Value::String(text) => TextTree::from_text(text, stamp),
            other => Err(TextError::NotText(other.to_string())),
        }
    }

    fn apply(&mut self, delta: &Self::Delta) -> Result<(), Self::Error> {
        self.apply_delta(delta)
    }

    fn merge(&mut self, other: &Self) -> Result<(), Self::Error> {
        TextTree::merge(self, other)
    }

    fn value(&self) -> serde_json::Value {
        serde_json::Value::String(self.text())
    }

    fn latest_stamp(&self) -> Stamp {
        self.stamp.clone()
    }

    fn delta_stamp(delta: &Self::Delta) -> &Stamp {
        delta.stamp()
    }
}

/// Serialized form of a [`TextTree`]; size caches are verified on load.
#[derive(Serialize, Deserialize)]
struct TextTreeRepr {
    roots: Vec<Id>,
    nodes: Vec<TextNode>,
    #[serde(default)]
    stamp: Stamp,
}

impl From<TextTree> for TextTreeRepr {
    fn from(tree: TextTree) -> Self {
        Self {
            roots: tree.roots,
            nodes: tree
                .nodes
                .into_values()
                .flat_map(BTreeMap::into_values)
                .collect(),
            stamp: tree.stamp,
        }
    }
}

impl TryFrom<TextTreeRepr> for TextTree {
    type Error = TextError;

    fn try_from(repr: TextTreeRepr) -> Result<Self, Self::Error> {
        let mut tree = TextTree {
            roots: repr.roots,
            stamp: repr.stamp,
            ..TextTree::default()
        };
        for node in repr.nodes {
            let last = node.id.counter + (node.char_len() as u64).saturating_sub(1);
            tree.max_counter = tree.max_counter.max(last);
            tree.nodes
                .entry(node.id.site.clone())
                .or_default()
                .insert(node.id.counter, node);
        }
        tree.check_invariants()?;
        Ok(tree)
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Errors for text operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// A position outside `0..=len`
    #[error("position {pos} is outside the document (length {len})")]
    PositionOutOfBounds {
        /// Requested position
        pos: usize,
        /// Document length
        len: usize,
    },
    /// A referenced character is not in this replica
    #[error("character {0} is not in the document")]
    MissingNode(Id),
    /// Size caches or links are corrupt
    #[error("structural inconsistency: {0}")]
    StructuralInconsistency(String),
    /// Inserts must carry text
    #[error("cannot insert empty text")]
    EmptyInsert,
    /// The sentinel site cannot mint ids
    #[error("site '{ROOT_SITE}' is reserved")]
    ReservedSite,
    /// The stamp does not name a site
    #[error("stamp {0} does not name a site")]
    InvalidStamp(Stamp),
    /// Embedded text must be created from a string
    #[error("expected a string, found {0}")]
    NotText(String),
}
