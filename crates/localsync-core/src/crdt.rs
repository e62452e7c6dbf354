//! CRDT primitives and the implementation contract used by sync code.
//!
//! Storage and transport code never looks inside a replicated value. It goes
//! through [`Crdt`] (create, apply, merge, materialize) and [`DeltaOps`]
//! (build and inspect deltas). Values that embed a second CRDT, such as rich
//! text inside a record, reach it through [`EmbeddedCrdt`].

use crate::hlc::Stamp;
use crate::schema::Schema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A Last-Writer-Wins register holding a value with a stamp.
///
/// Merge always takes the value with the higher stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    /// The stored value
    pub value: T,
    /// Stamp of the last write
    pub stamp: Stamp,
}

impl<T: Clone> LwwRegister<T> {
    /// Create a new register with an initial value.
    #[must_use]
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    /// Update the register value if the new stamp is higher.
    ///
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    /// Merge with another register, keeping the value with the higher stamp.
    ///
    /// Equal stamps denote the same write; `on_tie` may combine the two
    /// copies (e.g. two replicas of one embedded CRDT).
    pub fn merge_with<F>(&mut self, other: &Self, on_tie: F)
    where
        F: FnOnce(&mut T, &T),
    {
        if other.stamp > self.stamp {
            self.value = other.value.clone();
            self.stamp = other.stamp.clone();
        } else if other.stamp == self.stamp {
            on_tie(&mut self.value, &other.value);
        }
    }

    /// Merge with another register, keeping the value with the higher stamp.
    pub fn merge(&mut self, other: &Self) {
        self.merge_with(other, |_, _| {});
    }
}

/// Constructors and inspectors for the delta type of a [`Crdt`].
pub trait DeltaOps<V>: Clone + Debug + Serialize + DeserializeOwned {
    /// Write `value` at `path` (empty path = whole value).
    fn set(path: Vec<String>, value: V) -> Self;
    /// Remove whatever is at `path`.
    fn remove_at(path: Vec<String>, stamp: Stamp) -> Self;
    /// Remove the whole value.
    fn remove(stamp: Stamp) -> Self;
    /// The highest stamp carried by the delta.
    fn stamp(&self) -> Stamp;
}

/// The CRDT implementation contract.
///
/// Every operation is deterministic; `apply_delta` and `merge` are
/// commutative and idempotent so deltas may be re-delivered in any order.
pub trait Crdt: Clone + Debug + Serialize + DeserializeOwned {
    /// The delta type shipped between replicas.
    type Delta: DeltaOps<Self>;
    /// Error raised by structurally invalid input.
    type Error: std::error::Error + Send + Sync + 'static;

    /// A value nobody has written to yet.
    fn create_empty() -> Self;

    /// Build a value from plain data, shaped by `schema`.
    ///
    /// `stamp` stamps the outermost container; every nested field is stamped
    /// by a fresh call to `stamp_gen`.
    ///
    /// # Errors
    ///
    /// Returns error if `raw` does not match `schema`.
    fn create_with_schema(
        raw: &serde_json::Value,
        stamp: &Stamp,
        stamp_gen: &mut dyn FnMut() -> Stamp,
        schema: &Schema,
    ) -> Result<Self, Self::Error>;

    /// Build a value where every JSON object becomes a mergeable map.
    fn create_deep_map(raw: &serde_json::Value, stamp: &Stamp) -> Self;

    /// Build a value that is replaced as a whole on conflict.
    fn create_value(raw: &serde_json::Value, stamp: &Stamp) -> Self;

    /// Apply a delta.
    ///
    /// # Errors
    ///
    /// Returns error if the delta references structure this replica lacks.
    fn apply_delta(&mut self, delta: &Self::Delta) -> Result<(), Self::Error>;

    /// Merge a full snapshot of another replica into this one.
    ///
    /// # Errors
    ///
    /// Returns error if either side is structurally corrupt.
    fn merge(&mut self, other: &Self) -> Result<(), Self::Error>;

    /// Materialize into plain data; `None` if nothing survives.
    fn value(&self) -> Option<serde_json::Value>;

    /// Highest stamp anywhere in the value ([`Stamp::zero`] if none).
    fn latest_stamp(&self) -> Stamp;
}

/// Capability interface for a CRDT embedded inside a structured value.
pub trait EmbeddedCrdt: Clone + Debug + PartialEq + Serialize + DeserializeOwned {
    /// Delta type of the embedded CRDT.
    type Delta: Clone + Debug + PartialEq + Serialize + DeserializeOwned;
    /// Error raised by the embedded CRDT.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Build from plain data; identifiers are minted for `stamp`'s site.
    ///
    /// # Errors
    ///
    /// Returns error if `raw` has the wrong shape.
    fn create(raw: &serde_json::Value, stamp: &Stamp) -> Result<Self, Self::Error>;

    /// Apply an embedded delta.
    ///
    /// # Errors
    ///
    /// Returns error if the delta cannot be applied.
    fn apply(&mut self, delta: &Self::Delta) -> Result<(), Self::Error>;

    /// Merge another replica of the same embedded value.
    ///
    /// # Errors
    ///
    /// Returns error if either side is structurally corrupt.
    fn merge(&mut self, other: &Self) -> Result<(), Self::Error>;

    /// Materialize into plain data.
    fn value(&self) -> serde_json::Value;

    /// Highest stamp observed by this value.
    fn latest_stamp(&self) -> Stamp;

    /// Stamp carried by an embedded delta.
    fn delta_stamp(delta: &Self::Delta) -> &Stamp;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlc::Timestamp;

    fn make_stamp(physical: u64, logical: u32, site: &str) -> Stamp {
        Timestamp {
            physical_ms: physical,
            logical,
            site: site.to_string(),
        }
        .pack()
    }

    #[test]
    fn lww_register_higher_stamp_wins() {
        let t1 = make_stamp(1000, 0, "a");
        let t2 = make_stamp(2000, 0, "a");

        let mut reg = LwwRegister::new(10, t1.clone());
        assert_eq!(reg.value, 10);

        assert!(reg.set(20, t2));
        assert_eq!(reg.value, 20);

        // Earlier stamp should not update
        assert!(!reg.set(5, t1));
        assert_eq!(reg.value, 20);
    }

    #[test]
    fn lww_register_merge_is_symmetric() {
        let a = LwwRegister::new("soup", make_stamp(1000, 0, "a"));
        let b = LwwRegister::new("stew", make_stamp(1000, 0, "b"));

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.value, "stew");
    }

    #[test]
    fn lww_register_tie_callback() {
        let stamp = make_stamp(1000, 0, "a");
        let mut a = LwwRegister::new(vec![1], stamp.clone());
        let b = LwwRegister::new(vec![2], stamp);

        a.merge_with(&b, |mine, theirs| mine.extend_from_slice(theirs));

        assert_eq!(a.value, vec![1, 2]);
    }
}
