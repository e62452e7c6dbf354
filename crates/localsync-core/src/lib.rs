//! # localsync core
//!
//! Replicated data types and clocks for local-first sync.
//!
//! This crate provides:
//! - Hybrid Logical Clock (HLC) producing totally ordered, packed stamps
//! - A tree-structured rich-text CRDT with stable position anchors
//! - A nested-object CRDT with per-field conflict resolution
//! - Collection schemas mapping fields to merge policies
//! - A single-document replica tying a value to its clock

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crdt;
pub mod document;
pub mod hlc;
pub mod schema;
pub mod text;
pub mod value;

pub use crdt::{Crdt, DeltaOps, EmbeddedCrdt, LwwRegister};
pub use document::{Replica, ReplicaError};
pub use hlc::{ClockError, Hlc, Stamp, Timestamp};
pub use schema::{FieldPath, MergePolicy, Schema, SchemaError};
pub use text::{Id, Loc, TextDelta, TextError, TextTree};
pub use value::{Kind, NestedValue, ValueDelta, ValueError};
