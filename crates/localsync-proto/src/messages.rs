//! Protocol messages for delta synchronization.

use localsync_core::{Crdt, DeltaOps, Stamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A delta addressed to one document of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDelta<D> {
    /// Document identifier
    pub node: String,
    /// The change
    pub delta: D,
}

impl<D> NodeDelta<D> {
    /// Address `delta` to document `node`.
    #[must_use]
    pub fn new(node: impl Into<String>, delta: D) -> Self {
        Self {
            node: node.into(),
            delta,
        }
    }
}

/// Messages sent from a client session to the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", bound = "")]
pub enum ClientMessage<C: Crdt> {
    /// Deltas the client already applied locally
    Delta {
        /// Collection name
        collection: String,
        /// Ordered deltas
        deltas: Vec<NodeDelta<C::Delta>>,
    },
    /// Ask for every document of a collection
    RequestFull {
        /// Collection name
        collection: String,
    },
}

impl<C: Crdt> ClientMessage<C> {
    /// Collection the message is scoped to.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            ClientMessage::Delta { collection, .. } | ClientMessage::RequestFull { collection } => {
                collection
            }
        }
    }

    /// Highest stamp carried by the message.
    #[must_use]
    pub fn max_stamp(&self) -> Option<Stamp> {
        match self {
            ClientMessage::Delta { deltas, .. } => max_delta_stamp::<C>(deltas),
            ClientMessage::RequestFull { .. } => None,
        }
    }
}

/// Messages sent from the authority to a client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", bound = "")]
pub enum ServerMessage<C: Crdt> {
    /// Deltas produced by other clients
    Sync {
        /// Collection name
        collection: String,
        /// Ordered deltas
        deltas: Vec<NodeDelta<C::Delta>>,
    },
    /// Full snapshots of a collection
    Full {
        /// Collection name
        collection: String,
        /// Document id to state
        data: BTreeMap<String, C>,
    },
}

impl<C: Crdt> ServerMessage<C> {
    /// Collection the message is scoped to.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            ServerMessage::Sync { collection, .. } | ServerMessage::Full { collection, .. } => {
                collection
            }
        }
    }

    /// Highest stamp carried by the message.
    #[must_use]
    pub fn max_stamp(&self) -> Option<Stamp> {
        match self {
            ServerMessage::Sync { deltas, .. } => max_delta_stamp::<C>(deltas),
            ServerMessage::Full { data, .. } => data.values().map(Crdt::latest_stamp).max(),
        }
    }
}

/// Highest stamp among `deltas`, `None` for an empty batch.
#[must_use]
pub fn max_delta_stamp<C: Crdt>(deltas: &[NodeDelta<C::Delta>]) -> Option<Stamp> {
    deltas.iter().map(|d| d.delta.stamp()).max()
}

/// CBOR and JSON encodings shared by every wire message.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON text.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    fn from_json(text: &str) -> Result<Self, MessageError> {
        serde_json::from_str(text).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

impl<C: Crdt> WireMessage for ClientMessage<C> {}
impl<C: Crdt> WireMessage for ServerMessage<C> {}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}
