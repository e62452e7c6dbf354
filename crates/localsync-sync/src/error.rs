//! Error types for sync operations.

use crate::store::StoreError;
use crate::transport::TransportError;
use localsync_core::{ClockError, SchemaError};

/// Error type for client sessions and the authority.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Invalid session configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A document refused a delta or snapshot
    #[error("document {collection}/{id} rejected change")]
    Document {
        /// Collection name
        collection: String,
        /// Document id
        id: String,
        /// Underlying CRDT error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No document with this id exists locally
    #[error("unknown document {collection}/{id}")]
    UnknownDocument {
        /// Collection name
        collection: String,
        /// Document id
        id: String,
    },

    /// Raw data does not match the collection schema
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A received stamp could not be read
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// The store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transport failed; queued deltas are kept
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SyncError {
    pub(crate) fn document<E>(collection: &str, id: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::Document {
            collection: collection.to_string(),
            id: id.to_string(),
            source: Box::new(err),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
