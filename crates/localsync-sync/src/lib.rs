//! # localsync sync
//!
//! Delta synchronization between client replicas and an authority replica.
//!
//! This crate provides:
//! - [`ClientSession`]: local collections, queued deltas and change listeners
//! - [`Authority`]: the server-held replica backed by a [`Store`]
//! - [`Transport`] and [`ChannelTransport`] for moving message batches
//! - [`AuthorityRuntime`]: a tokio task routing messages in process

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod authority;
pub mod client;
pub mod config;
pub mod error;
pub mod runtime;
pub mod store;
pub mod transport;

pub use authority::{Authority, Outgoing};
pub use client::{Change, ChangeListener, ClientSession, Collection, ItemListener, ListenerId};
pub use config::SessionConfig;
pub use error::{Result, SyncError};
pub use runtime::{AuthorityRuntime, ClientLink};
pub use store::{MemoryLoader, MemoryStore, Store, StoreError, StoreLoader};
pub use transport::{ChannelTransport, Envelope, SessionId, Transport, TransportError};
