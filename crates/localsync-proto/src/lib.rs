//! # localsync Protocol
//!
//! Wire messages exchanged between client sessions and the authority.
//!
//! ## Messages
//!
//! - `ClientMessage::Delta`: deltas a client applied locally
//! - `ClientMessage::RequestFull`: ask for every document of a collection
//! - `ServerMessage::Sync`: deltas other clients produced
//! - `ServerMessage::Full`: full snapshots of a collection
//!
//! Messages are collection-scoped and tagged by a `type` field. Both CBOR
//! and JSON encodings are supported through [`WireMessage`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;

pub use messages::{
    max_delta_stamp, ClientMessage, MessageError, NodeDelta, ServerMessage, WireMessage,
};
