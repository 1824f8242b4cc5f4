//! Wire types and the message-set codec for the fetch engine.
//!
//! Request and response bodies are plain typed structs handed to the
//! `BrokerClient` seam; only the message set has a byte-level encoding,
//! because CRC validation and nested compression containers operate on the
//! encoded form.

pub mod error;
pub mod fetch;
pub mod list_offsets;
pub mod message;

pub use error::ErrorCode;
pub use fetch::*;
pub use list_offsets::*;
pub use message::*;
