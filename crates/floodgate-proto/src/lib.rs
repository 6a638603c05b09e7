//! Wire protocol shared by floodgate feed servers and clients.
//!
//! This crate provides:
//! - The message type catalog ([`types`])
//! - Frame encoding and tag splitting ([`codec`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod types;

pub use codec::{encode, split_frame, CodecError};
pub use types::MessageType;
