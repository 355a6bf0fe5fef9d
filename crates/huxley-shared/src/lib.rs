//! Wire protocol for the Huxley chat server.
//!
//! Every frame on the wire is a 4-byte big-endian payload length followed
//! by a UTF-8 JSON object, capped at 64 KiB. This crate holds the framing
//! helpers, the inbound [`protocol::Command`] parser, and the outbound
//! [`protocol::Response`] envelope, shared between the server and client
//! tooling.

pub mod constants;
pub mod framing;
pub mod protocol;

mod error;

pub use error::FrameError;
