//! Huxley chat server runtime.
//!
//! Authenticated clients hold persistent TCP sessions and exchange
//! length-framed JSON commands. Messages to online peers are delivered in
//! real time; everything else is stored encrypted at rest and replayed the
//! next time the recipient logs in. The daemon is a shard of single-thread
//! reactors behind one blocking acceptor; see [`server::HuxleyServer`].

pub mod auth;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod offline;
pub mod router;
pub mod server;
pub mod status;
pub mod worker;

mod error;

pub use error::{Result, ServerError};
