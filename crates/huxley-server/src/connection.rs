//! Per-socket connection state.
//!
//! Each connection is owned by exactly one worker: the receive buffer and
//! socket live in that worker's connection table and no other thread ever
//! touches them. What this module holds is the shared half -- identity,
//! the outbound deque behind its own mutex, and the notifier capability
//! used to tell the owning worker that bytes are ready to send. The
//! notifier is a trait object so connection state carries no static
//! dependency on the worker type.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mio::Token;
use parking_lot::Mutex;

use huxley_shared::framing;
use huxley_shared::protocol::{self, Response};

/// Capability for waking the worker that owns a connection once outbound
/// data has been queued.
pub trait OutboundNotifier: Send + Sync {
    fn on_outbound_ready(&self, token: Token);
}

pub struct ClientState {
    token: Token,
    notifier: Arc<dyn OutboundNotifier>,
    authenticated: AtomicBool,
    username: Mutex<String>,
    last_activity: AtomicU64,
    outbound: Mutex<VecDeque<Vec<u8>>>,
}

impl ClientState {
    pub fn new(token: Token, notifier: Arc<dyn OutboundNotifier>) -> Self {
        Self {
            token,
            notifier,
            authenticated: AtomicBool::new(false),
            username: Mutex::new(String::new()),
            last_activity: AtomicU64::new(unix_now()),
            outbound: Mutex::new(VecDeque::new()),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Owning worker only.
    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::Release);
    }

    pub fn username(&self) -> String {
        self.username.lock().clone()
    }

    /// Owning worker only.
    pub fn set_username(&self, name: &str) {
        *self.username.lock() = name.to_string();
    }

    /// Owning worker only; stamped on every successful read.
    pub fn update_activity(&self) {
        self.last_activity.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Append raw bytes to the outbound deque and wake the owning worker.
    /// Safe from any thread.
    pub fn queue_response(&self, bytes: Vec<u8>) {
        self.outbound.lock().push_back(bytes);
        self.notifier.on_outbound_ready(self.token);
    }

    /// Wrap the payload in its 4-byte big-endian length header, then queue.
    pub fn queue_framed_response(&self, payload: &[u8]) {
        self.queue_response(framing::frame(payload));
    }

    /// Serialize through the codec, then frame and queue.
    pub fn queue_protocol_response(&self, response: &Response) {
        self.queue_framed_response(protocol::serialize_response(response).as_bytes());
    }

    /// Enqueue a server-initiated chat delivery frame.
    pub fn queue_incoming_message(
        &self,
        sender: &str,
        content: &str,
        timestamp: Option<&str>,
        id: Option<i64>,
    ) {
        self.queue_protocol_response(&Response::incoming_message(sender, content, timestamp, id));
    }

    /// Return the unsent suffix of a partial write to the head of the
    /// deque. Owning worker only.
    pub fn push_front_response(&self, bytes: Vec<u8>) {
        self.outbound.lock().push_front(bytes);
    }

    /// Drain the next ready chunk. Owning worker only.
    pub fn pop_queued_response(&self) -> Option<Vec<u8>> {
        self.outbound.lock().pop_front()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
