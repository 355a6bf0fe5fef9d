//! Worker reactor: one thread per shard of connections.
//!
//! All socket I/O, framing, and command dispatch for a connection happen on
//! the single worker that owns it, multiplexed over a `mio::Poll`. Other
//! threads reach a worker only through its handle: the acceptor pushes
//! fresh sockets onto the pending list, and whoever queues outbound bytes
//! flags the connection for write interest. Both paths go through the
//! mailbox mutex and then wake the poll, so the reactor itself is the only
//! thread that ever touches a registration or a socket.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use huxley_shared::framing;
use huxley_shared::protocol::{self, Command, Response};
use huxley_store::{AuditLevel, Database};

use crate::auth::AuthManager;
use crate::connection::{ClientState, OutboundNotifier};
use crate::crypto::CryptoEngine;
use crate::offline;
use crate::router::MessageRouter;
use crate::status::{ServerState, StatusIndicator};

const WAKER_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 64;
const READ_CHUNK: usize = 4096;

/// Shared service handles every worker dispatches against.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub crypto: Arc<CryptoEngine>,
    pub auth: Arc<AuthManager>,
    pub router: Arc<MessageRouter>,
    pub status: Arc<StatusIndicator>,
}

#[derive(Default)]
struct Mailbox {
    /// Sockets handed off by the acceptor, not yet registered.
    pending: Vec<std::net::TcpStream>,
    /// Connections whose outbound deque gained data.
    write_ready: Vec<Token>,
}

/// The cross-thread face of a worker.
pub struct WorkerHandle {
    id: usize,
    running: AtomicBool,
    waker: Waker,
    mailbox: Mutex<Mailbox>,
}

impl WorkerHandle {
    /// Hand a freshly accepted socket to this worker. If the worker has
    /// already stopped the socket is closed outright.
    pub fn assign_client(&self, stream: std::net::TcpStream) {
        if !self.running.load(Ordering::Acquire) {
            drop(stream);
            return;
        }
        self.mailbox.lock().pending.push(stream);
        self.wake();
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!(worker = self.id, error = %err, "worker wakeup failed");
        }
    }
}

impl OutboundNotifier for WorkerHandle {
    /// Arm write interest for `token`. Callable from any thread; the
    /// reactor applies the registration change itself on the next pass.
    fn on_outbound_ready(&self, token: Token) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.mailbox.lock().write_ready.push(token);
        self.wake();
    }
}

pub struct Worker {
    handle: Arc<WorkerHandle>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Create the demultiplexer and the wakeup handle, then spin up the
    /// event loop thread. Once this returns the worker accepts
    /// assignments.
    pub fn start(id: usize, services: Services) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        let handle = Arc::new(WorkerHandle {
            id,
            running: AtomicBool::new(true),
            waker,
            mailbox: Mutex::new(Mailbox::default()),
        });

        let reactor_handle = Arc::clone(&handle);
        let thread = thread::Builder::new()
            .name(format!("huxley-worker-{id}"))
            .spawn(move || {
                let mut reactor = Reactor {
                    id,
                    poll,
                    handle: reactor_handle,
                    services,
                    connections: HashMap::new(),
                    next_token: WAKER_TOKEN.0 + 1,
                };
                reactor.run();
            })?;

        tracing::debug!(worker = id, "worker started");
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &Arc<WorkerHandle> {
        &self.handle
    }

    /// Cooperative stop: flip the flag, wake the loop, join the thread.
    /// The reactor closes every owned socket on the way out.
    pub fn stop(&mut self) {
        if self.handle.running.swap(false, Ordering::AcqRel) {
            self.handle.wake();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = self.handle.id, "worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A connection as the owning worker sees it: the socket, the inbound
/// buffer nobody else may touch, and the shared state the router holds.
struct Connection {
    stream: TcpStream,
    recv_buffer: Vec<u8>,
    state: Arc<ClientState>,
    write_interest: bool,
}

struct Reactor {
    id: usize,
    poll: Poll,
    handle: Arc<WorkerHandle>,
    services: Services,
    connections: HashMap<Token, Connection>,
    next_token: usize,
}

impl Reactor {
    fn run(&mut self) {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        while self.handle.running.load(Ordering::Acquire) {
            self.drain_mailbox();

            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(worker = self.id, error = %err, "poll failed");
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN {
                    // the wakeup itself is the signal; mailbox is drained
                    // at the top of the loop
                    continue;
                }
                if !self.connections.contains_key(&token) {
                    continue;
                }

                if event.is_error() || event.is_read_closed() {
                    self.close_client(token);
                    continue;
                }
                if event.is_readable() {
                    self.handle_read(token);
                }
                if event.is_writable() {
                    self.handle_write(token);
                }
            }
        }

        self.shutdown();
    }

    /// Step one of every loop pass: adopt sockets from the acceptor and
    /// apply deferred write-interest changes.
    fn drain_mailbox(&mut self) {
        let (pending, write_ready) = {
            let mut mailbox = self.handle.mailbox.lock();
            (
                std::mem::take(&mut mailbox.pending),
                std::mem::take(&mut mailbox.write_ready),
            )
        };

        for stream in pending {
            self.register_client(stream);
        }
        for token in write_ready {
            self.arm_write_interest(token);
        }
    }

    fn register_client(&mut self, stream: std::net::TcpStream) {
        if let Err(err) = stream.set_nonblocking(true) {
            tracing::warn!(worker = self.id, error = %err, "set_nonblocking failed; dropping socket");
            return;
        }
        let mut stream = TcpStream::from_std(stream);

        let token = Token(self.next_token);
        self.next_token += 1;

        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            tracing::warn!(worker = self.id, error = %err, "socket registration failed");
            return;
        }

        let notifier: Arc<dyn OutboundNotifier> = Arc::clone(&self.handle) as _;
        let state = Arc::new(ClientState::new(token, notifier));
        self.connections.insert(
            token,
            Connection {
                stream,
                recv_buffer: Vec::new(),
                state,
                write_interest: false,
            },
        );

        tracing::debug!(worker = self.id, token = token.0, "client assigned");
    }

    fn arm_write_interest(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if conn.write_interest {
            return;
        }
        if self
            .poll
            .registry()
            .reregister(
                &mut conn.stream,
                token,
                Interest::READABLE | Interest::WRITABLE,
            )
            .is_ok()
        {
            conn.write_interest = true;
        }
    }

    fn clear_write_interest(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if !conn.write_interest {
            return;
        }
        if self
            .poll
            .registry()
            .reregister(&mut conn.stream, token, Interest::READABLE)
            .is_ok()
        {
            conn.write_interest = false;
        }
    }

    /// Pump the socket dry, then carve complete frames out of the inbound
    /// buffer and dispatch them.
    fn handle_read(&mut self, token: Token) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut open = true;

        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            loop {
                match conn.stream.read(&mut chunk) {
                    Ok(0) => {
                        open = false;
                        break;
                    }
                    Ok(n) => {
                        conn.recv_buffer.extend_from_slice(&chunk[..n]);
                        conn.state.update_activity();
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        open = false;
                        break;
                    }
                }
            }
        }

        if !open {
            self.close_client(token);
            return;
        }

        loop {
            let frame = {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return;
                };
                match framing::next_frame(&mut conn.recv_buffer) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!(worker = self.id, token = token.0, error = %err, "closing connection");
                        self.close_client(token);
                        return;
                    }
                }
            };
            let command = protocol::parse_command(&frame);
            self.process_command(token, command);
        }
    }

    /// Flush the outbound deque. A partial write pushes the unsent suffix
    /// back to the head and leaves write interest armed for the next
    /// writable event.
    fn handle_write(&mut self, token: Token) {
        let mut close = false;
        let mut drained = false;

        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            'queue: loop {
                let Some(message) = conn.state.pop_queued_response() else {
                    drained = true;
                    break;
                };
                let mut sent = 0;
                while sent < message.len() {
                    match conn.stream.write(&message[sent..]) {
                        Ok(0) => {
                            close = true;
                            break 'queue;
                        }
                        Ok(n) => sent += n,
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                            conn.state.push_front_response(message[sent..].to_vec());
                            break 'queue;
                        }
                        Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => {
                            close = true;
                            break 'queue;
                        }
                    }
                }
            }
        }

        if close {
            self.close_client(token);
            return;
        }
        if drained {
            self.clear_write_interest(token);
        }
    }

    fn process_command(&mut self, token: Token, command: Command) {
        let Some(state) = self.connections.get(&token).map(|c| Arc::clone(&c.state)) else {
            return;
        };
        let Services {
            db,
            crypto,
            auth,
            router,
            status,
        } = &self.services;

        let response = match command {
            Command::Register { username, password } => {
                let ok = auth.register_user(&username, &password);
                Response::result(
                    "register",
                    ok,
                    if ok { "Registered" } else { "Registration failed" },
                )
            }
            Command::Login { username, password } => {
                if state.authenticated() {
                    Response::result("login", false, "Already logged in")
                } else if auth.login_user(&username, &password) {
                    if router.is_registered(&username) {
                        // the other connection keeps its session
                        Response::result("login", false, "User already logged in elsewhere")
                    } else {
                        state.set_authenticated(true);
                        state.set_username(&username);
                        router.register_client(&username, Arc::clone(&state));
                        offline::deliver_queued_messages(db, crypto, &username, &state);
                        status.set_state(ServerState::Operational);
                        Response::result("login", true, "Login successful")
                    }
                } else {
                    Response::result("login", false, "Invalid credentials")
                }
            }
            Command::SendMessage { recipient, content } => {
                if !state.authenticated() {
                    Response::result("send_message", false, "Authentication required")
                } else if recipient.is_empty() {
                    Response::result("send_message", false, "Missing recipient")
                } else {
                    let sender = state.username();
                    let ok = router.route_message(&sender, &recipient, &content);
                    Response::result(
                        "send_message",
                        ok,
                        if ok { "Message queued" } else { "Delivery failed" },
                    )
                }
            }
            Command::Logout => {
                if state.authenticated() {
                    let username = state.username();
                    router.unregister_client(&username);
                    auth.logout_user(&username);
                    state.set_authenticated(false);
                    state.set_username("");
                    Response::result("logout", true, "Logged out")
                } else {
                    Response::result("logout", false, "Not authenticated")
                }
            }
            Command::ListUsers => {
                if !state.authenticated() {
                    Response::result("list_users", false, "Authentication required")
                } else {
                    match router.list_users() {
                        Some(payload) => {
                            Response::result("list_users", true, "OK").with_payload(payload)
                        }
                        None => Response::result("list_users", false, "Lookup failed"),
                    }
                }
            }
            Command::ListOnline => {
                if !state.authenticated() {
                    Response::result("list_online", false, "Authentication required")
                } else {
                    Response::result("list_online", true, "OK").with_payload(router.list_online())
                }
            }
            Command::GetHistory {
                target,
                limit,
                offset,
            } => {
                if !state.authenticated() {
                    Response::result("get_history", false, "Authentication required")
                } else if target.is_empty() {
                    Response::result("get_history", false, "Missing target")
                } else {
                    let user = state.username();
                    match router.conversation_history(&user, &target, limit, offset) {
                        Some(payload) => {
                            Response::result("get_history", true, "OK").with_payload(payload)
                        }
                        None => Response::result("get_history", false, "Unknown user"),
                    }
                }
            }
            Command::Unknown => Response::result("unknown", false, "Unknown command"),
        };

        state.queue_protocol_response(&response);
    }

    /// Tear down one connection: drop presence first, then the socket.
    /// Never called from outside the owning worker.
    fn close_client(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };

        if conn.state.authenticated() {
            let username = conn.state.username();
            self.services.router.unregister_client(&username);
            self.services.auth.logout_user(&username);
            self.services.db.log_activity(
                AuditLevel::Info,
                &format!("User disconnected: {username}"),
            );
        }

        if let Err(err) = self.poll.registry().deregister(&mut conn.stream) {
            tracing::debug!(worker = self.id, error = %err, "deregister failed");
        }
        tracing::debug!(worker = self.id, token = token.0, "client closed");
        // dropping the stream closes the fd
    }

    fn shutdown(&mut self) {
        // also covers the poll-error exit path, so assignment attempts
        // against a dead worker close their socket instead of queueing
        self.handle.running.store(false, Ordering::Release);

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close_client(token);
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }
}
