//! Service bootstrap, listen socket, accept loop, orderly shutdown.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use huxley_store::Database;

use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::crypto::CryptoEngine;
use crate::error::Result;
use crate::router::MessageRouter;
use crate::status::{ServerState, StatusIndicator};
use crate::worker::{Services, Worker, WorkerHandle};

const LISTEN_BACKLOG: i32 = 1024;

pub struct HuxleyServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
    listener: Option<Arc<TcpListener>>,
    accept_thread: Option<JoinHandle<()>>,
    workers: Vec<Worker>,
    port: u16,
}

impl HuxleyServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            listener: None,
            accept_thread: None,
            workers: Vec::new(),
            port: 0,
        }
    }

    /// The bound TCP port, meaningful once `start` has returned. Binding
    /// port 0 picks an ephemeral port, which the tests rely on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bring up persistence, crypto, auth, and routing, bind the listen
    /// socket, start the worker pool, and launch the accept thread.
    /// Initialization failures tear down whatever already started.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.start_inner() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.running.store(false, Ordering::Release);
                self.teardown();
                Err(err)
            }
        }
    }

    fn start_inner(&mut self) -> Result<()> {
        let status = Arc::new(StatusIndicator::new());
        status.set_state(ServerState::Booting);

        let db = Arc::new(Database::open(&self.config.database_path)?);
        let crypto = Arc::new(CryptoEngine::from_key_files(
            &self.config.master_key_path,
            &self.config.session_key_path,
        )?);
        let auth = Arc::new(AuthManager::new(Arc::clone(&db)));
        let router = Arc::new(MessageRouter::new(Arc::clone(&db), Arc::clone(&crypto)));
        let services = Services {
            db,
            crypto,
            auth,
            router,
            status: Arc::clone(&status),
        };

        let listener = Arc::new(bind_listener(self.config.port)?);
        self.port = listener.local_addr()?.port();

        for id in 0..self.config.workers.max(1) {
            self.workers.push(Worker::start(id, services.clone())?);
        }

        let accept = AcceptLoop {
            listener: Arc::clone(&listener),
            running: Arc::clone(&self.running),
            handles: self.workers.iter().map(|w| Arc::clone(w.handle())).collect(),
        };
        let accept_thread = thread::Builder::new()
            .name("huxley-accept".to_string())
            .spawn(move || accept.run())?;

        self.listener = Some(listener);
        self.accept_thread = Some(accept_thread);

        status.set_state(ServerState::Operational);
        tracing::info!(
            port = self.port,
            workers = self.workers.len(),
            "server listening"
        );
        Ok(())
    }

    /// Cooperative shutdown: unblock the acceptor, join it, stop every
    /// worker (closing the sockets they own), then drop services in
    /// reverse construction order.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(listener) = &self.listener {
            if let Err(err) = SockRef::from(listener.as_ref()).shutdown(Shutdown::Both) {
                tracing::debug!(error = %err, "listener shutdown failed");
            }
        }
        if let Some(thread) = self.accept_thread.take() {
            if thread.join().is_err() {
                tracing::error!("accept thread panicked");
            }
        }

        self.teardown();
        tracing::info!("server stopped");
    }

    fn teardown(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
        self.workers.clear();
        self.listener = None;
    }
}

impl Drop for HuxleyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptLoop {
    listener: Arc<TcpListener>,
    running: Arc<AtomicBool>,
    handles: Vec<Arc<WorkerHandle>>,
}

impl AcceptLoop {
    fn run(self) {
        let mut next_worker = 0usize;

        while self.running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, worker = next_worker, "connection accepted");
                    self.handles[next_worker].assign_client(stream);
                    next_worker = (next_worker + 1) % self.handles.len();
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    if !self.running.load(Ordering::Acquire) {
                        // listener was shut down during stop
                        break;
                    }
                    tracing::warn!(error = %err, "accept failed");
                }
            }
        }
    }
}

fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
