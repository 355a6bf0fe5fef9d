//! End-to-end scenarios over real TCP sockets: a full server per test on
//! an ephemeral port, driven by a minimal framed-JSON client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use serde_json::{json, Value};

use huxley_server::config::ServerConfig;
use huxley_server::server::HuxleyServer;

const MASTER_KEY: [u8; 32] = [3u8; 32];
const SESSION_KEY: [u8; 32] = [9u8; 32];

struct TestServer {
    _dir: tempfile::TempDir,
    server: HuxleyServer,
    db_path: PathBuf,
}

impl TestServer {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let master_path = dir.path().join("master.key");
        let session_path = dir.path().join("session.key.enc");
        let db_path = dir.path().join("huxley.db");

        std::fs::write(&master_path, MASTER_KEY).unwrap();
        std::fs::write(&session_path, seal_session_key()).unwrap();

        let mut server = HuxleyServer::new(ServerConfig {
            port: 0,
            workers: 2,
            database_path: db_path.clone(),
            master_key_path: master_path,
            session_key_path: session_path,
        });
        server.start().expect("server should start");

        Self {
            _dir: dir,
            server,
            db_path,
        }
    }

    fn client(&self) -> TestClient {
        TestClient::connect(self.server.port())
    }

    /// Second connection into the same database file, for assertions and
    /// fault injection. WAL mode keeps this safe alongside the server.
    fn db(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(&self.db_path).unwrap()
    }
}

/// What the key-provisioning utility writes: a 24-byte nonce followed by
/// the session key sealed under the master key.
fn seal_session_key() -> Vec<u8> {
    let nonce = [0x42u8; 24];
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&MASTER_KEY));
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), SESSION_KEY.as_slice())
        .unwrap();

    let mut blob = nonce.to_vec();
    blob.extend_from_slice(&sealed);
    blob
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        Self { stream }
    }

    fn send(&mut self, payload: Value) {
        let body = payload.to_string().into_bytes();
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&body);
        self.stream.write_all(&frame).unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Read one frame; `None` on timeout or a closed connection.
    fn read_frame_with_timeout(&mut self, timeout: Duration) -> Option<Value> {
        self.stream.set_read_timeout(Some(timeout)).unwrap();

        let mut header = [0u8; 4];
        if self.stream.read_exact(&mut header).is_err() {
            return None;
        }
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        if self.stream.read_exact(&mut body).is_err() {
            return None;
        }
        Some(serde_json::from_slice(&body).expect("frames carry valid JSON"))
    }

    fn expect_frame(&mut self) -> Value {
        self.read_frame_with_timeout(Duration::from_secs(5))
            .expect("expected a response frame")
    }

    fn register(&mut self, user: &str, password: &str) -> Value {
        self.send(json!({"type": "REGISTER", "username": user, "password": password}));
        self.expect_frame()
    }

    fn login(&mut self, user: &str, password: &str) -> Value {
        self.send(json!({"type": "LOGIN", "username": user, "password": password}));
        self.expect_frame()
    }
}

#[test]
fn register_and_login() {
    let ts = TestServer::start();
    let mut alice = ts.client();

    let reply = alice.register("alice", "pw1");
    assert_eq!(reply["command"], "register");
    assert_eq!(reply["success"], true);

    let reply = alice.login("alice", "pw1");
    assert_eq!(reply["command"], "login");
    assert_eq!(reply["success"], true);

    let db = ts.db();
    let (count, hash): (i64, String) = db
        .query_row(
            "SELECT COUNT(*), MAX(password_hash) FROM users WHERE username = 'alice'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(count, 1);
    assert!(hash.starts_with("$argon2id$"));
}

#[test]
fn duplicate_registration_is_rejected() {
    let ts = TestServer::start();
    let mut bob = ts.client();

    assert_eq!(bob.register("bob", "pw")["success"], true);
    let reply = bob.register("bob", "pw");
    assert_eq!(reply["command"], "register");
    assert_eq!(reply["success"], false);
}

#[test]
fn wrong_password_is_rejected() {
    let ts = TestServer::start();
    let mut alice = ts.client();

    alice.register("alice", "pw1");
    let reply = alice.login("alice", "wrong");
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "Invalid credentials");
}

#[test]
fn online_delivery_reaches_the_peer() {
    let ts = TestServer::start();
    let mut alice = ts.client();
    let mut bob = ts.client();

    alice.register("alice", "pw1");
    bob.register("bob", "pw2");
    assert_eq!(alice.login("alice", "pw1")["success"], true);
    assert_eq!(bob.login("bob", "pw2")["success"], true);

    alice.send(json!({"type": "SEND_MESSAGE", "recipient": "bob", "content": "hi"}));
    let reply = alice.expect_frame();
    assert_eq!(reply["command"], "send_message");
    assert_eq!(reply["success"], true);

    let incoming = bob.expect_frame();
    assert_eq!(incoming["command"], "incoming_message");
    assert_eq!(incoming["sender"], "alice");
    assert_eq!(incoming["content"], "hi");
    assert!(incoming["id"].is_i64());
    assert!(incoming["timestamp"].is_string());

    let db = ts.db();
    let (rows, delivered): (i64, i64) = db
        .query_row(
            "SELECT COUNT(*), SUM(delivered) FROM messages",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(delivered, 1);
}

#[test]
fn offline_queue_drains_on_login() {
    let ts = TestServer::start();
    let mut alice = ts.client();

    alice.register("alice", "pw1");
    ts.client().register("bob", "pw2");
    alice.login("alice", "pw1");

    alice.send(json!({"type": "SEND_MESSAGE", "recipient": "bob", "content": "later"}));
    assert_eq!(alice.expect_frame()["success"], true);

    let db = ts.db();
    let delivered: i64 = db
        .query_row("SELECT delivered FROM messages", [], |row| row.get(0))
        .unwrap();
    assert_eq!(delivered, 0);

    // bob connects later; the queued message is replayed around his login
    let mut bob = ts.client();
    bob.send(json!({"type": "LOGIN", "username": "bob", "password": "pw2"}));
    let first = bob.expect_frame();
    let second = bob.expect_frame();
    let (login, incoming) = if first["command"] == "login" {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(login["success"], true);
    assert_eq!(incoming["command"], "incoming_message");
    assert_eq!(incoming["sender"], "alice");
    assert_eq!(incoming["content"], "later");

    let delivered: i64 = db
        .query_row("SELECT delivered FROM messages", [], |row| row.get(0))
        .unwrap();
    assert_eq!(delivered, 1);
}

#[test]
fn tampered_ciphertext_is_never_delivered() {
    let ts = TestServer::start();
    let mut alice = ts.client();

    alice.register("alice", "pw1");
    ts.client().register("bob", "pw2");
    alice.login("alice", "pw1");

    alice.send(json!({"type": "SEND_MESSAGE", "recipient": "bob", "content": "secret"}));
    assert_eq!(alice.expect_frame()["success"], true);

    // flip one ciphertext bit in the stored row
    let db = ts.db();
    let (id, mut ciphertext): (i64, Vec<u8>) = db
        .query_row("SELECT id, ciphertext FROM messages", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    ciphertext[0] ^= 0x01;
    db.execute(
        "UPDATE messages SET ciphertext = ?1 WHERE id = ?2",
        rusqlite::params![ciphertext, id],
    )
    .unwrap();

    let mut bob = ts.client();
    let login = bob.login("bob", "pw2");
    assert_eq!(login["command"], "login");
    assert_eq!(login["success"], true);

    // no incoming_message follows
    assert!(bob
        .read_frame_with_timeout(Duration::from_millis(500))
        .is_none());

    let delivered: i64 = db
        .query_row("SELECT delivered FROM messages WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(delivered, 0);

    let audited: i64 = db
        .query_row(
            "SELECT COUNT(*) FROM logs WHERE level = 'ERROR' AND log LIKE ?1",
            [format!("%{id}%")],
            |row| row.get(0),
        )
        .unwrap();
    assert!(audited >= 1);
}

#[test]
fn second_login_elsewhere_is_rejected() {
    let ts = TestServer::start();
    let mut conn_a = ts.client();

    conn_a.register("alice", "pw1");
    assert_eq!(conn_a.login("alice", "pw1")["success"], true);

    let mut conn_b = ts.client();
    let reply = conn_b.login("alice", "pw1");
    assert_eq!(reply["success"], false);
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .contains("already logged in"));

    // B's connection survives, still unauthenticated
    conn_b.send(json!({"type": "SEND_MESSAGE", "recipient": "alice", "content": "x"}));
    let reply = conn_b.expect_frame();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "Authentication required");

    // A is unaffected
    conn_a.send(json!({"type": "LOGOUT"}));
    assert_eq!(conn_a.expect_frame()["success"], true);
}

#[test]
fn unauthenticated_commands_fail_cleanly() {
    let ts = TestServer::start();
    let mut client = ts.client();

    client.send(json!({"type": "SEND_MESSAGE", "recipient": "bob", "content": "hi"}));
    assert_eq!(client.expect_frame()["message"], "Authentication required");

    client.send(json!({"type": "LOGOUT"}));
    assert_eq!(client.expect_frame()["success"], false);

    client.send(json!({"type": "WARP_DRIVE"}));
    let reply = client.expect_frame();
    assert_eq!(reply["command"], "unknown");
    assert_eq!(reply["success"], false);
}

#[test]
fn oversized_frame_closes_the_connection() {
    let ts = TestServer::start();
    let mut client = ts.client();

    // 1 MiB announced length, way over the 64 KiB cap
    client.send_raw(&(1024u32 * 1024).to_be_bytes());
    client.send_raw(&[0u8; 64]);

    assert!(client
        .read_frame_with_timeout(Duration::from_secs(2))
        .is_none());

    // a fresh connection still works
    let mut next = ts.client();
    assert_eq!(next.register("carol", "pw")["success"], true);
}

#[test]
fn directory_and_history_queries() {
    let ts = TestServer::start();
    let mut alice = ts.client();
    let mut bob = ts.client();

    alice.register("alice", "pw1");
    bob.register("bob", "pw2");
    alice.login("alice", "pw1");
    bob.login("bob", "pw2");

    alice.send(json!({"type": "SEND_MESSAGE", "recipient": "bob", "content": "one"}));
    alice.expect_frame();
    bob.expect_frame(); // realtime copy of "one"
    bob.send(json!({"type": "SEND_MESSAGE", "recipient": "alice", "content": "two"}));
    bob.expect_frame();
    alice.expect_frame(); // realtime copy of "two"

    alice.send(json!({"type": "LIST_USERS"}));
    let reply = alice.expect_frame();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["payload"], json!(["alice", "bob"]));

    alice.send(json!({"type": "LIST_ONLINE"}));
    let reply = alice.expect_frame();
    assert_eq!(reply["payload"], json!(["alice", "bob"]));

    alice.send(json!({"type": "GET_HISTORY", "with": "bob"}));
    let reply = alice.expect_frame();
    assert_eq!(reply["command"], "get_history");
    assert_eq!(reply["success"], true);
    let entries = reply["payload"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["content"], "one");
    assert_eq!(entries[0]["sender"], "alice");
    assert_eq!(entries[1]["content"], "two");
    assert_eq!(entries[1]["sender"], "bob");

    bob.send(json!({"type": "GET_HISTORY", "with": "ghost"}));
    let reply = bob.expect_frame();
    assert_eq!(reply["success"], false);
}

#[test]
fn disconnect_frees_the_session() {
    let ts = TestServer::start();
    let mut first = ts.client();

    first.register("alice", "pw1");
    assert_eq!(first.login("alice", "pw1")["success"], true);
    drop(first);

    // the server notices the close and releases alice's session; a new
    // login must eventually succeed
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut retry = ts.client();
        let reply = retry.login("alice", "pw1");
        if reply["success"] == true {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "session was never released after disconnect"
        );
        std::thread::sleep(Duration::from_millis(100));
    }
}
