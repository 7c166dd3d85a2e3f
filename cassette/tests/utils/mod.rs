#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cassette::cluster::Endpoint;
use cassette_cql::frame::request::{
    Credentials, DeserializableRequest, Prepare, Query, RequestOpcode,
};
use cassette_cql::frame::{types, FLAG_TRACING};
use cassette_cql::Consistency;
use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

pub const CLUSTER_NAME: &str = "Mock Cluster";
pub const USERNAME: &str = "cassandra";
pub const PASSWORD: &str = "secret";
pub const PREPARED_ID: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];
pub const TRACING_ID: Uuid = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
pub const EVENT_NODE: &str = "10.0.0.7:9042";

// Statements the mock server reacts to.
pub const FAIL_UNAVAILABLE: &str = "FAIL UNAVAILABLE";
pub const FAIL_SYNTAX: &str = "FAIL SYNTAX";
pub const WRONG_STREAM: &str = "WRONG STREAM";
pub const NO_ANSWER: &str = "NO ANSWER";

// Opcode placeholder for a query that is recorded but never answered.
const NO_REPLY: u8 = u8::MAX - 1;

const OP_ERROR: u8 = 0x00;
const OP_READY: u8 = 0x02;
const OP_AUTHENTICATE: u8 = 0x03;
const OP_SUPPORTED: u8 = 0x06;
const OP_RESULT: u8 = 0x08;
const OP_EVENT: u8 = 0x0C;

pub fn init_logger() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .try_init();
}

pub fn endpoint(addr: SocketAddr) -> Arc<Endpoint> {
    Arc::new(Endpoint::new(
        addr.ip().to_string(),
        addr.port(),
        Duration::from_secs(1),
    ))
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[derive(Default)]
pub struct ServerState {
    require_auth: bool,
    connections: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

impl ServerState {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// QUERY statements received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn count(&self, statement: &str) -> usize {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == statement)
            .count()
    }
}

/// A node answering just enough of the protocol to drive the driver.
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<ServerState>,
    _handle: RemoteHandle<()>,
}

impl MockNode {
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    pub async fn start_with_auth() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(require_auth: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            require_auth,
            ..Default::default()
        });
        let (fut, handle) = accept_loop(listener, Arc::clone(&state)).remote_handle();
        tokio::spawn(fut);
        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> Arc<Endpoint> {
        endpoint(self.addr)
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    while let Ok((socket, _)) = listener.accept().await {
        state.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve_connection(socket, Arc::clone(&state)));
    }
}

async fn serve_connection(mut socket: TcpStream, state: Arc<ServerState>) {
    loop {
        let mut header = [0u8; 8];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let flags = header[1];
        let stream = header[2] as i8;
        let opcode = header[3];
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut body = vec![0u8; length];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }

        let traced = flags & FLAG_TRACING != 0;
        let (mut stream, opcode_out, mut body_out) = answer(opcode, &body, stream, &state);
        if opcode_out == NO_REPLY {
            continue;
        }
        let mut flags_out = 0;
        if traced && opcode_out == OP_RESULT {
            flags_out |= FLAG_TRACING;
            let mut with_id = TRACING_ID.as_bytes().to_vec();
            with_id.extend_from_slice(&body_out);
            body_out = with_id;
        }
        if opcode_out == u8::MAX {
            // Answer on a stream nobody asked about.
            stream = stream.wrapping_add(1);
        }
        let opcode_out = if opcode_out == u8::MAX { OP_RESULT } else { opcode_out };
        if write_frame(&mut socket, flags_out, stream, opcode_out, &body_out)
            .await
            .is_err()
        {
            return;
        }

        if opcode == RequestOpcode::Register as u8 {
            let mut event = Vec::new();
            types::write_string("STATUS_CHANGE", &mut event).unwrap();
            types::write_string("UP", &mut event).unwrap();
            types::write_inet(EVENT_NODE.parse().unwrap(), &mut event);
            if write_frame(&mut socket, 0, -1, OP_EVENT, &event).await.is_err() {
                return;
            }
        }
    }
}

async fn write_frame(
    socket: &mut TcpStream,
    flags: u8,
    stream: i8,
    opcode: u8,
    body: &[u8],
) -> std::io::Result<()> {
    let mut frame = vec![0x81, flags, stream as u8, opcode];
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    socket.write_all(&frame).await
}

/// Returns the stream, opcode and body of the answer. `u8::MAX` as opcode
/// asks for a void result on the wrong stream.
fn answer(opcode: u8, mut body: &[u8], stream: i8, state: &ServerState) -> (i8, u8, Vec<u8>) {
    let mut out = Vec::new();
    let opcode_out = match opcode {
        op if op == RequestOpcode::Options as u8 => {
            // No compression on offer.
            types::write_string_multimap(&HashMap::new(), &mut out).unwrap();
            OP_SUPPORTED
        }
        op if op == RequestOpcode::Startup as u8 => {
            if state.require_auth {
                types::write_string(
                    "org.apache.cassandra.auth.PasswordAuthenticator",
                    &mut out,
                )
                .unwrap();
                OP_AUTHENTICATE
            } else {
                OP_READY
            }
        }
        op if op == RequestOpcode::Credentials as u8 => {
            let credentials = Credentials::deserialize(&mut body).unwrap().credentials;
            let valid = credentials.get("username").map(String::as_str) == Some(USERNAME)
                && credentials.get("password").map(String::as_str) == Some(PASSWORD);
            if valid {
                OP_READY
            } else {
                write_error(0x0100, "Provided username and/or password are incorrect", &mut out);
                OP_ERROR
            }
        }
        op if op == RequestOpcode::Register as u8 => OP_READY,
        op if op == RequestOpcode::Query as u8 => {
            let query = Query::deserialize(&mut body).unwrap();
            let statement = query.contents.into_owned();
            state.statements.lock().unwrap().push(statement.clone());
            return (stream, answer_query(&statement, &mut out), out);
        }
        op if op == RequestOpcode::Prepare as u8 => {
            Prepare::deserialize(&mut body).unwrap();
            types::write_int(0x0004, &mut out);
            types::write_short_bytes(&PREPARED_ID, &mut out).unwrap();
            write_metadata(&[], &mut out);
            OP_RESULT
        }
        op if op == RequestOpcode::Execute as u8 => {
            types::write_int(0x0001, &mut out);
            OP_RESULT
        }
        _ => {
            write_error(0x000A, "Unexpected opcode", &mut out);
            OP_ERROR
        }
    };
    (stream, opcode_out, out)
}

fn answer_query(statement: &str, out: &mut Vec<u8>) -> u8 {
    if let Some(keyspace) = statement.strip_prefix("USE ") {
        types::write_int(0x0003, out);
        types::write_string(keyspace, out).unwrap();
        return OP_RESULT;
    }
    if statement.contains("system.local") {
        types::write_int(0x0002, out);
        write_metadata(&[("cluster_name", 0x000D)], out);
        types::write_int(1, out);
        types::write_bytes(CLUSTER_NAME.as_bytes(), out).unwrap();
        return OP_RESULT;
    }
    match statement {
        FAIL_UNAVAILABLE => {
            write_error(0x1000, "Cannot achieve consistency level", out);
            types::write_consistency(Consistency::One, out);
            types::write_int(3, out);
            types::write_int(1, out);
            OP_ERROR
        }
        FAIL_SYNTAX => {
            write_error(0x2000, "line 1:0 no viable alternative", out);
            OP_ERROR
        }
        WRONG_STREAM => {
            types::write_int(0x0001, out);
            u8::MAX
        }
        NO_ANSWER => NO_REPLY,
        _ => {
            types::write_int(0x0001, out);
            OP_RESULT
        }
    }
}

fn write_error(code: i32, message: &str, out: &mut Vec<u8>) {
    types::write_int(code, out);
    types::write_string(message, out).unwrap();
}

fn write_metadata(columns: &[(&str, u16)], out: &mut Vec<u8>) {
    // Global table spec.
    types::write_int(0x0001, out);
    types::write_int(columns.len() as i32, out);
    types::write_string("system", out).unwrap();
    types::write_string("local", out).unwrap();
    for (name, type_id) in columns {
        types::write_string(name, out).unwrap();
        types::write_short(*type_id, out);
    }
}
